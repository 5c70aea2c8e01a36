//! Per-request context handed explicitly to every engine call.

use uuid::Uuid;

pub const DEFAULT_SUPPLIER_ACCOUNT: &str = "0";

/// Request identity: request id for log correlation, acting user, supplier account.
#[derive(Clone, Debug)]
pub struct Kit {
    pub rid: String,
    pub user: String,
    pub supplier_account: String,
}

impl Kit {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            rid: Uuid::new_v4().simple().to_string(),
            user: user.into(),
            supplier_account: DEFAULT_SUPPLIER_ACCOUNT.to_string(),
        }
    }

    /// Keep an upstream request id instead of generating one.
    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        let rid = rid.into();
        if !rid.trim().is_empty() {
            self.rid = rid;
        }
        self
    }

    pub fn with_supplier_account(mut self, account: impl Into<String>) -> Self {
        self.supplier_account = account.into();
        self
    }
}
