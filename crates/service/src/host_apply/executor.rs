//! Apply executor: count diverging hosts per shard, then merge the rule document into them.

use tracing::{error, info};

use super::diff::HostApplyPlan;
use super::repository::{Collection, HostApplyStore};
use crate::errors::ServiceError;
use crate::kit::Kit;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub matched_hosts: u64,
    pub updated_hosts: u64,
}

/// Count-first, write-second partial update of host attributes.
pub struct ApplyExecutor<'a> {
    store: &'a dyn HostApplyStore,
}

impl<'a> ApplyExecutor<'a> {
    pub fn new(store: &'a dyn HostApplyStore) -> Self { Self { store } }

    pub async fn apply(&self, kit: &Kit, plan: &HostApplyPlan) -> Result<ApplyOutcome, ServiceError> {
        if plan.document.is_empty() || plan.host_ids.is_empty() {
            return Ok(ApplyOutcome::default());
        }
        let counts = self
            .store
            .count(Collection::Host, &plan.shards)
            .await
            .map_err(|e| dependency(kit, "count mismatched hosts", e))?;
        let matched: u64 = counts.iter().sum();
        if matched == 0 {
            info!(rid = %kit.rid, hosts = plan.host_ids.len(), "host_apply_no_mismatch");
            return Ok(ApplyOutcome::default());
        }
        let mut updated = 0;
        for (shard, _) in plan.shards.iter().zip(&counts).filter(|(_, n)| **n > 0) {
            updated += self
                .store
                .update_hosts(shard, &plan.document)
                .await
                .map_err(|e| dependency(kit, "update hosts", e))?;
        }
        info!(
            rid = %kit.rid,
            matched,
            updated,
            shards = plan.shards.len(),
            properties = plan.document.len(),
            "host_apply_hosts_updated"
        );
        Ok(ApplyOutcome { matched_hosts: matched, updated_hosts: updated })
    }
}

fn dependency(kit: &Kit, action: &str, err: ServiceError) -> ServiceError {
    error!(rid = %kit.rid, action, error = %err, "host_apply_store_failed");
    match err {
        ServiceError::Dependency(_) => err,
        other => ServiceError::Dependency(format!("{action}: {other}")),
    }
}
