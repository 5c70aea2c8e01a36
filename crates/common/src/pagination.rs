//! Pagination utilities shared by the service and server crates.
//!
//! `Page` mirrors the CMDB `start`/`limit` convention, including the
//! "no limit" sentinel used by internal full scans.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel limit meaning "return everything".
pub const NO_LIMIT: u64 = 999_999_999;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("page limit {limit} exceeds maximum {max}")]
pub struct PageLimitExceeded {
    pub limit: u64,
    pub max: u64,
}

/// Offset-based page request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 0-based offset
    #[serde(default)]
    pub start: u64,
    /// items per page
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 { 20 }

impl Page {
    pub fn new(start: u64, limit: u64) -> Self { Self { start, limit } }

    /// Page covering the whole collection; only for internal scans.
    pub fn unlimited() -> Self { Self { start: 0, limit: NO_LIMIT } }

    pub fn is_unlimited(&self) -> bool { self.limit >= NO_LIMIT }

    /// Reject caller pages above `max`; a zero limit is promoted to 1.
    pub fn validate(self, max: u64) -> Result<Self, PageLimitExceeded> {
        if self.limit > max {
            return Err(PageLimitExceeded { limit: self.limit, max });
        }
        Ok(Self { start: self.start, limit: self.limit.max(1) })
    }

    /// Shrink the limit to a store-side cap, keeping the offset.
    pub fn capped(self, cap: u64) -> Self {
        Self { start: self.start, limit: self.limit.min(cap) }
    }
}

impl Default for Page {
    fn default() -> Self { Self { start: 0, limit: default_limit() } }
}

/// One page of results plus the total count matching the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub count: u64,
    pub info: Vec<T>,
}
