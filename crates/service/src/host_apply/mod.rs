//! Host attribute auto-apply engine for service templates.
//!
//! Rules are saved inside one unit of work; hosts of the bound modules are
//! converged after commit with a count-first, write-second partial update.

pub mod diff;
pub mod domain;
pub mod executor;
pub mod membership;
pub mod repo;
pub mod repository;
pub mod rule_store;
pub mod service;
pub mod sync_status;

#[cfg(test)]
mod tests;

pub use domain::*;
pub use repository::{Collection, HostApplyStore, RuleTransaction};
pub use service::{CommittedRules, HostApplyService};
