//! Service layer of the host apply engine.
//! - Rule storage, membership resolution, diffing and host convergence.
//! - Store backends on sea-orm (PostgreSQL) and in memory.
//! - Background task queue for template-wide resyncs.

pub mod errors;
pub mod host_apply;
pub mod kit;
pub mod predicate;
pub mod tasks;
#[cfg(test)]
pub mod test_support;
