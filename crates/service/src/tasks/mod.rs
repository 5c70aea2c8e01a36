//! Asynchronous task submission and status tracking.

mod queue;
mod worker;

pub use queue::{LocalTaskQueue, QueuedTask, TaskHandle, TaskQueue, TaskReceiver, TaskRecord, TaskStatus};
pub use worker::TaskWorker;

/// Task type for rule save plus host apply over service templates.
pub const SYNC_SERVICE_TEMPLATE_HOST_APPLY: &str = "sync_service_template_host_apply";
