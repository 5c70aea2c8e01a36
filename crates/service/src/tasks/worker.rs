use std::sync::Arc;

use tracing::{error, info, warn};

use super::queue::{LocalTaskQueue, QueuedTask, TaskReceiver, TaskStatus};
use super::SYNC_SERVICE_TEMPLATE_HOST_APPLY;
use crate::errors::ServiceError;
use crate::host_apply::domain::HostApplyServiceTemplateOption;
use crate::host_apply::HostApplyService;

/// Runs queued tasks one at a time.
///
/// The worker holds the queue and with it a sender, so `run` only returns
/// when its task is dropped, which is at process shutdown.
pub struct TaskWorker {
    queue: Arc<LocalTaskQueue>,
    receiver: TaskReceiver,
    service: Arc<HostApplyService>,
}

impl TaskWorker {
    pub fn new(queue: Arc<LocalTaskQueue>, receiver: TaskReceiver, service: Arc<HostApplyService>) -> Self {
        Self { queue, receiver, service }
    }

    pub async fn run(mut self) {
        info!("task_worker_started");
        while let Some(task) = self.receiver.recv().await {
            self.execute(task).await;
        }
        info!("task_worker_stopped");
    }

    /// Handle the next queued task; `false` once the queue is closed.
    pub async fn run_once(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                self.execute(task).await;
                true
            }
            None => false,
        }
    }

    async fn execute(&self, task: QueuedTask) {
        let task_id = task.handle.task_id.clone();
        self.queue.mark(&task_id, TaskStatus::Executing, Ok(None)).await;
        let outcome = match task.handle.task_type.as_str() {
            SYNC_SERVICE_TEMPLATE_HOST_APPLY => self.sync_host_apply(&task).await,
            other => Err(ServiceError::Validation(format!("unsupported task type {other}"))),
        };
        match outcome {
            Ok(result) => {
                info!(rid = %task.kit.rid, task_id = %task_id, "task_finished");
                self.queue.mark(&task_id, TaskStatus::Finished, Ok(Some(result))).await;
            }
            Err(e) => {
                if e.is_validation() {
                    warn!(rid = %task.kit.rid, task_id = %task_id, error = %e, "task_rejected");
                } else {
                    error!(rid = %task.kit.rid, task_id = %task_id, error = %e, "task_failed");
                }
                self.queue.mark(&task_id, TaskStatus::Failed, Err(e.to_string())).await;
            }
        }
    }

    async fn sync_host_apply(&self, task: &QueuedTask) -> Result<serde_json::Value, ServiceError> {
        let opt: HostApplyServiceTemplateOption = serde_json::from_value(task.payload.clone())
            .map_err(|e| ServiceError::Validation(format!("decode task payload: {e}")))?;
        let report = self.service.exec_template_host_apply(&task.kit, opt).await?;
        serde_json::to_value(report).map_err(|e| ServiceError::Dependency(format!("encode task result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_apply::domain::CreateHostApplyRuleOption;
    use crate::tasks::TaskQueue;
    use crate::test_support::{service_fixture, BIZ_ID, TEMPLATE_A};
    use serde_json::json;

    #[tokio::test]
    async fn queued_rule_update_runs_host_apply() {
        let fx = service_fixture();
        let opt = HostApplyServiceTemplateOption {
            biz_id: BIZ_ID,
            service_template_ids: vec![TEMPLATE_A],
            additional_rules: vec![CreateHostApplyRuleOption {
                service_template_id: TEMPLATE_A,
                attribute_id: 1,
                property_value: json!("A"),
            }],
            remove_rule_ids: vec![],
            host_ids: None,
            changed: true,
        };
        let handle = fx.service.update_template_host_apply_rules(&fx.kit, opt).await.unwrap();
        assert_eq!(handle.task_type, SYNC_SERVICE_TEMPLATE_HOST_APPLY);
        assert_eq!(handle.owner_id, BIZ_ID);

        let mut worker = TaskWorker::new(fx.queue.clone(), fx.receiver, fx.service.clone());
        assert!(worker.run_once().await);

        let record = fx.queue.get(&handle.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.result.unwrap()["updated_hosts"], json!(2));
        assert_eq!(fx.store.host(1).unwrap().attributes["cpu_module"], json!("A"));
    }

    #[tokio::test]
    async fn unknown_task_type_fails() {
        let fx = service_fixture();
        let handle = fx.queue.create(&fx.kit, "mystery", 1, json!({})).await.unwrap();
        let mut worker = TaskWorker::new(fx.queue.clone(), fx.receiver, fx.service.clone());
        assert!(worker.run_once().await);
        let record = fx.queue.get(&handle.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("mystery"));
    }
}
