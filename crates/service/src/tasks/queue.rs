use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::kit::Kit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Executing,
    Finished,
    Failed,
}

/// Returned to the submitter; `task_id` is the lookup key for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub task_type: String,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub handle: TaskHandle,
    pub status: TaskStatus,
    pub creator: String,
    pub rid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub create_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
}

/// Unit of work travelling through the queue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub handle: TaskHandle,
    pub kit: Kit,
    pub payload: Value,
}

pub type TaskReceiver = mpsc::Receiver<QueuedTask>;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn create(&self, kit: &Kit, task_type: &str, owner_id: i64, payload: Value) -> Result<TaskHandle, ServiceError>;

    async fn get(&self, task_id: &str) -> Option<TaskRecord>;
}

/// Finished or failed records kept for status lookups.
pub const DEFAULT_SETTLED_RETENTION: usize = 1024;

impl TaskStatus {
    pub fn is_settled(self) -> bool { matches!(self, TaskStatus::Finished | TaskStatus::Failed) }
}

/// Bounded in-process queue with a status registry.
///
/// Waiting and executing records are always kept; settled ones beyond the
/// retention are evicted oldest first.
pub struct LocalTaskQueue {
    sender: mpsc::Sender<QueuedTask>,
    registry: Arc<RwLock<Registry>>,
    settled_retention: usize,
}

#[derive(Default)]
struct Registry {
    records: HashMap<String, TaskRecord>,
    /// Settled task IDs, oldest first.
    settled: VecDeque<String>,
}

impl LocalTaskQueue {
    pub fn new(capacity: usize) -> (Arc<Self>, TaskReceiver) { Self::with_retention(capacity, DEFAULT_SETTLED_RETENTION) }

    pub fn with_retention(capacity: usize, settled_retention: usize) -> (Arc<Self>, TaskReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self { sender, registry: Arc::new(RwLock::new(Registry::default())), settled_retention };
        (Arc::new(queue), receiver)
    }

    pub(crate) async fn mark(&self, task_id: &str, status: TaskStatus, outcome: Result<Option<Value>, String>) {
        let mut registry = self.registry.write().await;
        let Some(record) = registry.records.get_mut(task_id) else {
            return;
        };
        let newly_settled = status.is_settled() && !record.status.is_settled();
        record.status = status;
        record.last_time = Utc::now();
        match outcome {
            Ok(result) => record.result = result,
            Err(e) => record.error = Some(e),
        }
        if newly_settled {
            registry.settled.push_back(task_id.to_string());
            registry.evict_settled(self.settled_retention);
        }
    }
}

impl Registry {
    fn evict_settled(&mut self, keep: usize) {
        let mut evicted = 0;
        while self.settled.len() > keep {
            if let Some(task_id) = self.settled.pop_front() {
                self.records.remove(&task_id);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, kept = keep, "task_records_evicted");
        }
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn create(&self, kit: &Kit, task_type: &str, owner_id: i64, payload: Value) -> Result<TaskHandle, ServiceError> {
        let handle = TaskHandle { task_id: Uuid::new_v4().to_string(), task_type: task_type.to_string(), owner_id };
        let now = Utc::now();
        self.registry.write().await.records.insert(
            handle.task_id.clone(),
            TaskRecord {
                handle: handle.clone(),
                status: TaskStatus::Waiting,
                creator: kit.user.clone(),
                rid: kit.rid.clone(),
                error: None,
                result: None,
                create_time: now,
                last_time: now,
            },
        );
        let task = QueuedTask { handle: handle.clone(), kit: kit.clone(), payload };
        if let Err(e) = self.sender.try_send(task) {
            self.registry.write().await.records.remove(&handle.task_id);
            warn!(rid = %kit.rid, task_type, "task_queue_rejected");
            return Err(ServiceError::Dependency(format!("task queue unavailable: {e}")));
        }
        info!(rid = %kit.rid, task_id = %handle.task_id, task_type, owner_id, "task_created");
        Ok(handle)
    }

    async fn get(&self, task_id: &str) -> Option<TaskRecord> { self.registry.read().await.records.get(task_id).cloned() }
}
