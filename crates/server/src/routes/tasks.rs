use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service::tasks::TaskRecord;

use super::AppState;
use crate::errors::JsonApiError;

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, JsonApiError> {
    match state.tasks.get(&task_id).await {
        Some(record) => Ok(Json(record)),
        None => Err(JsonApiError::new(StatusCode::NOT_FOUND, "Not Found", Some(format!("task {task_id} not found")))),
    }
}
