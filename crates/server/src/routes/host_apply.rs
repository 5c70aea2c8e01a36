use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use common::pagination::PageResult;
use service::errors::ServiceError;
use service::host_apply::{
    CreateServiceTemplateOption, DeleteHostApplyRuleOption, GetServiceTemplateSyncStatusOption, HostApplyReport,
    HostApplyRule, HostApplyServiceTemplateOption, ListHostApplyRuleOption, ServiceTemplate,
    ServiceTemplateSyncStatus, TemplateCountInfo, UpdateHostApplyEnableStatusOption,
};
use service::tasks::TaskHandle;

use super::{AppState, RequestKit};
use crate::errors::JsonApiError;

/// The route scopes the business; a body may repeat it but not contradict it.
fn scoped_biz(path_biz: i64, body_biz: i64) -> Result<i64, JsonApiError> {
    if body_biz != 0 && body_biz != path_biz {
        return Err(ServiceError::Validation(format!("body biz_id {body_biz} does not match route biz_id {path_biz}")).into());
    }
    Ok(path_biz)
}

pub async fn create_template(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(mut input): Json<CreateServiceTemplateOption>,
) -> Result<(StatusCode, Json<ServiceTemplate>), JsonApiError> {
    input.biz_id = scoped_biz(biz_id, input.biz_id)?;
    let template = state.service.create_template(&kit, input).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// Save rules and converge hosts in the request.
pub async fn exec_host_apply(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(mut opt): Json<HostApplyServiceTemplateOption>,
) -> Result<Json<HostApplyReport>, JsonApiError> {
    opt.biz_id = scoped_biz(biz_id, opt.biz_id)?;
    Ok(Json(state.service.exec_template_host_apply(&kit, opt).await?))
}

/// Queue the same work; poll `/api/v1/tasks/:task_id` for the outcome.
pub async fn update_host_apply_rules(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(mut opt): Json<HostApplyServiceTemplateOption>,
) -> Result<(StatusCode, Json<TaskHandle>), JsonApiError> {
    opt.biz_id = scoped_biz(biz_id, opt.biz_id)?;
    let handle = state.service.update_template_host_apply_rules(&kit, opt).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

pub async fn set_host_apply_enabled(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(opt): Json<UpdateHostApplyEnableStatusOption>,
) -> Result<StatusCode, JsonApiError> {
    state.service.set_template_host_apply_enabled(&kit, biz_id, opt).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedRules {
    pub removed: u64,
}

pub async fn delete_host_apply_rules(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(opt): Json<DeleteHostApplyRuleOption>,
) -> Result<Json<DeletedRules>, JsonApiError> {
    let removed = state.service.delete_host_apply_rules(&kit, biz_id, opt).await?;
    Ok(Json(DeletedRules { removed }))
}

pub async fn get_sync_status(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(opt): Json<GetServiceTemplateSyncStatusOption>,
) -> Result<Json<ServiceTemplateSyncStatus>, JsonApiError> {
    Ok(Json(state.service.get_sync_status(&kit, biz_id, opt).await?))
}

pub async fn list_host_apply_rules(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(opt): Json<ListHostApplyRuleOption>,
) -> Result<Json<PageResult<HostApplyRule>>, JsonApiError> {
    Ok(Json(state.service.list_host_apply_rules(&kit, biz_id, opt).await?))
}

#[derive(Debug, Deserialize)]
pub struct CountInfoRequest {
    pub service_template_ids: Vec<i64>,
}

pub async fn count_info(
    State(state): State<AppState>,
    RequestKit(kit): RequestKit,
    Path(biz_id): Path<i64>,
    Json(req): Json<CountInfoRequest>,
) -> Result<Json<Vec<TemplateCountInfo>>, JsonApiError> {
    Ok(Json(state.service.find_template_count_info(&kit, biz_id, req.service_template_ids).await?))
}
