use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use common::types::Health;
use service::host_apply::HostApplyService;
use service::kit::Kit;
use service::tasks::TaskQueue;

pub mod host_apply;
pub mod tasks;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const USER_HEADER: &str = "x-user";
pub const SUPPLIER_ACCOUNT_HEADER: &str = "x-supplier-account";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HostApplyService>,
    pub tasks: Arc<dyn TaskQueue>,
}

/// Request context built from headers; a missing request id is generated.
pub struct RequestKit(pub Kit);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestKit {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let mut kit = Kit::new(header(headers, USER_HEADER).unwrap_or("anonymous"));
        if let Some(rid) = header(headers, REQUEST_ID_HEADER) {
            kit = kit.with_rid(rid);
        }
        if let Some(account) = header(headers, SUPPLIER_ACCOUNT_HEADER) {
            kit = kit.with_supplier_account(account);
        }
        Ok(RequestKit(kit))
    }
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Build the full application router
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let biz = Router::new()
        .route("/service_templates", post(host_apply::create_template))
        .route("/service_templates/host_apply/exec", post(host_apply::exec_host_apply))
        .route("/service_templates/host_apply/rules", put(host_apply::update_host_apply_rules))
        .route("/service_templates/host_apply/enable", put(host_apply::set_host_apply_enabled))
        .route("/service_templates/sync_status", post(host_apply::get_sync_status))
        .route("/service_templates/count_info", post(host_apply::count_info))
        .route("/host_apply_rules", axum::routing::delete(host_apply::delete_host_apply_rules))
        .route("/host_apply_rules/list", post(host_apply::list_host_apply_rules));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/biz/:biz_id", biz)
        .route("/api/v1/tasks/:task_id", get(tasks::get_task))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                        .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
                )
                .layer(cors),
        )
}
