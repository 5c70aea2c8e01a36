use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use common::utils::logging::init_logging_default;
use configs::{AppConfig, HostApplyConfig, StoreBackend};
use dotenvy::dotenv;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::errors::StartupError;
use crate::routes::{self, AppState};
use service::host_apply::repo::{memory::InMemoryHostApplyStore, seaorm::SeaOrmHostApplyStore};
use service::host_apply::{HostApplyService, HostApplyStore};
use service::tasks::{LocalTaskQueue, TaskWorker};

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Load config, falling back to defaults plus env vars when no file is present
fn load_config() -> Result<AppConfig, StartupError> {
    match configs::AppConfig::load_and_validate() {
        Ok(cfg) => Ok(cfg),
        Err(e) if env::var("CONFIG_PATH").is_ok() => Err(StartupError::InvalidConfig(e.to_string())),
        Err(e) => {
            warn!(error = %e, "config file unavailable, using defaults");
            let mut cfg = AppConfig::default();
            cfg.normalize_and_validate().map_err(|e| StartupError::InvalidConfig(e.to_string()))?;
            Ok(cfg)
        }
    }
}

async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn HostApplyStore>, StartupError> {
    match cfg.host_apply.backend {
        StoreBackend::Postgres => {
            let db = models::db::connect_with_config(&cfg.database)
                .await
                .map_err(|e| StartupError::Database(e.to_string()))?;
            Ok(Arc::new(SeaOrmHostApplyStore::new(db, cfg.host_apply.relation_page_size)))
        }
        StoreBackend::Memory => {
            warn!("host apply store is in memory; data is lost on restart");
            Ok(Arc::new(InMemoryHostApplyStore::new()))
        }
    }
}

/// Wire the service, the task queue and the router over `store`.
///
/// The returned worker must be spawned for queued rule updates to run.
pub fn build_app(store: Arc<dyn HostApplyStore>, cfg: HostApplyConfig) -> (Router, TaskWorker) {
    let (queue, receiver) = LocalTaskQueue::new(cfg.task_queue_capacity);
    let service = Arc::new(HostApplyService::new(store, queue.clone(), cfg));
    let worker = TaskWorker::new(queue.clone(), receiver, service.clone());
    let state = AppState { service, tasks: queue };
    (routes::build_router(state, build_cors()), worker)
}

/// Public entry: build the app and run the HTTP server
pub async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    init_logging_default();

    let cfg = load_config()?;
    let store = build_store(&cfg).await?;
    let (app, worker) = build_app(store, cfg.host_apply.clone());
    tokio::spawn(worker.run());

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("bind address: {e}")))?;
    info!(%addr, backend = ?cfg.host_apply.backend, "starting server crate");
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(StartupError::from)?;
    axum::serve(listener, app).await?;
    Ok(())
}
