#![cfg(test)]
use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::DatabaseConnection;
use serde_json::json;
use tokio::sync::OnceCell;

use crate::host_apply::repo::memory::InMemoryHostApplyStore;
use crate::host_apply::HostApplyService;
use crate::kit::Kit;
use crate::tasks::{LocalTaskQueue, TaskReceiver};

pub const BIZ_ID: i64 = 2;
pub const TEMPLATE_A: i64 = 1;
pub const TEMPLATE_B: i64 = 2;
/// Template with no module bound to it.
pub const TEMPLATE_UNBOUND: i64 = 3;

// Ensure migrations run only once across the entire test process
static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Migrated connection, or `None` when `DATABASE_URL` is not set.
pub async fn get_db() -> anyhow::Result<Option<DatabaseConnection>> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL missing; skip db tests");
        return Ok(None);
    }
    MIGRATED
        .get_or_try_init(|| async {
            let db = models::db::connect().await?;
            migration::Migrator::up(&db, None).await?;
            anyhow::Ok(())
        })
        .await?;
    Ok(Some(models::db::connect().await?))
}

/// Business 2 with:
/// - attributes 1 `cpu_module` (global), 2 `bk_os_name`, 3 `rack` (global)
/// - templates A and B enabled, `TEMPLATE_UNBOUND` disabled
/// - modules 11 and 12 on A, 21 on B, 30 unbound
/// - hosts 1..=5; host 2 already has `cpu_module = "A"`; host 3 sits in 11 and 12
pub fn seed(store: &InMemoryHostApplyStore) {
    store.add_attribute(1, 0, "cpu_module", "singlechar");
    store.add_attribute(2, BIZ_ID, "bk_os_name", "singlechar");
    store.add_attribute(3, 0, "rack", "int");

    store.add_template(TEMPLATE_A, BIZ_ID, "tpl-a", true);
    store.add_template(TEMPLATE_B, BIZ_ID, "tpl-b", true);
    store.add_template(TEMPLATE_UNBOUND, BIZ_ID, "tpl-unbound", false);

    store.add_module(11, BIZ_ID, TEMPLATE_A);
    store.add_module(12, BIZ_ID, TEMPLATE_A);
    store.add_module(21, BIZ_ID, TEMPLATE_B);
    store.add_module(30, BIZ_ID, 0);

    store.add_host(1, json!({}));
    store.add_host(2, json!({"cpu_module": "A"}));
    store.add_host(3, json!({"bk_os_name": "linux"}));
    store.add_host(4, json!({}));
    store.add_host(5, json!({}));

    for (host, module) in [(1, 11), (2, 11), (3, 11), (3, 12), (4, 21), (5, 30)] {
        store.relate(BIZ_ID, host, module);
    }
}

pub async fn memory_fixture() -> (InMemoryHostApplyStore, Kit) {
    let store = InMemoryHostApplyStore::new();
    seed(&store);
    (store, Kit::new("tester"))
}

/// Unbound module `module_id` holding `hosts`.
pub fn seed_relations(store: &InMemoryHostApplyStore, biz_id: i64, module_id: i64, hosts: Vec<i64>) {
    store.add_module(module_id, biz_id, 0);
    for host in hosts {
        store.add_host(host, json!({}));
        store.relate(biz_id, host, module_id);
    }
}

pub struct ServiceFixture {
    pub store: Arc<InMemoryHostApplyStore>,
    pub queue: Arc<LocalTaskQueue>,
    pub receiver: TaskReceiver,
    pub service: Arc<HostApplyService>,
    pub kit: Kit,
}

pub fn service_fixture() -> ServiceFixture {
    let store = Arc::new(InMemoryHostApplyStore::new());
    seed(&store);
    let (queue, receiver) = LocalTaskQueue::new(8);
    let service = Arc::new(HostApplyService::new(store.clone(), queue.clone(), configs::HostApplyConfig::default()));
    ServiceFixture { store, queue, receiver, service, kit: Kit::new("tester") }
}
