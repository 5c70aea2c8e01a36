use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use configs::HostApplyConfig;
use reqwest::StatusCode as HttpStatusCode;
use serde_json::{json, Value};
use service::host_apply::repo::InMemoryHostApplyStore;
use tokio::net::TcpListener;

const BIZ: i64 = 2;

struct TestApp {
    base_url: String,
    store: Arc<InMemoryHostApplyStore>,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Two templates: 1 binds modules 11 and 12, 2 binds module 21; module 30 is unbound.
fn seed(store: &InMemoryHostApplyStore) {
    store.add_attribute(1, 0, "cpu_module", "singlechar");
    store.add_attribute(2, BIZ, "bk_os_name", "singlechar");
    store.add_template(1, BIZ, "tpl-a", true);
    store.add_template(2, BIZ, "tpl-b", true);
    store.add_module(11, BIZ, 1);
    store.add_module(12, BIZ, 1);
    store.add_module(21, BIZ, 2);
    store.add_module(30, BIZ, 0);
    store.add_host(1, json!({}));
    store.add_host(2, json!({"cpu_module": "A"}));
    store.add_host(3, json!({"bk_os_name": "linux"}));
    store.add_host(4, json!({}));
    for (host, module) in [(1, 11), (2, 11), (3, 12), (4, 21)] {
        store.relate(BIZ, host, module);
    }
}

async fn start_server() -> anyhow::Result<TestApp> {
    let store = Arc::new(InMemoryHostApplyStore::new());
    seed(&store);
    let (app, worker) = server::build_app(store.clone(), HostApplyConfig::default());
    tokio::spawn(worker.run());

    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    let base_url = format!("http://{}:{}", addr.ip(), addr.port());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("server error: {}", e);
        }
    });
    Ok(TestApp { base_url, store })
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .default_headers({
            let mut h = reqwest::header::HeaderMap::new();
            h.insert("x-user", reqwest::header::HeaderValue::from_static("admin"));
            h
        })
        .build()
        .expect("reqwest client")
}

fn rule_body(value: &str) -> Value {
    json!({
        "service_template_ids": [1],
        "additional_rules": [{"service_template_id": 1, "attribute_id": 1, "property_value": value}],
        "changed": true
    })
}

async fn poll_task(c: &reqwest::Client, app: &TestApp, task_id: &str) -> anyhow::Result<Value> {
    for _ in 0..50 {
        let record: Value = c.get(app.url(&format!("/api/v1/tasks/{task_id}"))).send().await?.json().await?;
        if record["status"] == "finished" || record["status"] == "failed" {
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("task {task_id} did not settle")
}

#[tokio::test]
async fn health_is_ok() -> anyhow::Result<()> {
    let app = start_server().await?;
    let res = client().get(app.url("/health")).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn exec_converges_hosts_and_reports_in_sync() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let res = c
        .post(app.url("/api/v1/biz/2/service_templates/sync_status"))
        .json(&json!({"is_partial": true, "service_template_ids": [1]}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let before: Value = res.json().await?;
    assert_eq!(before["service_templates"][0]["state"], "in_sync");

    let res = c
        .post(app.url("/api/v1/biz/2/service_templates/host_apply/exec"))
        .header("x-request-id", "rid-exec-1")
        .json(&rule_body("A"))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let report: Value = res.json().await?;
    assert_eq!(report["phase"], "hosts_converged");
    assert_eq!(report["saved_rules"], 1);
    assert_eq!(report["target_hosts"], 3);
    assert_eq!(report["updated_hosts"], 2);
    assert_eq!(app.store.host(3).unwrap().attributes["cpu_module"], json!("A"));
    assert_eq!(app.store.host(3).unwrap().attributes["bk_os_name"], json!("linux"));
    assert_eq!(app.store.host(4).unwrap().attributes.get("cpu_module"), None);

    // a host drifts back out of line
    app.store.set_host_attribute(1, "cpu_module", json!("Z"));
    let status: Value = c
        .post(app.url("/api/v1/biz/2/service_templates/sync_status"))
        .json(&json!({"is_partial": false, "module_ids": [11, 12, 30]}))
        .send()
        .await?
        .json()
        .await?;
    let modules = status["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0]["module_id"], 11);
    assert_eq!(modules[0]["state"], "needs_sync");
    assert_eq!(modules[0]["detail"]["mismatched_properties"], json!(["cpu_module"]));
    assert_eq!(modules[1]["state"], "in_sync");
    Ok(())
}

#[tokio::test]
async fn queued_rule_update_finishes_and_lists_rules() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let res = c
        .put(app.url("/api/v1/biz/2/service_templates/host_apply/rules"))
        .json(&rule_body("B"))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::ACCEPTED);
    let handle: Value = res.json().await?;
    assert_eq!(handle["task_type"], "sync_service_template_host_apply");
    assert_eq!(handle["owner_id"], BIZ);

    let record = poll_task(&c, &app, handle["task_id"].as_str().unwrap()).await?;
    assert_eq!(record["status"], "finished");
    assert_eq!(record["creator"], "admin");
    assert_eq!(record["result"]["updated_hosts"], 3);
    assert_eq!(app.store.host(2).unwrap().attributes["cpu_module"], json!("B"));

    let page: Value = c
        .post(app.url("/api/v1/biz/2/host_apply_rules/list"))
        .json(&json!({"service_template_ids": [1], "page": {"start": 0, "limit": 10}}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(page["count"], 1);
    let rule_id = page["info"][0]["id"].as_i64().unwrap();

    let counts: Value = c
        .post(app.url("/api/v1/biz/2/service_templates/count_info"))
        .json(&json!({"service_template_ids": [1, 2]}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(counts[0]["module_count"], 2);
    assert_eq!(counts[0]["host_apply_rule_count"], 1);
    assert_eq!(counts[1]["host_apply_rule_count"], 0);

    let res = c
        .delete(app.url("/api/v1/biz/2/host_apply_rules"))
        .json(&json!({"rule_ids": [rule_id], "service_template_ids": [1]}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    assert_eq!(res.json::<Value>().await?["removed"], 1);
    assert!(app.store.rules().is_empty());
    // deleting rules never rolls host values back
    assert_eq!(app.store.host(2).unwrap().attributes["cpu_module"], json!("B"));
    Ok(())
}

#[tokio::test]
async fn create_and_enable_template() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let res = c
        .post(app.url("/api/v1/biz/2/service_templates"))
        .json(&json!({"name": "  tpl-new "}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::CREATED);
    let template: Value = res.json().await?;
    assert_eq!(template["name"], "tpl-new");
    assert_eq!(template["biz_id"], BIZ);
    assert_eq!(template["host_apply_enabled"], false);
    let id = template["id"].as_i64().unwrap();

    let res = c
        .put(app.url("/api/v1/biz/2/service_templates/host_apply/enable"))
        .json(&json!({"service_template_ids": [id], "enabled": true}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::NO_CONTENT);
    assert!(app.store.template(id).unwrap().host_apply_enabled);

    let res = c
        .post(app.url("/api/v1/biz/2/service_templates"))
        .json(&json!({"name": "tpl-new"}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn errors_map_to_statuses() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let too_many: Vec<i64> = (1..=101).collect();
    let res = c
        .post(app.url("/api/v1/biz/2/service_templates/sync_status"))
        .json(&json!({"is_partial": true, "service_template_ids": too_many}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.json::<Value>().await?["code"], 1005);

    let res = c
        .post(app.url("/api/v1/biz/2/service_templates/sync_status"))
        .json(&json!({"is_partial": true, "service_template_ids": [404]}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::NOT_FOUND);

    let mut body = rule_body("A");
    body["biz_id"] = json!(7);
    let res = c
        .post(app.url("/api/v1/biz/2/service_templates/host_apply/exec"))
        .json(&body)
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);

    let res = c
        .delete(app.url("/api/v1/biz/2/host_apply_rules"))
        .json(&json!({"rule_ids": [], "service_template_ids": [1]}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);

    let res = c.get(app.url("/api/v1/tasks/missing")).send().await?;
    assert_eq!(res.status(), HttpStatusCode::NOT_FOUND);
    Ok(())
}
