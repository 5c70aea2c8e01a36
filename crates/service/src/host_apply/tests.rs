use common::pagination::Page;
use serde_json::{json, Value};

use super::*;
use crate::errors::ServiceError;
use crate::test_support::{service_fixture, BIZ_ID, TEMPLATE_A, TEMPLATE_B, TEMPLATE_UNBOUND};

fn rule(template: i64, attribute: i64, value: Value) -> CreateHostApplyRuleOption {
    CreateHostApplyRuleOption { service_template_id: template, attribute_id: attribute, property_value: value }
}

fn apply_option(templates: Vec<i64>, rules: Vec<CreateHostApplyRuleOption>) -> HostApplyServiceTemplateOption {
    HostApplyServiceTemplateOption {
        biz_id: BIZ_ID,
        service_template_ids: templates,
        additional_rules: rules,
        remove_rule_ids: vec![],
        host_ids: None,
        changed: true,
    }
}

fn partial(ids: Vec<i64>) -> GetServiceTemplateSyncStatusOption {
    GetServiceTemplateSyncStatusOption { is_partial: true, service_template_ids: ids, module_ids: vec![] }
}

#[tokio::test]
async fn only_diverging_hosts_are_updated_and_second_run_writes_nothing() {
    let fx = service_fixture();
    let opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("A"))]);

    let first = fx.service.exec_template_host_apply(&fx.kit, opt.clone()).await.unwrap();
    assert_eq!(first.phase, ApplyPhase::HostsConverged);
    assert_eq!(first.target_hosts, 3);
    assert_eq!(first.matched_hosts, 2);
    assert_eq!(first.updated_hosts, 2);
    assert_eq!(fx.store.update_calls(), 1);
    for id in [1, 2, 3] {
        assert_eq!(fx.store.host(id).unwrap().attributes["cpu_module"], json!("A"));
    }
    assert!(fx.store.host(4).unwrap().attributes.get("cpu_module").is_none());

    let second = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    assert_eq!(second.phase, ApplyPhase::HostsConverged);
    assert_eq!(second.updated_hosts, 0);
    assert_eq!(fx.store.update_calls(), 1);
    assert_eq!(fx.store.rules().len(), 1);
}

#[tokio::test]
async fn host_filter_restricts_apply() {
    let fx = service_fixture();
    let mut opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 3, json!(4))]);
    opt.host_ids = Some(vec![3]);
    let report = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    assert_eq!(report.target_hosts, 1);
    assert_eq!(report.updated_hosts, 1);
    assert_eq!(fx.store.host(3).unwrap().attributes["rack"], json!(4));
    assert!(fx.store.host(1).unwrap().attributes.get("rack").is_none());
}

#[tokio::test]
async fn empty_rule_list_skips_host_apply_even_when_changed() {
    let fx = service_fixture();
    let seeded = fx
        .service
        .exec_template_host_apply(&fx.kit, apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("B"))]))
        .await
        .unwrap();
    assert_eq!(seeded.updated_hosts, 3);
    let calls = fx.store.update_calls();

    let rule_id = fx.store.rules()[0].id;
    let mut opt = apply_option(vec![TEMPLATE_A], vec![]);
    opt.remove_rule_ids = vec![rule_id];
    let report = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    assert_eq!(report.phase, ApplyPhase::RulesCommitted);
    assert_eq!(report.removed_rules, 1);
    assert_eq!(fx.store.update_calls(), calls);
    assert!(fx.store.rules().is_empty());
}

#[tokio::test]
async fn unchanged_request_saves_rules_without_touching_hosts() {
    let fx = service_fixture();
    let mut opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("Z"))]);
    opt.changed = false;
    let report = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    assert_eq!(report.phase, ApplyPhase::RulesCommitted);
    assert_eq!(report.saved_rules, 1);
    assert_eq!(fx.store.update_calls(), 0);
    assert_eq!(fx.store.count_calls(), 0);
}

#[tokio::test]
async fn host_failure_leaves_rules_committed_and_hosts_pending() {
    let fx = service_fixture();
    fx.store.set_fail_host_updates(true);
    let opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("A"))]);

    let err = fx.service.exec_template_host_apply(&fx.kit, opt.clone()).await.unwrap_err();
    assert!(matches!(&err, ServiceError::Dependency(msg) if msg.contains("host apply pending")));
    assert_eq!(fx.store.rules().len(), 1);

    let status = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![TEMPLATE_A])).await.unwrap();
    assert_eq!(status.service_templates[0].state, SyncState::NeedsSync);

    fx.store.set_fail_host_updates(false);
    let committed = fx.service.commit_rules(&fx.kit, &opt).await.unwrap();
    let report = fx.service.converge_hosts(&fx.kit, committed).await.unwrap();
    assert_eq!(report.phase, ApplyPhase::HostsConverged);
    let status = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![TEMPLATE_A])).await.unwrap();
    assert_eq!(status.service_templates[0].state, SyncState::InSync);
}

#[tokio::test]
async fn failure_inside_unit_of_work_discards_every_rule_write() {
    let fx = service_fixture();
    fx.store.set_fail_rule_deletes(true);
    fx.store.add_template(4, BIZ_ID, "tpl-off", false);
    fx.store.add_module(41, BIZ_ID, 4);
    let mut opt = apply_option(vec![4], vec![rule(4, 1, json!("A"))]);
    opt.remove_rule_ids = vec![999];

    let err = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap_err();
    assert!(matches!(err, ServiceError::Dependency(_)));
    assert!(fx.store.rules().is_empty());
    assert!(!fx.store.template(4).unwrap().host_apply_enabled);
}

#[tokio::test]
async fn template_without_modules_is_not_found_before_any_write() {
    let fx = service_fixture();
    let opt = apply_option(vec![TEMPLATE_UNBOUND], vec![rule(TEMPLATE_UNBOUND, 1, json!("A"))]);
    let err = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(fx.store.rules().is_empty());
}

#[tokio::test]
async fn unknown_attribute_is_rejected() {
    let fx = service_fixture();
    let opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 77, json!("A"))]);
    let err = fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap_err();
    assert!(err.is_validation());
    assert!(fx.store.rules().is_empty());
}

#[tokio::test]
async fn disable_with_clear_rules_reports_in_sync() {
    let fx = service_fixture();
    let mut opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("Q")), rule(TEMPLATE_A, 3, json!(9))]);
    opt.changed = false;
    fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    let status = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![TEMPLATE_A])).await.unwrap();
    assert_eq!(status.service_templates[0].state, SyncState::NeedsSync);

    fx.service
        .set_template_host_apply_enabled(
            &fx.kit,
            BIZ_ID,
            UpdateHostApplyEnableStatusOption { service_template_ids: vec![TEMPLATE_A], enabled: false, clear_rules: true },
        )
        .await
        .unwrap();
    assert!(fx.store.rules().is_empty());
    assert!(!fx.store.template(TEMPLATE_A).unwrap().host_apply_enabled);

    let status = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![TEMPLATE_A])).await.unwrap();
    assert_eq!(status.service_templates[0].state, SyncState::InSync);
    assert_eq!(status.service_templates[0].detail, SyncDetail::default());
}

#[tokio::test]
async fn disable_without_clear_keeps_rules() {
    let fx = service_fixture();
    let mut opt = apply_option(vec![TEMPLATE_A], vec![rule(TEMPLATE_A, 1, json!("Q"))]);
    opt.changed = false;
    fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    fx.service
        .set_template_host_apply_enabled(
            &fx.kit,
            BIZ_ID,
            UpdateHostApplyEnableStatusOption { service_template_ids: vec![TEMPLATE_A], enabled: false, clear_rules: false },
        )
        .await
        .unwrap();
    assert_eq!(fx.store.rules().len(), 1);
    let status = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![TEMPLATE_A])).await.unwrap();
    assert_eq!(status.service_templates[0].state, SyncState::InSync);
}

#[tokio::test]
async fn delete_never_crosses_template_set() {
    let fx = service_fixture();
    let mut opt = apply_option(
        vec![TEMPLATE_A, TEMPLATE_B],
        vec![rule(TEMPLATE_A, 1, json!("A")), rule(TEMPLATE_B, 1, json!("B"))],
    );
    opt.changed = false;
    fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();
    let ids: Vec<i64> = fx.store.rules().iter().map(|r| r.id).collect();

    let removed = fx
        .service
        .delete_host_apply_rules(
            &fx.kit,
            BIZ_ID,
            DeleteHostApplyRuleOption { rule_ids: ids, service_template_ids: vec![TEMPLATE_B] },
        )
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let left = fx.store.rules();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].service_template_id, TEMPLATE_A);
}

#[tokio::test]
async fn sync_status_caps_id_sets() {
    let fx = service_fixture();
    let err = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial((1..=101).collect())).await.unwrap_err();
    assert!(matches!(err, ServiceError::LimitExceeded(_)));
    let err = fx.service.get_sync_status(&fx.kit, BIZ_ID, partial(vec![])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    let full = GetServiceTemplateSyncStatusOption { is_partial: false, service_template_ids: vec![], module_ids: vec![] };
    let err = fx.service.get_sync_status(&fx.kit, BIZ_ID, full).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn created_template_starts_disabled_and_names_are_unique() {
    let fx = service_fixture();
    let input = CreateServiceTemplateOption { biz_id: BIZ_ID, name: " web ".into(), service_category_id: 5 };
    let created = fx.service.create_template(&fx.kit, input.clone()).await.unwrap();
    assert!(created.id > TEMPLATE_UNBOUND);
    assert_eq!(created.name, "web");
    assert!(!created.host_apply_enabled);
    assert_eq!(created.creator, "tester");

    let err = fx.service.create_template(&fx.kit, input).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn rule_listing_and_count_info() {
    let fx = service_fixture();
    let mut opt = apply_option(
        vec![TEMPLATE_A, TEMPLATE_B],
        vec![rule(TEMPLATE_A, 1, json!("A")), rule(TEMPLATE_A, 2, json!("linux")), rule(TEMPLATE_B, 3, json!(1))],
    );
    opt.changed = false;
    fx.service.exec_template_host_apply(&fx.kit, opt).await.unwrap();

    let page = fx
        .service
        .list_host_apply_rules(
            &fx.kit,
            BIZ_ID,
            ListHostApplyRuleOption { service_template_ids: vec![TEMPLATE_A], page: Page::new(0, 1) },
        )
        .await
        .unwrap();
    assert_eq!(page.count, 2);
    assert_eq!(page.info.len(), 1);
    assert_eq!(page.info[0].attribute_id, 1);

    let err = fx
        .service
        .list_host_apply_rules(
            &fx.kit,
            BIZ_ID,
            ListHostApplyRuleOption { service_template_ids: vec![TEMPLATE_A], page: Page::new(0, 5_000) },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LimitExceeded(_)));

    let counts = fx
        .service
        .find_template_count_info(&fx.kit, BIZ_ID, vec![TEMPLATE_B, TEMPLATE_A, TEMPLATE_UNBOUND])
        .await
        .unwrap();
    let got: Vec<(i64, u64, u64)> =
        counts.iter().map(|c| (c.service_template_id, c.module_count, c.host_apply_rule_count)).collect();
    assert_eq!(got, vec![(TEMPLATE_B, 1, 1), (TEMPLATE_A, 2, 2), (TEMPLATE_UNBOUND, 0, 0)]);
}
