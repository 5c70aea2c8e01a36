//! Host apply operations: rule mutation in one unit of work, host convergence after commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use common::pagination::{Page, PageResult};
use configs::HostApplyConfig;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::diff::compute_plan;
use super::domain::{
    ApplyPhase, CreateServiceTemplateOption, DeleteHostApplyRuleOption, GetServiceTemplateSyncStatusOption,
    HostApplyReport, HostApplyRule, HostApplyServiceTemplateOption, ListHostApplyRuleOption, ServiceTemplate,
    ServiceTemplateSyncStatus, TemplateCountInfo, UpdateHostApplyEnableStatusOption,
};
use super::executor::ApplyExecutor;
use super::membership::MembershipResolver;
use super::repository::{Collection, HostApplyStore, RuleTransaction};
use super::rule_store::{rule_filter, RuleStore};
use super::sync_status::SyncStatusEvaluator;
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::{Field, Predicate};
use crate::tasks::{TaskHandle, TaskQueue, SYNC_SERVICE_TEMPLATE_HOST_APPLY};

/// Rules are durable; hosts have not been touched yet.
///
/// Produced by [`HostApplyService::commit_rules`] and consumed by
/// [`HostApplyService::converge_hosts`].
#[derive(Debug, Clone)]
pub struct CommittedRules {
    pub biz_id: i64,
    pub service_template_ids: Vec<i64>,
    pub saved_rules: Vec<HostApplyRule>,
    pub removed_rules: u64,
    pub host_ids: BTreeSet<i64>,
    /// False when the request asked for no host apply, or carried no rules to apply.
    pub apply_hosts: bool,
}

pub struct HostApplyService {
    store: Arc<dyn HostApplyStore>,
    tasks: Arc<dyn TaskQueue>,
    cfg: HostApplyConfig,
}

impl HostApplyService {
    pub fn new(store: Arc<dyn HostApplyStore>, tasks: Arc<dyn TaskQueue>, cfg: HostApplyConfig) -> Self {
        Self { store, tasks, cfg }
    }

    fn rule_store(&self) -> RuleStore<'_> { RuleStore::new(self.store.as_ref(), self.cfg.max_page_size) }

    #[instrument(skip(self, kit, input), fields(rid = %kit.rid, biz_id = input.biz_id))]
    pub async fn create_template(
        &self,
        kit: &Kit,
        input: CreateServiceTemplateOption,
    ) -> Result<ServiceTemplate, ServiceError> {
        if input.biz_id <= 0 {
            return Err(ServiceError::Validation("biz_id must be positive".into()));
        }
        let mut txn = self.store.begin().await?;
        let template = txn.create_template(kit, &input).await?;
        txn.commit().await?;
        info!(template_id = template.id, name = %template.name, "service_template_created");
        Ok(template)
    }

    /// Save rules, then converge hosts of the bound modules.
    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid, biz_id = opt.biz_id))]
    pub async fn exec_template_host_apply(
        &self,
        kit: &Kit,
        opt: HostApplyServiceTemplateOption,
    ) -> Result<HostApplyReport, ServiceError> {
        let committed = self.commit_rules(kit, &opt).await?;
        self.converge_hosts(kit, committed).await
    }

    /// Phase one: enable host apply, upsert and delete rules in one unit of work.
    pub async fn commit_rules(
        &self,
        kit: &Kit,
        opt: &HostApplyServiceTemplateOption,
    ) -> Result<CommittedRules, ServiceError> {
        opt.validate()?;
        let biz_id = opt.biz_id;
        let template_ids = distinct(&opt.service_template_ids);

        let resolver = MembershipResolver::new(self.store.as_ref());
        let modules = resolver.modules_for_templates(kit, biz_id, &template_ids).await?;
        let module_ids: Vec<i64> = modules.iter().map(|m| m.id).collect();
        let host_ids = resolver.hosts_for_modules(kit, biz_id, &module_ids, opt.host_ids.as_deref()).await?;

        let rules = self.rule_store();
        let mut txn = self.store.begin().await?;
        let enabled = txn.set_host_apply_enabled(kit, &template_filter(biz_id, &template_ids), true).await?;
        if enabled < template_ids.len() as u64 {
            return Err(ServiceError::NotFound(format!(
                "only {enabled} of {} service templates exist in business {biz_id}",
                template_ids.len()
            )));
        }
        let saved_rules = rules.batch_upsert(kit, txn.as_mut(), biz_id, &opt.additional_rules).await?;
        let removed_rules = rules.delete(kit, txn.as_mut(), biz_id, &template_ids, &opt.remove_rule_ids).await?;
        txn.commit().await.map_err(|e| {
            error!(rid = %kit.rid, biz_id, error = %e, "host_apply_commit_failed");
            e
        })?;

        let apply_hosts = opt.changed && !opt.additional_rules.is_empty();
        info!(
            rid = %kit.rid,
            biz_id,
            saved = saved_rules.len(),
            removed = removed_rules,
            hosts = host_ids.len(),
            apply_hosts,
            "host_apply_rules_committed"
        );
        Ok(CommittedRules {
            biz_id,
            service_template_ids: template_ids,
            saved_rules,
            removed_rules,
            host_ids,
            apply_hosts,
        })
    }

    /// Phase two: write rule values to diverging hosts. Failures leave the rules in place.
    pub async fn converge_hosts(&self, kit: &Kit, committed: CommittedRules) -> Result<HostApplyReport, ServiceError> {
        let mut report = HostApplyReport {
            phase: ApplyPhase::RulesCommitted,
            saved_rules: committed.saved_rules.len(),
            removed_rules: committed.removed_rules,
            target_hosts: committed.host_ids.len(),
            matched_hosts: 0,
            updated_hosts: 0,
        };
        if !committed.apply_hosts {
            return Ok(report);
        }
        let rules: Vec<(i64, Value)> = committed
            .saved_rules
            .iter()
            .map(|r| (r.attribute_id, r.property_value.clone()))
            .collect();
        let outcome = async {
            let plan = compute_plan(
                self.store.as_ref(),
                kit,
                committed.biz_id,
                &rules,
                &committed.host_ids,
                self.cfg.host_shard_size,
            )
            .await?;
            ApplyExecutor::new(self.store.as_ref()).apply(kit, &plan).await
        }
        .await;
        match outcome {
            Ok(outcome) => {
                report.phase = ApplyPhase::HostsConverged;
                report.matched_hosts = outcome.matched_hosts;
                report.updated_hosts = outcome.updated_hosts;
                Ok(report)
            }
            Err(e) => {
                warn!(
                    rid = %kit.rid,
                    biz_id = committed.biz_id,
                    templates = ?committed.service_template_ids,
                    error = %e,
                    "host_apply_pending"
                );
                Err(ServiceError::Dependency(format!("rules committed, host apply pending: {e}")))
            }
        }
    }

    /// Queue a rule save plus host apply; the task runs `exec_template_host_apply`.
    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid, biz_id = opt.biz_id))]
    pub async fn update_template_host_apply_rules(
        &self,
        kit: &Kit,
        opt: HostApplyServiceTemplateOption,
    ) -> Result<TaskHandle, ServiceError> {
        opt.validate()?;
        let payload = serde_json::to_value(&opt)
            .map_err(|e| ServiceError::Validation(format!("encode host apply option: {e}")))?;
        self.tasks.create(kit, SYNC_SERVICE_TEMPLATE_HOST_APPLY, opt.biz_id, payload).await
    }

    /// Flip the flag; disabling with `clear_rules` also deletes every rule of the templates.
    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid))]
    pub async fn set_template_host_apply_enabled(
        &self,
        kit: &Kit,
        biz_id: i64,
        opt: UpdateHostApplyEnableStatusOption,
    ) -> Result<(), ServiceError> {
        if biz_id <= 0 {
            return Err(ServiceError::Validation("biz_id must be positive".into()));
        }
        if opt.service_template_ids.is_empty() {
            return Err(ServiceError::Validation("service_template_ids must be set".into()));
        }
        let template_ids = distinct(&opt.service_template_ids);
        let mut txn = self.store.begin().await?;
        txn.set_host_apply_enabled(kit, &template_filter(biz_id, &template_ids), opt.enabled).await?;
        if !opt.enabled && opt.clear_rules {
            let rule_ids = all_rule_ids(txn.as_mut(), biz_id, &template_ids).await?;
            let removed = self.rule_store().delete(kit, txn.as_mut(), biz_id, &template_ids, &rule_ids).await?;
            info!(removed, "host_apply_rules_cleared");
        }
        txn.commit().await?;
        info!(enabled = opt.enabled, templates = template_ids.len(), "host_apply_enable_status_updated");
        Ok(())
    }

    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid))]
    pub async fn delete_host_apply_rules(
        &self,
        kit: &Kit,
        biz_id: i64,
        opt: DeleteHostApplyRuleOption,
    ) -> Result<u64, ServiceError> {
        opt.validate()?;
        let mut txn = self.store.begin().await?;
        let removed = self
            .rule_store()
            .delete(kit, txn.as_mut(), biz_id, &opt.service_template_ids, &opt.rule_ids)
            .await?;
        txn.commit().await?;
        Ok(removed)
    }

    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid))]
    pub async fn get_sync_status(
        &self,
        kit: &Kit,
        biz_id: i64,
        opt: GetServiceTemplateSyncStatusOption,
    ) -> Result<ServiceTemplateSyncStatus, ServiceError> {
        let evaluator = SyncStatusEvaluator::new(
            self.store.as_ref(),
            self.cfg.max_sync_status_ids,
            self.cfg.max_page_size,
            self.cfg.host_shard_size,
        );
        if opt.is_partial {
            let service_templates = evaluator.partial(kit, biz_id, &opt.service_template_ids).await?;
            Ok(ServiceTemplateSyncStatus { service_templates, modules: Vec::new() })
        } else {
            let modules = evaluator.full(kit, biz_id, &opt.module_ids).await?;
            Ok(ServiceTemplateSyncStatus { service_templates: Vec::new(), modules })
        }
    }

    /// One page of rules, ordered by ID.
    #[instrument(skip(self, kit, opt), fields(rid = %kit.rid))]
    pub async fn list_host_apply_rules(
        &self,
        kit: &Kit,
        biz_id: i64,
        opt: ListHostApplyRuleOption,
    ) -> Result<PageResult<HostApplyRule>, ServiceError> {
        if opt.service_template_ids.is_empty() {
            return Err(ServiceError::Validation("service_template_ids must be set".into()));
        }
        self.rule_store().page(biz_id, &opt.service_template_ids, opt.page).await
    }

    /// Module and rule counts per template, in request order.
    #[instrument(skip(self, kit, template_ids), fields(rid = %kit.rid))]
    pub async fn find_template_count_info(
        &self,
        kit: &Kit,
        biz_id: i64,
        template_ids: Vec<i64>,
    ) -> Result<Vec<TemplateCountInfo>, ServiceError> {
        if template_ids.is_empty() {
            return Err(ServiceError::Validation("service_template_ids must be set".into()));
        }
        if template_ids.len() > self.cfg.max_sync_status_ids {
            return Err(ServiceError::LimitExceeded(format!(
                "service_template_ids holds {} ids, at most {} allowed",
                template_ids.len(),
                self.cfg.max_sync_status_ids
            )));
        }
        let filters: Vec<Predicate> = template_ids
            .iter()
            .map(|id| {
                Predicate::and(vec![Predicate::eq(Field::BizId, biz_id), Predicate::eq(Field::ServiceTemplateId, *id)])
            })
            .collect();
        let module_counts = self.store.count(Collection::Module, &filters).await?;
        let rule_counts = self.store.count(Collection::HostApplyRule, &filters).await?;
        if module_counts.len() != template_ids.len() || rule_counts.len() != template_ids.len() {
            return Err(ServiceError::Dependency("count result does not match the submitted filters".into()));
        }
        Ok(template_ids
            .iter()
            .zip(module_counts.into_iter().zip(rule_counts))
            .map(|(id, (module_count, host_apply_rule_count))| TemplateCountInfo {
                service_template_id: *id,
                module_count,
                host_apply_rule_count,
            })
            .collect())
    }
}

fn distinct(ids: &[i64]) -> Vec<i64> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn template_filter(biz_id: i64, template_ids: &[i64]) -> Predicate {
    Predicate::and(vec![
        Predicate::eq(Field::BizId, biz_id),
        Predicate::is_in(Field::Id, template_ids.iter().copied()),
    ])
}

/// Rule IDs visible inside the unit of work, read page by page.
async fn all_rule_ids(
    txn: &mut dyn RuleTransaction,
    biz_id: i64,
    template_ids: &[i64],
) -> Result<Vec<i64>, ServiceError> {
    let filter = rule_filter(biz_id, template_ids);
    let mut ids = Vec::new();
    let mut page = Page::unlimited();
    loop {
        let result = txn.list_rules(&filter, page).await?;
        let fetched = result.info.len() as u64;
        ids.extend(result.info.iter().map(|r| r.id));
        if fetched == 0 || page.start + fetched >= result.count {
            break;
        }
        page = Page::new(page.start + fetched, page.limit);
    }
    Ok(ids)
}
