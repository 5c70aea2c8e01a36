//! InSync / NeedsSync verdicts for templates (partial mode) and modules (full mode).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use super::diff::{attribute_mismatch_filters, build_document, load_schema, mismatch_predicate, shard_hosts};
use super::domain::{
    HostApplyRule, ModuleSyncStatus, ServiceTemplate, SyncDetail, SyncState, TemplateSyncStatus,
    SERVICE_TEMPLATE_ID_NOT_SET,
};
use super::membership::MembershipResolver;
use super::repository::{Collection, HostApplyStore};
use super::rule_store::RuleStore;
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::{Field, Predicate};

pub struct SyncStatusEvaluator<'a> {
    store: &'a dyn HostApplyStore,
    max_ids: usize,
    max_page_size: u64,
    shard_size: usize,
}

impl<'a> SyncStatusEvaluator<'a> {
    pub fn new(store: &'a dyn HostApplyStore, max_ids: usize, max_page_size: u64, shard_size: usize) -> Self {
        Self { store, max_ids, max_page_size, shard_size }
    }

    /// One verdict per requested template, in request order.
    pub async fn partial(
        &self,
        kit: &Kit,
        biz_id: i64,
        template_ids: &[i64],
    ) -> Result<Vec<TemplateSyncStatus>, ServiceError> {
        let ids = self.check_ids(biz_id, template_ids, "service_template_ids")?;
        let templates = self.templates(biz_id, &ids).await?;
        if let Some(missing) = ids.iter().find(|id| !templates.contains_key(id)) {
            return Err(ServiceError::NotFound(format!("service template {missing} not found in business {biz_id}")));
        }

        let resolver = MembershipResolver::new(self.store);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let template = &templates[&id];
            let (state, detail) = if !template.host_apply_enabled {
                (SyncState::InSync, SyncDetail::default())
            } else {
                let rules = self.rules(biz_id, id).await?;
                let module_ids: Vec<i64> = self
                    .store
                    .find_modules(&Predicate::and(vec![
                        Predicate::eq(Field::BizId, biz_id),
                        Predicate::eq(Field::ServiceTemplateId, id),
                    ]))
                    .await?
                    .into_iter()
                    .map(|m| m.id)
                    .collect();
                let hosts = resolver.hosts_for_modules(kit, biz_id, &module_ids, None).await?;
                self.verdict(kit, biz_id, &rules, &hosts).await?
            };
            out.push(TemplateSyncStatus { service_template_id: id, state, detail });
        }
        Ok(out)
    }

    /// One verdict per requested module bound to a template; others are omitted.
    pub async fn full(&self, kit: &Kit, biz_id: i64, module_ids: &[i64]) -> Result<Vec<ModuleSyncStatus>, ServiceError> {
        let ids = self.check_ids(biz_id, module_ids, "module_ids")?;
        let modules = self
            .store
            .find_modules(&Predicate::and(vec![
                Predicate::eq(Field::BizId, biz_id),
                Predicate::is_in(Field::Id, ids.iter().copied()),
                Predicate::ne(Field::ServiceTemplateId, SERVICE_TEMPLATE_ID_NOT_SET),
            ]))
            .await?;
        let by_id: BTreeMap<i64, i64> = modules.iter().map(|m| (m.id, m.service_template_id)).collect();
        let template_ids: Vec<i64> = by_id.values().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let templates = if template_ids.is_empty() { BTreeMap::new() } else { self.templates(biz_id, &template_ids).await? };
        let hosts = MembershipResolver::new(self.store)
            .hosts_by_module(biz_id, &by_id.keys().copied().collect::<Vec<_>>())
            .await?;

        let mut rules_cache: BTreeMap<i64, Vec<HostApplyRule>> = BTreeMap::new();
        let mut out = Vec::with_capacity(by_id.len());
        for id in ids {
            let Some(&template_id) = by_id.get(&id) else {
                debug!(rid = %kit.rid, module_id = id, "host_apply_module_skipped");
                continue;
            };
            let enabled = templates.get(&template_id).map_or(false, |t| t.host_apply_enabled);
            let (state, detail) = if !enabled {
                (SyncState::InSync, SyncDetail::default())
            } else {
                if !rules_cache.contains_key(&template_id) {
                    let rules = self.rules(biz_id, template_id).await?;
                    rules_cache.insert(template_id, rules);
                }
                let rules = rules_cache.get(&template_id).map(Vec::as_slice).unwrap_or_default();
                let module_hosts = hosts.get(&id).cloned().unwrap_or_default();
                self.verdict(kit, biz_id, rules, &module_hosts).await?
            };
            out.push(ModuleSyncStatus { module_id: id, service_template_id: template_id, state, detail });
        }
        Ok(out)
    }

    fn check_ids(&self, biz_id: i64, ids: &[i64], name: &str) -> Result<Vec<i64>, ServiceError> {
        if biz_id <= 0 {
            return Err(ServiceError::Validation("biz_id must be positive".into()));
        }
        if ids.is_empty() {
            return Err(ServiceError::Validation(format!("{name} must be set")));
        }
        if ids.len() > self.max_ids {
            return Err(ServiceError::LimitExceeded(format!(
                "{name} holds {} ids, at most {} allowed",
                ids.len(),
                self.max_ids
            )));
        }
        let mut seen = BTreeSet::new();
        Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
    }

    async fn templates(&self, biz_id: i64, ids: &[i64]) -> Result<BTreeMap<i64, ServiceTemplate>, ServiceError> {
        let found = self
            .store
            .find_templates(&Predicate::and(vec![
                Predicate::eq(Field::BizId, biz_id),
                Predicate::is_in(Field::Id, ids.iter().copied()),
            ]))
            .await?;
        Ok(found.into_iter().map(|t| (t.id, t)).collect())
    }

    async fn rules(&self, biz_id: i64, template_id: i64) -> Result<Vec<HostApplyRule>, ServiceError> {
        RuleStore::new(self.store, self.max_page_size).all(biz_id, &[template_id]).await
    }

    async fn verdict(
        &self,
        kit: &Kit,
        biz_id: i64,
        rules: &[HostApplyRule],
        hosts: &BTreeSet<i64>,
    ) -> Result<(SyncState, SyncDetail), ServiceError> {
        if rules.is_empty() || hosts.is_empty() {
            return Ok((SyncState::InSync, SyncDetail::default()));
        }
        let schema = load_schema(self.store, biz_id, rules.iter().map(|r| r.attribute_id)).await?;
        let resolvable: Vec<(i64, Value)> = rules
            .iter()
            .filter(|r| {
                let known = schema.contains_key(&r.attribute_id);
                if !known {
                    warn!(rid = %kit.rid, rule_id = r.id, attribute_id = r.attribute_id, "host_apply_rule_attribute_missing");
                }
                known
            })
            .map(|r| (r.attribute_id, r.property_value.clone()))
            .collect();
        if resolvable.is_empty() {
            return Ok((SyncState::InSync, SyncDetail::default()));
        }
        let document = build_document(&resolvable, &schema)?;
        let properties: Vec<String> = document.iter().map(|(property, _)| property.clone()).collect();

        // per shard: the any-property filter, then one filter per property
        let width = properties.len() + 1;
        let mut filters = Vec::new();
        for shard in shard_hosts(hosts, self.shard_size) {
            filters.push(mismatch_predicate(&document, &shard));
            filters.extend(attribute_mismatch_filters(&document, &shard).into_iter().map(|(_, f)| f));
        }
        let counts = self.store.count(Collection::Host, &filters).await?;
        let mut totals = vec![0u64; width];
        for shard_counts in counts.chunks(width) {
            for (total, n) in totals.iter_mut().zip(shard_counts) {
                *total += n;
            }
        }

        let mismatched_host_count = totals[0];
        if mismatched_host_count == 0 {
            return Ok((SyncState::InSync, SyncDetail::default()));
        }
        let mismatched_properties = properties
            .into_iter()
            .zip(totals.iter().skip(1))
            .filter(|(_, count)| **count > 0)
            .map(|(property, _)| property)
            .collect();
        Ok((SyncState::NeedsSync, SyncDetail { mismatched_properties, mismatched_host_count }))
    }
}
