//! Template → module → host resolution.

use std::collections::{BTreeMap, BTreeSet};

use common::pagination::Page;
use tracing::debug;

use super::domain::{HostModuleRelation, Module};
use super::repository::HostApplyStore;
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::{Field, Predicate};

pub struct MembershipResolver<'a> {
    store: &'a dyn HostApplyStore,
}

impl<'a> MembershipResolver<'a> {
    pub fn new(store: &'a dyn HostApplyStore) -> Self { Self { store } }

    /// Modules bound to any of `template_ids`; none at all is `NotFound`.
    pub async fn modules_for_templates(
        &self,
        kit: &Kit,
        biz_id: i64,
        template_ids: &[i64],
    ) -> Result<Vec<Module>, ServiceError> {
        let filter = Predicate::and(vec![
            Predicate::eq(Field::BizId, biz_id),
            Predicate::is_in(Field::ServiceTemplateId, template_ids.iter().copied()),
        ]);
        let modules = self.store.find_modules(&filter).await?;
        if modules.is_empty() {
            debug!(rid = %kit.rid, biz_id, ?template_ids, "host_apply_no_modules");
            return Err(ServiceError::NotFound(format!(
                "no module is bound to service templates {:?} in business {}",
                template_ids, biz_id
            )));
        }
        Ok(modules)
    }

    /// Distinct hosts of `module_ids`, intersected with `host_filter` when given.
    pub async fn hosts_for_modules(
        &self,
        kit: &Kit,
        biz_id: i64,
        module_ids: &[i64],
        host_filter: Option<&[i64]>,
    ) -> Result<BTreeSet<i64>, ServiceError> {
        let relations = self.relations(biz_id, module_ids, host_filter).await?;
        let hosts: BTreeSet<i64> = relations.iter().map(|r| r.host_id).collect();
        debug!(rid = %kit.rid, biz_id, modules = module_ids.len(), hosts = hosts.len(), "host_apply_hosts_resolved");
        Ok(hosts)
    }

    /// Distinct hosts grouped per module.
    pub async fn hosts_by_module(
        &self,
        biz_id: i64,
        module_ids: &[i64],
    ) -> Result<BTreeMap<i64, BTreeSet<i64>>, ServiceError> {
        let mut grouped: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for relation in self.relations(biz_id, module_ids, None).await? {
            grouped.entry(relation.module_id).or_default().insert(relation.host_id);
        }
        Ok(grouped)
    }

    async fn relations(
        &self,
        biz_id: i64,
        module_ids: &[i64],
        host_filter: Option<&[i64]>,
    ) -> Result<Vec<HostModuleRelation>, ServiceError> {
        if module_ids.is_empty() || matches!(host_filter, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }
        let mut parts = vec![
            Predicate::eq(Field::BizId, biz_id),
            Predicate::is_in(Field::ModuleId, module_ids.iter().copied()),
        ];
        if let Some(ids) = host_filter {
            parts.push(Predicate::is_in(Field::HostId, ids.iter().copied()));
        }
        let filter = Predicate::and(parts);

        // the store may cap an unlimited page, so keep reading until the count is covered
        let mut out = Vec::new();
        let mut start = 0u64;
        loop {
            let page = Page::new(start, Page::unlimited().limit);
            let result = self.store.host_module_relations(&filter, page).await?;
            let fetched = result.info.len() as u64;
            out.extend(result.info);
            start += fetched;
            if fetched == 0 || start >= result.count {
                break;
            }
        }
        Ok(out)
    }
}
