//! Attribute rule store: batch upsert, scoped delete and paged listing.

use std::collections::BTreeSet;

use common::pagination::{Page, PageResult};
use tracing::{debug, warn};

use super::diff::load_schema;
use super::domain::{CreateHostApplyRuleOption, HostApplyRule};
use super::repository::{HostApplyStore, RuleTransaction};
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::{Field, Predicate};

pub struct RuleStore<'a> {
    store: &'a dyn HostApplyStore,
    max_page_size: u64,
}

impl<'a> RuleStore<'a> {
    pub fn new(store: &'a dyn HostApplyStore, max_page_size: u64) -> Self { Self { store, max_page_size } }

    /// Insert or overwrite rules keyed by `(service_template_id, attribute_id)`.
    ///
    /// Duplicate keys collapse to one rule carrying the later value, placed
    /// where the key first appeared.
    pub async fn batch_upsert(
        &self,
        kit: &Kit,
        txn: &mut dyn RuleTransaction,
        biz_id: i64,
        rules: &[CreateHostApplyRuleOption],
    ) -> Result<Vec<HostApplyRule>, ServiceError> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let normalized = dedupe_later_wins(rules);
        let schema = load_schema(self.store, biz_id, normalized.iter().map(|r| r.attribute_id)).await?;
        if let Some(unknown) = normalized.iter().find(|r| !schema.contains_key(&r.attribute_id)) {
            warn!(rid = %kit.rid, biz_id, attribute_id = unknown.attribute_id, "host_apply_unknown_attribute");
            return Err(ServiceError::Validation(format!(
                "host attribute {} does not exist in business {}",
                unknown.attribute_id, biz_id
            )));
        }
        let saved = txn.upsert_rules(kit, biz_id, &normalized).await?;
        debug!(rid = %kit.rid, biz_id, submitted = rules.len(), saved = saved.len(), "host_apply_rules_upserted");
        Ok(saved)
    }

    /// Delete rules by ID, restricted to the given templates.
    pub async fn delete(
        &self,
        kit: &Kit,
        txn: &mut dyn RuleTransaction,
        biz_id: i64,
        template_ids: &[i64],
        rule_ids: &[i64],
    ) -> Result<u64, ServiceError> {
        if rule_ids.is_empty() {
            return Ok(0);
        }
        let filter = Predicate::and(vec![
            Predicate::eq(Field::BizId, biz_id),
            Predicate::is_in(Field::ServiceTemplateId, template_ids.iter().copied()),
            Predicate::is_in(Field::Id, rule_ids.iter().copied()),
        ]);
        let removed = txn.delete_rules(&filter).await?;
        debug!(rid = %kit.rid, biz_id, requested = rule_ids.len(), removed, "host_apply_rules_deleted");
        Ok(removed)
    }

    /// Lazy listing starting at `page`; each fetch is one store round trip.
    pub fn list(&self, biz_id: i64, template_ids: &[i64], page: Page) -> Result<RulePages<'a>, ServiceError> {
        let page = page.validate(self.max_page_size)?;
        Ok(RulePages { store: self.store, filter: rule_filter(biz_id, template_ids), page, done: false })
    }

    /// One caller page, refilled across store round trips when the store caps page sizes.
    pub async fn page(
        &self,
        biz_id: i64,
        template_ids: &[i64],
        page: Page,
    ) -> Result<PageResult<HostApplyRule>, ServiceError> {
        let page = page.validate(self.max_page_size)?;
        let filter = rule_filter(biz_id, template_ids);
        let mut info = Vec::new();
        let mut count = 0;
        let mut start = page.start;
        while (info.len() as u64) < page.limit {
            let remaining = page.limit - info.len() as u64;
            let result = self.store.list_rules(&filter, Page::new(start, remaining)).await?;
            count = result.count;
            let fetched = result.info.len() as u64;
            info.extend(result.info);
            start += fetched;
            if fetched == 0 || start >= count {
                break;
            }
        }
        Ok(PageResult { count, info })
    }

    /// Every rule of the templates, in ID order.
    pub async fn all(&self, biz_id: i64, template_ids: &[i64]) -> Result<Vec<HostApplyRule>, ServiceError> {
        self.list(biz_id, template_ids, Page::new(0, self.max_page_size))?.collect_all().await
    }
}

/// Rules of `template_ids` in `biz_id`.
pub fn rule_filter(biz_id: i64, template_ids: &[i64]) -> Predicate {
    Predicate::and(vec![
        Predicate::eq(Field::BizId, biz_id),
        Predicate::is_in(Field::ServiceTemplateId, template_ids.iter().copied()),
    ])
}

/// Page-bounded cursor over a rule listing.
pub struct RulePages<'a> {
    store: &'a dyn HostApplyStore,
    filter: Predicate,
    page: Page,
    done: bool,
}

impl RulePages<'_> {
    pub async fn next_page(&mut self) -> Result<Option<PageResult<HostApplyRule>>, ServiceError> {
        if self.done {
            return Ok(None);
        }
        let result = self.store.list_rules(&self.filter, self.page).await?;
        let fetched = result.info.len() as u64;
        if fetched == 0 || self.page.start + fetched >= result.count {
            self.done = true;
        }
        self.page = Page::new(self.page.start + fetched, self.page.limit);
        if fetched == 0 {
            return Ok(None);
        }
        Ok(Some(result))
    }

    pub async fn collect_all(mut self) -> Result<Vec<HostApplyRule>, ServiceError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page.info);
        }
        Ok(all)
    }
}

fn dedupe_later_wins(rules: &[CreateHostApplyRuleOption]) -> Vec<CreateHostApplyRuleOption> {
    let mut out: Vec<CreateHostApplyRuleOption> = Vec::with_capacity(rules.len());
    let mut seen = BTreeSet::new();
    for rule in rules {
        let key = (rule.service_template_id, rule.attribute_id);
        if seen.insert(key) {
            out.push(rule.clone());
        } else if let Some(slot) = out
            .iter_mut()
            .find(|r| (r.service_template_id, r.attribute_id) == key)
        {
            slot.property_value = rule.property_value.clone();
        }
    }
    out
}
