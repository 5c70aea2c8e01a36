//! In-process store used by tests and by `backend = "memory"`.
//!
//! Units of work are serialized behind an owned async mutex. A transaction
//! works on a private copy of the template and rule tables and publishes it
//! on commit; dropping it discards the copy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::pagination::{Page, PageResult};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::ServiceError;
use crate::host_apply::diff::MergeDocument;
use crate::host_apply::domain::{
    CreateHostApplyRuleOption, CreateServiceTemplateOption, Host, HostApplyRule, HostAttribute, HostModuleRelation,
    Module, ServiceTemplate,
};
use crate::host_apply::repository::{Collection, HostApplyStore, RuleTransaction};
use crate::kit::Kit;
use crate::predicate::{Document, Predicate};

#[derive(Debug, Clone, Default)]
struct RuleTables {
    templates: BTreeMap<i64, ServiceTemplate>,
    rules: BTreeMap<i64, HostApplyRule>,
    next_template_id: i64,
    next_rule_id: i64,
}

#[derive(Debug, Default)]
struct Tables {
    rule_tables: RuleTables,
    modules: BTreeMap<i64, Module>,
    hosts: BTreeMap<i64, Host>,
    relations: BTreeMap<(i64, i64), HostModuleRelation>,
    attributes: BTreeMap<i64, HostAttribute>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_host_updates: AtomicBool,
    fail_rule_deletes: AtomicBool,
}

#[derive(Debug, Default)]
pub struct InMemoryHostApplyStore {
    data: Arc<RwLock<Tables>>,
    txn_lock: Arc<Mutex<()>>,
    faults: Arc<Faults>,
    page_cap: Option<u64>,
    update_calls: AtomicU64,
    count_calls: AtomicU64,
}

impl InMemoryHostApplyStore {
    pub fn new() -> Self { Self::default() }

    /// Store that returns at most `cap` rows per page, like a capped backend.
    pub fn with_page_cap(cap: u64) -> Self { Self { page_cap: Some(cap.max(1)), ..Self::default() } }

    fn read(&self) -> RwLockReadGuard<'_, Tables> { self.data.read().unwrap_or_else(|e| e.into_inner()) }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> { self.data.write().unwrap_or_else(|e| e.into_inner()) }

    fn cap(&self, page: Page) -> Page {
        match self.page_cap {
            Some(cap) => page.capped(cap),
            None => page,
        }
    }

    pub fn add_attribute(&self, id: i64, biz_id: i64, property_id: &str, property_type: &str) {
        self.write().attributes.insert(
            id,
            HostAttribute {
                id,
                biz_id,
                property_id: property_id.to_string(),
                property_name: property_id.to_string(),
                property_type: property_type.to_string(),
            },
        );
    }

    /// Seed a template with a fixed ID; later `create_template` calls allocate above it.
    pub fn add_template(&self, id: i64, biz_id: i64, name: &str, host_apply_enabled: bool) {
        let mut data = self.write();
        let tables = &mut data.rule_tables;
        tables.next_template_id = tables.next_template_id.max(id);
        tables.templates.insert(
            id,
            ServiceTemplate {
                id,
                biz_id,
                name: name.to_string(),
                service_category_id: 0,
                host_apply_enabled,
                creator: "seed".into(),
                modifier: "seed".into(),
            },
        );
    }

    pub fn add_module(&self, id: i64, biz_id: i64, service_template_id: i64) {
        self.write()
            .modules
            .insert(id, Module { id, biz_id, name: format!("module-{id}"), service_template_id });
    }

    pub fn add_host(&self, id: i64, attributes: Value) {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.write().hosts.insert(id, Host { id, attributes });
    }

    pub fn relate(&self, biz_id: i64, host_id: i64, module_id: i64) {
        self.write()
            .relations
            .insert((host_id, module_id), HostModuleRelation { host_id, module_id, biz_id });
    }

    pub fn set_host_attribute(&self, host_id: i64, property_id: &str, value: Value) {
        if let Some(host) = self.write().hosts.get_mut(&host_id) {
            host.attributes.insert(property_id.to_string(), value);
        }
    }

    pub fn host(&self, id: i64) -> Option<Host> { self.read().hosts.get(&id).cloned() }

    pub fn template(&self, id: i64) -> Option<ServiceTemplate> { self.read().rule_tables.templates.get(&id).cloned() }

    /// Committed rules in ID order.
    pub fn rules(&self) -> Vec<HostApplyRule> { self.read().rule_tables.rules.values().cloned().collect() }

    /// Number of `update_hosts` calls that reached the store.
    pub fn update_calls(&self) -> u64 { self.update_calls.load(Ordering::SeqCst) }

    pub fn count_calls(&self) -> u64 { self.count_calls.load(Ordering::SeqCst) }

    pub fn set_fail_host_updates(&self, fail: bool) { self.faults.fail_host_updates.store(fail, Ordering::SeqCst) }

    pub fn set_fail_rule_deletes(&self, fail: bool) { self.faults.fail_rule_deletes.store(fail, Ordering::SeqCst) }
}

fn select<T: Document + Clone>(rows: impl Iterator<Item = T>, filter: &Predicate) -> Vec<T> {
    rows.filter(|r| filter.matches(r)).collect()
}

fn paged<T>(rows: Vec<T>, page: Page) -> PageResult<T> {
    let count = rows.len() as u64;
    let info = rows
        .into_iter()
        .skip(usize::try_from(page.start).unwrap_or(usize::MAX))
        .take(usize::try_from(page.limit).unwrap_or(usize::MAX))
        .collect();
    PageResult { count, info }
}

#[async_trait]
impl HostApplyStore for InMemoryHostApplyStore {
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>, ServiceError> {
        let guard = self.txn_lock.clone().lock_owned().await;
        let staged = self.read().rule_tables.clone();
        Ok(Box::new(MemoryRuleTransaction {
            _guard: guard,
            data: self.data.clone(),
            faults: self.faults.clone(),
            staged,
        }))
    }

    async fn find_templates(&self, filter: &Predicate) -> Result<Vec<ServiceTemplate>, ServiceError> {
        Ok(select(self.read().rule_tables.templates.values().cloned(), filter))
    }

    async fn find_modules(&self, filter: &Predicate) -> Result<Vec<Module>, ServiceError> {
        Ok(select(self.read().modules.values().cloned(), filter))
    }

    async fn host_attributes(&self, filter: &Predicate) -> Result<Vec<HostAttribute>, ServiceError> {
        Ok(select(self.read().attributes.values().cloned(), filter))
    }

    async fn host_module_relations(
        &self,
        filter: &Predicate,
        page: Page,
    ) -> Result<PageResult<HostModuleRelation>, ServiceError> {
        let rows = select(self.read().relations.values().copied(), filter);
        Ok(paged(rows, self.cap(page)))
    }

    async fn list_rules(&self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError> {
        let rows = select(self.read().rule_tables.rules.values().cloned(), filter);
        Ok(paged(rows, self.cap(page)))
    }

    async fn count(&self, collection: Collection, filters: &[Predicate]) -> Result<Vec<u64>, ServiceError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let data = self.read();
        let counts = filters
            .iter()
            .map(|f| {
                let n = match collection {
                    Collection::ServiceTemplate => data.rule_tables.templates.values().filter(|r| f.matches(*r)).count(),
                    Collection::HostApplyRule => data.rule_tables.rules.values().filter(|r| f.matches(*r)).count(),
                    Collection::Module => data.modules.values().filter(|r| f.matches(*r)).count(),
                    Collection::Host => data.hosts.values().filter(|r| f.matches(*r)).count(),
                    Collection::HostModuleRelation => data.relations.values().filter(|r| f.matches(*r)).count(),
                };
                n as u64
            })
            .collect();
        Ok(counts)
    }

    async fn update_hosts(&self, filter: &Predicate, document: &MergeDocument) -> Result<u64, ServiceError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_host_updates.load(Ordering::SeqCst) {
            return Err(ServiceError::Dependency("host update rejected by store".into()));
        }
        let mut data = self.write();
        let mut updated = 0;
        for host in data.hosts.values_mut().filter(|h| filter.matches(&**h)) {
            for (property_id, value) in document.iter() {
                host.attributes.insert(property_id.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }
}

struct MemoryRuleTransaction {
    _guard: OwnedMutexGuard<()>,
    data: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
    staged: RuleTables,
}

#[async_trait]
impl RuleTransaction for MemoryRuleTransaction {
    async fn create_template(
        &mut self,
        kit: &Kit,
        input: &CreateServiceTemplateOption,
    ) -> Result<ServiceTemplate, ServiceError> {
        models::service_template::validate_name(&input.name)?;
        let name = input.name.trim();
        let duplicate = self
            .staged
            .templates
            .values()
            .any(|t| t.biz_id == input.biz_id && t.name == name);
        if duplicate {
            return Err(ServiceError::Validation(format!("service template name {name} already exists")));
        }
        self.staged.next_template_id += 1;
        let template = ServiceTemplate {
            id: self.staged.next_template_id,
            biz_id: input.biz_id,
            name: name.to_string(),
            service_category_id: input.service_category_id,
            host_apply_enabled: false,
            creator: kit.user.clone(),
            modifier: kit.user.clone(),
        };
        self.staged.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn set_host_apply_enabled(&mut self, kit: &Kit, filter: &Predicate, enabled: bool) -> Result<u64, ServiceError> {
        let mut n = 0;
        for template in self.staged.templates.values_mut().filter(|t| filter.matches(&**t)) {
            template.host_apply_enabled = enabled;
            template.modifier = kit.user.clone();
            n += 1;
        }
        Ok(n)
    }

    async fn upsert_rules(
        &mut self,
        kit: &Kit,
        biz_id: i64,
        rules: &[CreateHostApplyRuleOption],
    ) -> Result<Vec<HostApplyRule>, ServiceError> {
        let mut saved = Vec::with_capacity(rules.len());
        for input in rules {
            let existing = self.staged.rules.values_mut().find(|r| {
                r.biz_id == biz_id
                    && r.service_template_id == input.service_template_id
                    && r.attribute_id == input.attribute_id
            });
            let rule = match existing {
                Some(rule) => {
                    rule.property_value = input.property_value.clone();
                    rule.modifier = kit.user.clone();
                    rule.clone()
                }
                None => {
                    self.staged.next_rule_id += 1;
                    let rule = HostApplyRule {
                        id: self.staged.next_rule_id,
                        biz_id,
                        service_template_id: input.service_template_id,
                        attribute_id: input.attribute_id,
                        property_value: input.property_value.clone(),
                        creator: kit.user.clone(),
                        modifier: kit.user.clone(),
                    };
                    self.staged.rules.insert(rule.id, rule.clone());
                    rule
                }
            };
            saved.push(rule);
        }
        Ok(saved)
    }

    async fn delete_rules(&mut self, filter: &Predicate) -> Result<u64, ServiceError> {
        if self.faults.fail_rule_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::Dependency("rule delete rejected by store".into()));
        }
        let before = self.staged.rules.len();
        self.staged.rules.retain(|_, r| !filter.matches(r));
        Ok((before - self.staged.rules.len()) as u64)
    }

    async fn list_rules(&mut self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError> {
        Ok(paged(select(self.staged.rules.values().cloned(), filter), page))
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.rule_tables = self.staged;
        Ok(())
    }
}
