use async_trait::async_trait;
use common::pagination::{Page, PageResult};

use super::diff::MergeDocument;
use super::domain::{
    CreateHostApplyRuleOption, CreateServiceTemplateOption, HostApplyRule, HostAttribute, HostModuleRelation, Module,
    ServiceTemplate,
};
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::Predicate;

/// Collections that accept count-by-filter requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    ServiceTemplate,
    HostApplyRule,
    Module,
    Host,
    HostModuleRelation,
}

/// Persistence seam of the host apply engine.
///
/// Every failure of an implementation surfaces as `ServiceError::Dependency`,
/// except predicate fields the backend cannot address (`Validation`).
#[async_trait]
pub trait HostApplyStore: Send + Sync {
    /// Open a unit of work; dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>, ServiceError>;

    async fn find_templates(&self, filter: &Predicate) -> Result<Vec<ServiceTemplate>, ServiceError>;
    async fn find_modules(&self, filter: &Predicate) -> Result<Vec<Module>, ServiceError>;

    /// Attribute schema reader for the host object.
    async fn host_attributes(&self, filter: &Predicate) -> Result<Vec<HostAttribute>, ServiceError>;

    /// Relations ordered by `(host_id, module_id)`. A store may return fewer
    /// rows than `page.limit`; `count` is always the full match count.
    async fn host_module_relations(
        &self,
        filter: &Predicate,
        page: Page,
    ) -> Result<PageResult<HostModuleRelation>, ServiceError>;

    /// Rules ordered by ID.
    async fn list_rules(&self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError>;

    /// One count per filter, in submission order.
    async fn count(&self, collection: Collection, filters: &[Predicate]) -> Result<Vec<u64>, ServiceError>;

    /// Merge `document` into the attributes of every host matching `filter`.
    async fn update_hosts(&self, filter: &Predicate, document: &MergeDocument) -> Result<u64, ServiceError>;
}

/// Writes that must commit or roll back together.
#[async_trait]
pub trait RuleTransaction: Send {
    async fn create_template(
        &mut self,
        kit: &Kit,
        input: &CreateServiceTemplateOption,
    ) -> Result<ServiceTemplate, ServiceError>;

    async fn set_host_apply_enabled(&mut self, kit: &Kit, filter: &Predicate, enabled: bool) -> Result<u64, ServiceError>;

    /// Insert or overwrite by `(biz_id, service_template_id, attribute_id)`.
    /// Input keys are expected to be unique.
    async fn upsert_rules(
        &mut self,
        kit: &Kit,
        biz_id: i64,
        rules: &[CreateHostApplyRuleOption],
    ) -> Result<Vec<HostApplyRule>, ServiceError>;

    async fn delete_rules(&mut self, filter: &Predicate) -> Result<u64, ServiceError>;

    async fn list_rules(&mut self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}
