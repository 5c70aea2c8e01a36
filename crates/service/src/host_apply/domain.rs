use std::collections::BTreeSet;

use common::pagination::Page;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ServiceError;
use crate::predicate::{Document, Field};

/// `Module::service_template_id` for modules without a template.
pub const SERVICE_TEMPLATE_ID_NOT_SET: i64 = models::module::SERVICE_TEMPLATE_ID_NOT_SET;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    pub service_category_id: i64,
    pub host_apply_enabled: bool,
    pub creator: String,
    pub modifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostApplyRule {
    pub id: i64,
    pub biz_id: i64,
    pub service_template_id: i64,
    pub attribute_id: i64,
    pub property_value: Value,
    pub creator: String,
    pub modifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    pub service_template_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModuleRelation {
    pub host_id: i64,
    pub module_id: i64,
    pub biz_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAttribute {
    pub id: i64,
    pub biz_id: i64,
    pub property_id: String,
    pub property_name: String,
    pub property_type: String,
}

impl Document for ServiceTemplate {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id | Field::ServiceTemplateId => Some(self.id.into()),
            Field::BizId => Some(self.biz_id.into()),
            Field::HostApplyEnabled => Some(self.host_apply_enabled.into()),
            _ => None,
        }
    }
}

impl Document for HostApplyRule {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id => Some(self.id.into()),
            Field::BizId => Some(self.biz_id.into()),
            Field::ServiceTemplateId => Some(self.service_template_id.into()),
            Field::AttributeId => Some(self.attribute_id.into()),
            _ => None,
        }
    }
}

impl Document for Module {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id | Field::ModuleId => Some(self.id.into()),
            Field::BizId => Some(self.biz_id.into()),
            Field::ServiceTemplateId => Some(self.service_template_id.into()),
            _ => None,
        }
    }
}

impl Document for Host {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id | Field::HostId => Some(self.id.into()),
            Field::Property(p) => self.attributes.get(p).cloned(),
            _ => None,
        }
    }
}

impl Document for HostModuleRelation {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::HostId => Some(self.host_id.into()),
            Field::ModuleId => Some(self.module_id.into()),
            Field::BizId => Some(self.biz_id.into()),
            _ => None,
        }
    }
}

impl Document for HostAttribute {
    fn field(&self, field: &Field) -> Option<Value> {
        match field {
            Field::Id | Field::AttributeId => Some(self.id.into()),
            Field::BizId => Some(self.biz_id.into()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceTemplateOption {
    /// Filled from the route when the body leaves it out.
    #[serde(default)]
    pub biz_id: i64,
    pub name: String,
    #[serde(default)]
    pub service_category_id: i64,
}

/// One rule as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateHostApplyRuleOption {
    pub service_template_id: i64,
    pub attribute_id: i64,
    pub property_value: Value,
}

/// Rule save plus host apply over a set of templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostApplyServiceTemplateOption {
    #[serde(default)]
    pub biz_id: i64,
    pub service_template_ids: Vec<i64>,
    #[serde(default)]
    pub additional_rules: Vec<CreateHostApplyRuleOption>,
    #[serde(default)]
    pub remove_rule_ids: Vec<i64>,
    /// Restricts the host apply to these hosts (invalid-host retries).
    #[serde(default)]
    pub host_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub changed: bool,
}

impl HostApplyServiceTemplateOption {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.biz_id <= 0 {
            return Err(ServiceError::Validation("biz_id must be positive".into()));
        }
        if self.service_template_ids.is_empty() {
            return Err(ServiceError::Validation("service_template_ids must be set".into()));
        }
        let templates: BTreeSet<i64> = self.service_template_ids.iter().copied().collect();
        if let Some(rule) = self
            .additional_rules
            .iter()
            .find(|r| !templates.contains(&r.service_template_id))
        {
            return Err(ServiceError::Validation(format!(
                "rule for attribute {} targets service template {} outside service_template_ids",
                rule.attribute_id, rule.service_template_id
            )));
        }
        if self.additional_rules.iter().any(|r| r.attribute_id <= 0) {
            return Err(ServiceError::Validation("attribute_id must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHostApplyEnableStatusOption {
    pub service_template_ids: Vec<i64>,
    pub enabled: bool,
    #[serde(default)]
    pub clear_rules: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteHostApplyRuleOption {
    pub rule_ids: Vec<i64>,
    pub service_template_ids: Vec<i64>,
}

impl DeleteHostApplyRuleOption {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.rule_ids.is_empty() {
            return Err(ServiceError::Validation("rule_ids must be set".into()));
        }
        if self.service_template_ids.is_empty() {
            return Err(ServiceError::Validation("service_template_ids must be set".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListHostApplyRuleOption {
    pub service_template_ids: Vec<i64>,
    #[serde(default)]
    pub page: Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetServiceTemplateSyncStatusOption {
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub service_template_ids: Vec<i64>,
    #[serde(default)]
    pub module_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    InSync,
    NeedsSync,
}

/// Why an entity needs sync: diverging properties and affected host count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDetail {
    pub mismatched_properties: Vec<String>,
    pub mismatched_host_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSyncStatus {
    pub service_template_id: i64,
    pub state: SyncState,
    pub detail: SyncDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSyncStatus {
    pub module_id: i64,
    pub service_template_id: i64,
    pub state: SyncState,
    pub detail: SyncDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplateSyncStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_templates: Vec<TemplateSyncStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleSyncStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCountInfo {
    pub service_template_id: i64,
    pub module_count: u64,
    pub host_apply_rule_count: u64,
}

/// Where a host apply request stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    /// Rules are saved; hosts were intentionally left untouched.
    RulesCommitted,
    /// Rules are saved and every target host carries the rule values.
    HostsConverged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostApplyReport {
    pub phase: ApplyPhase,
    pub saved_rules: usize,
    pub removed_rules: u64,
    pub target_hosts: usize,
    pub matched_hosts: u64,
    pub updated_hosts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(rules: Vec<CreateHostApplyRuleOption>) -> HostApplyServiceTemplateOption {
        HostApplyServiceTemplateOption {
            biz_id: 2,
            service_template_ids: vec![10, 11],
            additional_rules: rules,
            remove_rule_ids: vec![],
            host_ids: None,
            changed: true,
        }
    }

    #[test]
    fn rule_outside_template_set_is_rejected() {
        let opt = option(vec![CreateHostApplyRuleOption {
            service_template_id: 99,
            attribute_id: 1,
            property_value: json!("A"),
        }]);
        assert!(matches!(opt.validate(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn option_defaults_from_json() {
        let opt: HostApplyServiceTemplateOption =
            serde_json::from_value(json!({"biz_id": 2, "service_template_ids": [10]})).unwrap();
        assert!(opt.additional_rules.is_empty());
        assert!(opt.host_ids.is_none());
        assert!(!opt.changed);
        assert!(opt.validate().is_ok());
    }

    #[test]
    fn delete_option_requires_rule_ids() {
        let opt = DeleteHostApplyRuleOption { rule_ids: vec![], service_template_ids: vec![1] };
        assert!(opt.validate().is_err());
    }
}
