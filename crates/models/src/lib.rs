pub mod errors;
pub mod db;
pub mod service_template;
pub mod host_apply_rule;
pub mod module;
pub mod host;
pub mod host_module_relation;
pub mod host_attribute;
