//! Migrator registering entity-specific migrations in dependency order.
//! Indexes are applied last.
pub use sea_orm_migration::prelude::*;

mod m20240301_000001_create_service_template;
mod m20240301_000002_create_host_apply_rule;
mod m20240301_000003_create_module;
mod m20240301_000004_create_host;
mod m20240301_000005_create_host_module_relation;
mod m20240301_000006_create_host_attribute;
mod m20240301_000010_add_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_service_template::Migration),
            Box::new(m20240301_000002_create_host_apply_rule::Migration),
            Box::new(m20240301_000003_create_module::Migration),
            Box::new(m20240301_000004_create_host::Migration),
            Box::new(m20240301_000005_create_host_module_relation::Migration),
            Box::new(m20240301_000006_create_host_attribute::Migration),
            // Indexes should always be applied last
            Box::new(m20240301_000010_add_indexes::Migration),
        ]
    }
}
