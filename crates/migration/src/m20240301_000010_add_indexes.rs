use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // HostApplyRule: one rule per (biz, template, attribute); upserts conflict on it
        manager
            .create_index(
                Index::create()
                    .name("uniq_host_apply_rule_biz_template_attr")
                    .table(HostApplyRule::Table)
                    .col(HostApplyRule::BizId)
                    .col(HostApplyRule::ServiceTemplateId)
                    .col(HostApplyRule::AttributeId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ServiceTemplate: names are unique per business; also serves lookups by business
        manager
            .create_index(
                Index::create()
                    .name("uniq_service_template_biz_name")
                    .table(ServiceTemplate::Table)
                    .col(ServiceTemplate::BizId)
                    .col(ServiceTemplate::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Module: (biz_id, service_template_id)
        manager
            .create_index(
                Index::create()
                    .name("idx_module_biz_template")
                    .table(Module::Table)
                    .col(Module::BizId)
                    .col(Module::ServiceTemplateId)
                    .to_owned(),
            )
            .await?;

        // HostModuleRelation: (biz_id, module_id)
        manager
            .create_index(
                Index::create()
                    .name("idx_relation_biz_module")
                    .table(HostModuleRelation::Table)
                    .col(HostModuleRelation::BizId)
                    .col(HostModuleRelation::ModuleId)
                    .to_owned(),
            )
            .await?;

        // HostAttribute: property_id per business
        manager
            .create_index(
                Index::create()
                    .name("uniq_host_attribute_biz_property")
                    .table(HostAttribute::Table)
                    .col(HostAttribute::BizId)
                    .col(HostAttribute::PropertyId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_index(Index::drop().name("uniq_host_attribute_biz_property").table(HostAttribute::Table).to_owned()).await?;
        manager.drop_index(Index::drop().name("idx_relation_biz_module").table(HostModuleRelation::Table).to_owned()).await?;
        manager.drop_index(Index::drop().name("idx_module_biz_template").table(Module::Table).to_owned()).await?;
        manager.drop_index(Index::drop().name("uniq_service_template_biz_name").table(ServiceTemplate::Table).to_owned()).await?;
        manager.drop_index(Index::drop().name("uniq_host_apply_rule_biz_template_attr").table(HostApplyRule::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum HostApplyRule { Table, BizId, ServiceTemplateId, AttributeId }

#[derive(DeriveIden)]
enum ServiceTemplate { Table, BizId, Name }

#[derive(DeriveIden)]
enum Module { Table, BizId, ServiceTemplateId }

#[derive(DeriveIden)]
enum HostModuleRelation { Table, BizId, ModuleId }

#[derive(DeriveIden)]
enum HostAttribute { Table, BizId, PropertyId }
