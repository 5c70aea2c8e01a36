use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HostApplyRule::Table)
                    .if_not_exists()
                    .col(big_integer(HostApplyRule::Id).auto_increment().primary_key())
                    .col(big_integer(HostApplyRule::BizId).not_null())
                    .col(big_integer(HostApplyRule::ServiceTemplateId).not_null())
                    .col(big_integer(HostApplyRule::AttributeId).not_null())
                    .col(json_binary(HostApplyRule::PropertyValue).not_null())
                    .col(string_len(HostApplyRule::Creator, 64).not_null())
                    .col(string_len(HostApplyRule::Modifier, 64).not_null())
                    .col(timestamp_with_time_zone(HostApplyRule::CreateTime).not_null())
                    .col(timestamp_with_time_zone(HostApplyRule::LastTime).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_host_apply_rule_template")
                            .from(HostApplyRule::Table, HostApplyRule::ServiceTemplateId)
                            .to(ServiceTemplate::Table, ServiceTemplate::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(HostApplyRule::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum HostApplyRule {
    Table,
    Id,
    BizId,
    ServiceTemplateId,
    AttributeId,
    PropertyValue,
    Creator,
    Modifier,
    CreateTime,
    LastTime,
}

#[derive(DeriveIden)]
enum ServiceTemplate { Table, Id }
