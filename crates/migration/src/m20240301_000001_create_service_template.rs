use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceTemplate::Table)
                    .if_not_exists()
                    .col(big_integer(ServiceTemplate::Id).auto_increment().primary_key())
                    .col(big_integer(ServiceTemplate::BizId).not_null())
                    .col(string_len(ServiceTemplate::Name, 256).not_null())
                    .col(big_integer(ServiceTemplate::ServiceCategoryId).not_null())
                    .col(boolean(ServiceTemplate::HostApplyEnabled).not_null().default(false))
                    .col(string_len(ServiceTemplate::Creator, 64).not_null())
                    .col(string_len(ServiceTemplate::Modifier, 64).not_null())
                    .col(timestamp_with_time_zone(ServiceTemplate::CreateTime).not_null())
                    .col(timestamp_with_time_zone(ServiceTemplate::LastTime).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ServiceTemplate::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum ServiceTemplate {
    Table,
    Id,
    BizId,
    Name,
    ServiceCategoryId,
    HostApplyEnabled,
    Creator,
    Modifier,
    CreateTime,
    LastTime,
}
