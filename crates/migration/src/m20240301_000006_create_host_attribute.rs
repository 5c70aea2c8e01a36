use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HostAttribute::Table)
                    .if_not_exists()
                    .col(big_integer(HostAttribute::Id).auto_increment().primary_key())
                    .col(big_integer(HostAttribute::BizId).not_null().default(0))
                    .col(string_len(HostAttribute::PropertyId, 128).not_null())
                    .col(string_len(HostAttribute::PropertyName, 128).not_null())
                    .col(string_len(HostAttribute::PropertyType, 32).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(HostAttribute::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum HostAttribute {
    Table,
    Id,
    BizId,
    PropertyId,
    PropertyName,
    PropertyType,
}
