use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Host::Table)
                    .if_not_exists()
                    .col(big_integer(Host::Id).auto_increment().primary_key())
                    .col(json_binary(Host::Attributes).not_null().default(Expr::cust("'{}'::jsonb")))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Host::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Host {
    Table,
    Id,
    Attributes,
}
