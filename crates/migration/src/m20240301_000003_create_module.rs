use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // service_template_id = 0 means "not bound", so no foreign key here
        manager
            .create_table(
                Table::create()
                    .table(Module::Table)
                    .if_not_exists()
                    .col(big_integer(Module::Id).auto_increment().primary_key())
                    .col(big_integer(Module::BizId).not_null())
                    .col(string_len(Module::Name, 256).not_null())
                    .col(big_integer(Module::ServiceTemplateId).not_null().default(0))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Module::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Module {
    Table,
    Id,
    BizId,
    Name,
    ServiceTemplateId,
}
