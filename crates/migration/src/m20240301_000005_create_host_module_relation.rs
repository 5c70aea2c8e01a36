use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HostModuleRelation::Table)
                    .if_not_exists()
                    .col(big_integer(HostModuleRelation::HostId).not_null())
                    .col(big_integer(HostModuleRelation::ModuleId).not_null())
                    .col(big_integer(HostModuleRelation::BizId).not_null())
                    .primary_key(
                        Index::create()
                            .col(HostModuleRelation::HostId)
                            .col(HostModuleRelation::ModuleId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relation_host")
                            .from(HostModuleRelation::Table, HostModuleRelation::HostId)
                            .to(Host::Table, Host::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relation_module")
                            .from(HostModuleRelation::Table, HostModuleRelation::ModuleId)
                            .to(Module::Table, Module::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(HostModuleRelation::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum HostModuleRelation {
    Table,
    HostId,
    ModuleId,
    BizId,
}

#[derive(DeriveIden)]
enum Host { Table, Id }

#[derive(DeriveIden)]
enum Module { Table, Id }
