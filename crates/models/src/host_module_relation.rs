use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{host, module};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "host_module_relation")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub host_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub module_id: i64,
    pub biz_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { Host, Module }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::Host => Entity::belongs_to(host::Entity).from(Column::HostId).to(host::Column::Id).into(),
            Relation::Module => Entity::belongs_to(module::Entity).from(Column::ModuleId).to(module::Column::Id).into(),
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}
