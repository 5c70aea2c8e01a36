use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Attribute schema entry of the host object; `biz_id == 0` marks a global attribute.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "host_attribute")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub biz_id: i64,
    pub property_id: String,
    pub property_name: String,
    pub property_type: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub const GLOBAL_BIZ_ID: i64 = 0;
