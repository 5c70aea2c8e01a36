use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `service_template_id` value for modules not bound to any template.
pub const SERVICE_TEMPLATE_ID_NOT_SET: i64 = 0;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "module")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    pub service_template_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
