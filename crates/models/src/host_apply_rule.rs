use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::service_template;

/// A `(template, attribute, value)` binding; unique on `(biz_id, service_template_id, attribute_id)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "host_apply_rule")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub biz_id: i64,
    pub service_template_id: i64,
    pub attribute_id: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub property_value: Json,
    pub creator: String,
    pub modifier: String,
    pub create_time: DateTimeWithTimeZone,
    pub last_time: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { ServiceTemplate }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::ServiceTemplate => Entity::belongs_to(service_template::Entity)
                .from(Column::ServiceTemplateId)
                .to(service_template::Column::Id)
                .into(),
        }
    }
}

impl Related<service_template::Entity> for Entity {
    fn to() -> RelationDef { Relation::ServiceTemplate.def() }
}

impl ActiveModelBehavior for ActiveModel {}
