use sea_orm::{entity::prelude::*, ConnectionTrait, Set, SqlErr};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{errors, host_apply_rule};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_template")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    pub service_category_id: i64,
    pub host_apply_enabled: bool,
    pub creator: String,
    pub modifier: String,
    pub create_time: DateTimeWithTimeZone,
    pub last_time: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { HostApplyRule }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::HostApplyRule => Entity::has_many(host_apply_rule::Entity).into(),
        }
    }
}

impl Related<host_apply_rule::Entity> for Entity {
    fn to() -> RelationDef { Relation::HostApplyRule.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub fn validate_name(name: &str) -> Result<(), errors::ModelError> {
    let trimmed = name.trim();
    if trimmed.is_empty() { return Err(errors::ModelError::Validation("name required".into())); }
    if trimmed.chars().count() > 256 { return Err(errors::ModelError::Validation("name too long (<=256)".into())); }
    Ok(())
}

/// Insert a template with host apply disabled; names are unique per business.
pub async fn create<C: ConnectionTrait>(
    db: &C,
    biz_id: i64,
    name: &str,
    service_category_id: i64,
    creator: &str,
) -> Result<Model, errors::ModelError> {
    validate_name(name)?;
    if biz_id <= 0 { return Err(errors::ModelError::Validation("biz_id must be positive".into())); }
    let name = name.trim();
    let taken = Entity::find()
        .filter(Column::BizId.eq(biz_id))
        .filter(Column::Name.eq(name))
        .count(db)
        .await
        .map_err(|e| errors::ModelError::Db(e.to_string()))?;
    if taken > 0 { return Err(duplicate_name(name)); }
    let now = Utc::now().into();
    let am = ActiveModel {
        id: Default::default(),
        biz_id: Set(biz_id),
        name: Set(name.to_string()),
        service_category_id: Set(service_category_id),
        host_apply_enabled: Set(false),
        creator: Set(creator.to_string()),
        modifier: Set(creator.to_string()),
        create_time: Set(now),
        last_time: Set(now),
    };
    am.insert(db).await.map_err(|e| match e.sql_err() {
        // a concurrent insert won the unique index
        Some(SqlErr::UniqueConstraintViolation(_)) => duplicate_name(name),
        _ => errors::ModelError::Db(e.to_string()),
    })
}

fn duplicate_name(name: &str) -> errors::ModelError {
    errors::ModelError::Validation(format!("service template name {name} already exists"))
}
