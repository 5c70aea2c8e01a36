use async_trait::async_trait;
use chrono::Utc;
use common::pagination::{Page, PageResult};
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::NotSet, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::{Map, Value};

use crate::errors::ServiceError;
use crate::host_apply::diff::MergeDocument;
use crate::host_apply::domain::{
    CreateHostApplyRuleOption, CreateServiceTemplateOption, HostApplyRule, HostAttribute, HostModuleRelation, Module,
    ServiceTemplate,
};
use crate::host_apply::repository::{Collection, HostApplyStore, RuleTransaction};
use crate::kit::Kit;
use crate::predicate::{jsonb_literal, Field, Predicate, SqlField};
use models::{host, host_apply_rule, host_attribute, host_module_relation, module, service_template};

/// PostgreSQL-backed store; host attributes live in a `jsonb` column.
pub struct SeaOrmHostApplyStore {
    pub db: DatabaseConnection,
    page_cap: u64,
}

impl SeaOrmHostApplyStore {
    pub fn new(db: DatabaseConnection, page_cap: u64) -> Self { Self { db, page_cap: page_cap.max(1) } }
}

pub struct SeaOrmRuleTransaction {
    txn: DatabaseTransaction,
}

fn db_err(e: DbErr) -> ServiceError { ServiceError::Dependency(format!("database: {e}")) }

fn template_field(f: &Field) -> Option<SqlField> {
    use service_template::Column;
    match f {
        Field::Id | Field::ServiceTemplateId => Some(SqlField::column(Column::Id)),
        Field::BizId => Some(SqlField::column(Column::BizId)),
        Field::HostApplyEnabled => Some(SqlField::column(Column::HostApplyEnabled)),
        _ => None,
    }
}

fn rule_field(f: &Field) -> Option<SqlField> {
    use host_apply_rule::Column;
    match f {
        Field::Id => Some(SqlField::column(Column::Id)),
        Field::BizId => Some(SqlField::column(Column::BizId)),
        Field::ServiceTemplateId => Some(SqlField::column(Column::ServiceTemplateId)),
        Field::AttributeId => Some(SqlField::column(Column::AttributeId)),
        _ => None,
    }
}

fn module_field(f: &Field) -> Option<SqlField> {
    use module::Column;
    match f {
        Field::Id | Field::ModuleId => Some(SqlField::column(Column::Id)),
        Field::BizId => Some(SqlField::column(Column::BizId)),
        Field::ServiceTemplateId => Some(SqlField::column(Column::ServiceTemplateId)),
        _ => None,
    }
}

fn host_field(f: &Field) -> Option<SqlField> {
    match f {
        Field::Id | Field::HostId => Some(SqlField::column(host::Column::Id)),
        Field::Property(key) => Some(SqlField::JsonKey { column: "attributes", key: key.clone() }),
        _ => None,
    }
}

fn relation_field(f: &Field) -> Option<SqlField> {
    use host_module_relation::Column;
    match f {
        Field::HostId => Some(SqlField::column(Column::HostId)),
        Field::ModuleId => Some(SqlField::column(Column::ModuleId)),
        Field::BizId => Some(SqlField::column(Column::BizId)),
        _ => None,
    }
}

fn attribute_field(f: &Field) -> Option<SqlField> {
    use host_attribute::Column;
    match f {
        Field::Id | Field::AttributeId => Some(SqlField::column(Column::Id)),
        Field::BizId => Some(SqlField::column(Column::BizId)),
        _ => None,
    }
}

impl From<service_template::Model> for ServiceTemplate {
    fn from(m: service_template::Model) -> Self {
        Self {
            id: m.id,
            biz_id: m.biz_id,
            name: m.name,
            service_category_id: m.service_category_id,
            host_apply_enabled: m.host_apply_enabled,
            creator: m.creator,
            modifier: m.modifier,
        }
    }
}

impl From<host_apply_rule::Model> for HostApplyRule {
    fn from(m: host_apply_rule::Model) -> Self {
        Self {
            id: m.id,
            biz_id: m.biz_id,
            service_template_id: m.service_template_id,
            attribute_id: m.attribute_id,
            property_value: m.property_value,
            creator: m.creator,
            modifier: m.modifier,
        }
    }
}

impl From<module::Model> for Module {
    fn from(m: module::Model) -> Self {
        Self { id: m.id, biz_id: m.biz_id, name: m.name, service_template_id: m.service_template_id }
    }
}

impl From<host_module_relation::Model> for HostModuleRelation {
    fn from(m: host_module_relation::Model) -> Self { Self { host_id: m.host_id, module_id: m.module_id, biz_id: m.biz_id } }
}

impl From<host_attribute::Model> for HostAttribute {
    fn from(m: host_attribute::Model) -> Self {
        Self {
            id: m.id,
            biz_id: m.biz_id,
            property_id: m.property_id,
            property_name: m.property_name,
            property_type: m.property_type,
        }
    }
}

impl From<host::Model> for crate::host_apply::domain::Host {
    fn from(m: host::Model) -> Self {
        let attributes = match m.attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { id: m.id, attributes }
    }
}

async fn list_rules_on<C: ConnectionTrait>(
    conn: &C,
    filter: &Predicate,
    page: Page,
) -> Result<PageResult<HostApplyRule>, ServiceError> {
    let cond = filter.to_condition(&rule_field)?;
    let query = host_apply_rule::Entity::find().filter(cond);
    let count = query.clone().count(conn).await.map_err(db_err)?;
    let rows = query
        .order_by_asc(host_apply_rule::Column::Id)
        .offset(page.start)
        .limit(page.limit)
        .all(conn)
        .await
        .map_err(db_err)?;
    Ok(PageResult { count, info: rows.into_iter().map(Into::into).collect() })
}

#[async_trait]
impl HostApplyStore for SeaOrmHostApplyStore {
    async fn begin(&self) -> Result<Box<dyn RuleTransaction>, ServiceError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        Ok(Box::new(SeaOrmRuleTransaction { txn }))
    }

    async fn find_templates(&self, filter: &Predicate) -> Result<Vec<ServiceTemplate>, ServiceError> {
        let rows = service_template::Entity::find()
            .filter(filter.to_condition(&template_field)?)
            .order_by_asc(service_template::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_modules(&self, filter: &Predicate) -> Result<Vec<Module>, ServiceError> {
        let rows = module::Entity::find()
            .filter(filter.to_condition(&module_field)?)
            .order_by_asc(module::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn host_attributes(&self, filter: &Predicate) -> Result<Vec<HostAttribute>, ServiceError> {
        let rows = host_attribute::Entity::find()
            .filter(filter.to_condition(&attribute_field)?)
            .order_by_asc(host_attribute::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn host_module_relations(
        &self,
        filter: &Predicate,
        page: Page,
    ) -> Result<PageResult<HostModuleRelation>, ServiceError> {
        let page = page.capped(self.page_cap);
        let query = host_module_relation::Entity::find().filter(filter.to_condition(&relation_field)?);
        let count = query.clone().count(&self.db).await.map_err(db_err)?;
        let rows = query
            .order_by_asc(host_module_relation::Column::HostId)
            .order_by_asc(host_module_relation::Column::ModuleId)
            .offset(page.start)
            .limit(page.limit)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(PageResult { count, info: rows.into_iter().map(Into::into).collect() })
    }

    async fn list_rules(&self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError> {
        list_rules_on(&self.db, filter, page.capped(self.page_cap)).await
    }

    async fn count(&self, collection: Collection, filters: &[Predicate]) -> Result<Vec<u64>, ServiceError> {
        let mut counts = Vec::with_capacity(filters.len());
        for filter in filters {
            let n = match collection {
                Collection::ServiceTemplate => {
                    service_template::Entity::find().filter(filter.to_condition(&template_field)?).count(&self.db).await
                }
                Collection::HostApplyRule => {
                    host_apply_rule::Entity::find().filter(filter.to_condition(&rule_field)?).count(&self.db).await
                }
                Collection::Module => {
                    module::Entity::find().filter(filter.to_condition(&module_field)?).count(&self.db).await
                }
                Collection::Host => host::Entity::find().filter(filter.to_condition(&host_field)?).count(&self.db).await,
                Collection::HostModuleRelation => {
                    host_module_relation::Entity::find()
                        .filter(filter.to_condition(&relation_field)?)
                        .count(&self.db)
                        .await
                }
            };
            counts.push(n.map_err(db_err)?);
        }
        Ok(counts)
    }

    async fn update_hosts(&self, filter: &Predicate, document: &MergeDocument) -> Result<u64, ServiceError> {
        let merged = Expr::col(host::Column::Attributes).concatenate(jsonb_literal(document.to_json_string()?));
        let res = host::Entity::update_many()
            .col_expr(host::Column::Attributes, merged)
            .filter(filter.to_condition(&host_field)?)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected)
    }
}

#[async_trait]
impl RuleTransaction for SeaOrmRuleTransaction {
    async fn create_template(
        &mut self,
        kit: &Kit,
        input: &CreateServiceTemplateOption,
    ) -> Result<ServiceTemplate, ServiceError> {
        let created =
            service_template::create(&self.txn, input.biz_id, &input.name, input.service_category_id, &kit.user).await?;
        Ok(created.into())
    }

    async fn set_host_apply_enabled(&mut self, kit: &Kit, filter: &Predicate, enabled: bool) -> Result<u64, ServiceError> {
        let res = service_template::Entity::update_many()
            .col_expr(service_template::Column::HostApplyEnabled, Expr::value(enabled))
            .col_expr(service_template::Column::Modifier, Expr::value(kit.user.clone()))
            .col_expr(service_template::Column::LastTime, Expr::value(Utc::now().fixed_offset()))
            .filter(filter.to_condition(&template_field)?)
            .exec(&self.txn)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected)
    }

    async fn upsert_rules(
        &mut self,
        kit: &Kit,
        biz_id: i64,
        rules: &[CreateHostApplyRuleOption],
    ) -> Result<Vec<HostApplyRule>, ServiceError> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now().fixed_offset();
        let models = rules.iter().map(|r| host_apply_rule::ActiveModel {
            id: NotSet,
            biz_id: Set(biz_id),
            service_template_id: Set(r.service_template_id),
            attribute_id: Set(r.attribute_id),
            property_value: Set(r.property_value.clone()),
            creator: Set(kit.user.clone()),
            modifier: Set(kit.user.clone()),
            create_time: Set(now),
            last_time: Set(now),
        });
        host_apply_rule::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    host_apply_rule::Column::BizId,
                    host_apply_rule::Column::ServiceTemplateId,
                    host_apply_rule::Column::AttributeId,
                ])
                .update_columns([
                    host_apply_rule::Column::PropertyValue,
                    host_apply_rule::Column::Modifier,
                    host_apply_rule::Column::LastTime,
                ])
                .to_owned(),
            )
            .exec(&self.txn)
            .await
            .map_err(db_err)?;

        let keys = rules
            .iter()
            .map(|r| {
                Predicate::and(vec![
                    Predicate::eq(Field::ServiceTemplateId, r.service_template_id),
                    Predicate::eq(Field::AttributeId, r.attribute_id),
                ])
            })
            .collect();
        let filter = Predicate::and(vec![Predicate::eq(Field::BizId, biz_id), Predicate::or(keys)]);
        let saved = list_rules_on(&self.txn, &filter, Page::unlimited()).await?.info;
        // report in submission order
        Ok(rules
            .iter()
            .filter_map(|r| {
                saved
                    .iter()
                    .find(|s| s.service_template_id == r.service_template_id && s.attribute_id == r.attribute_id)
                    .cloned()
            })
            .collect())
    }

    async fn delete_rules(&mut self, filter: &Predicate) -> Result<u64, ServiceError> {
        let res = host_apply_rule::Entity::delete_many()
            .filter(filter.to_condition(&rule_field)?)
            .exec(&self.txn)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected)
    }

    async fn list_rules(&mut self, filter: &Predicate, page: Page) -> Result<PageResult<HostApplyRule>, ServiceError> {
        list_rules_on(&self.txn, filter, page).await
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> { self.txn.commit().await.map_err(db_err) }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::host_apply::diff::compute_plan;
    use crate::host_apply::executor::ApplyExecutor;
    use crate::test_support::get_db;
    use sea_orm::{ActiveModelTrait, ColumnTrait};
    use serde_json::json;

    async fn seed_attribute(db: &DatabaseConnection, property_id: &str) -> anyhow::Result<i64> {
        let am = host_attribute::ActiveModel {
            id: NotSet,
            biz_id: Set(host_attribute::GLOBAL_BIZ_ID),
            property_id: Set(property_id.to_string()),
            property_name: Set(property_id.to_string()),
            property_type: Set("singlechar".into()),
        };
        Ok(am.insert(db).await?.id)
    }

    async fn seed_host(db: &DatabaseConnection, attributes: Value) -> anyhow::Result<i64> {
        let am = host::ActiveModel { id: NotSet, attributes: Set(attributes) };
        Ok(am.insert(db).await?.id)
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_rules() -> anyhow::Result<()> {
        let Some(db) = get_db().await? else { return Ok(()) };
        let store = SeaOrmHostApplyStore::new(db.clone(), 500);
        let kit = Kit::new("tester");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let tpl = service_template::create(&db, 9_101, &format!("tpl-{suffix}"), 1, "tester").await?;
        {
            let mut txn = store.begin().await?;
            let rule = CreateHostApplyRuleOption { service_template_id: tpl.id, attribute_id: 1, property_value: json!("A") };
            txn.upsert_rules(&kit, 9_101, &[rule]).await?;
        }
        let left = store.list_rules(&Predicate::eq(Field::ServiceTemplateId, tpl.id), Page::unlimited()).await?;
        assert_eq!(left.count, 0);
        service_template::Entity::delete_by_id(tpl.id).exec(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn upsert_overwrites_and_keeps_one_row() -> anyhow::Result<()> {
        let Some(db) = get_db().await? else { return Ok(()) };
        let store = SeaOrmHostApplyStore::new(db.clone(), 500);
        let kit = Kit::new("tester");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let tpl = service_template::create(&db, 9_102, &format!("tpl-{suffix}"), 1, "tester").await?;
        let rule = |v: Value| CreateHostApplyRuleOption { service_template_id: tpl.id, attribute_id: 5, property_value: v };

        let mut txn = store.begin().await?;
        let first = txn.upsert_rules(&kit, 9_102, &[rule(json!("A"))]).await?;
        let second = txn.upsert_rules(&kit, 9_102, &[rule(json!("B"))]).await?;
        txn.commit().await?;
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].property_value, json!("B"));

        service_template::Entity::delete_by_id(tpl.id).exec(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn jsonb_merge_touches_only_diverging_hosts() -> anyhow::Result<()> {
        let Some(db) = get_db().await? else { return Ok(()) };
        let store = SeaOrmHostApplyStore::new(db.clone(), 500);
        let kit = Kit::new("tester");
        let property = format!("cpu_{}", uuid::Uuid::new_v4().simple());
        let attribute_id = seed_attribute(&db, &property).await?;
        let h1 = seed_host(&db, json!({"keep": 1})).await?;
        let mut carried = Map::new();
        carried.insert(property.clone(), json!("A"));
        let h2 = seed_host(&db, Value::Object(carried)).await?;
        let h3 = seed_host(&db, json!({})).await?;

        let hosts = BTreeSet::from([h1, h2, h3]);
        let plan = compute_plan(&store, &kit, 9_103, &[(attribute_id, json!("A"))], &hosts, 2).await?;
        let outcome = ApplyExecutor::new(&store).apply(&kit, &plan).await?;
        assert_eq!(outcome.matched_hosts, 2);
        assert_eq!(outcome.updated_hosts, 2);

        let again = ApplyExecutor::new(&store).apply(&kit, &plan).await?;
        assert_eq!(again.updated_hosts, 0);

        let first = host::Entity::find_by_id(h1).one(&db).await?.map(crate::host_apply::domain::Host::from);
        let first = first.ok_or_else(|| anyhow::anyhow!("host {h1} vanished"))?;
        assert_eq!(first.attributes["keep"], json!(1));
        assert_eq!(first.attributes[&property], json!("A"));

        host::Entity::delete_many().filter(host::Column::Id.is_in([h1, h2, h3])).exec(&db).await?;
        host_attribute::Entity::delete_by_id(attribute_id).exec(&db).await?;
        Ok(())
    }
}
