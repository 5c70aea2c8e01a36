//! Typed query predicates shared by every store backend.
//!
//! A `Predicate` is built once by the engine and then either evaluated against
//! in-memory documents (`matches`) or serialized to a sea-orm `Condition`
//! (`to_condition`). Field names never travel as raw strings except for host
//! properties, which are dynamic by nature.

use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};
use sea_orm::{Condition, Value as DbValue};
use serde_json::Value;

use crate::errors::ServiceError;

/// Addressable fields across the host apply collections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Id,
    BizId,
    ServiceTemplateId,
    ModuleId,
    HostId,
    AttributeId,
    HostApplyEnabled,
    /// A host attribute, addressed by property ID.
    Property(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(Field, Value),
    /// Also true when the field is absent.
    Ne(Field, Value),
    In(Field, Vec<Value>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// Anything a predicate can be evaluated against.
pub trait Document {
    fn field(&self, field: &Field) -> Option<Value>;
}

/// Store-side representation of a `Field`.
pub enum SqlField {
    Column(SimpleExpr),
    /// Key inside a jsonb column.
    JsonKey { column: &'static str, key: String },
}

impl SqlField {
    pub fn column<C>(col: C) -> Self
    where
        C: sea_orm::sea_query::IntoColumnRef,
    {
        SqlField::Column(Expr::col(col).into())
    }
}

impl Predicate {
    pub fn eq(field: Field, value: impl Into<Value>) -> Self { Predicate::Eq(field, value.into()) }

    pub fn ne(field: Field, value: impl Into<Value>) -> Self { Predicate::Ne(field, value.into()) }

    pub fn is_in<V, I>(field: Field, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Predicate::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn and(preds: Vec<Predicate>) -> Self { Predicate::And(preds) }

    pub fn or(preds: Vec<Predicate>) -> Self { Predicate::Or(preds) }

    /// Evaluate against an in-memory document.
    pub fn matches<D: Document + ?Sized>(&self, doc: &D) -> bool {
        match self {
            Predicate::Eq(f, v) => doc.field(f).map_or(false, |x| same_value(&x, v)),
            Predicate::Ne(f, v) => doc.field(f).map_or(true, |x| !same_value(&x, v)),
            Predicate::In(f, vs) => doc.field(f).map_or(false, |x| vs.iter().any(|v| same_value(&x, v))),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(doc)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(doc)),
        }
    }

    /// Serialize to a sea-orm condition; `resolve` maps fields of the target entity.
    pub fn to_condition<F>(&self, resolve: &F) -> Result<Condition, ServiceError>
    where
        F: Fn(&Field) -> Option<SqlField>,
    {
        match self {
            Predicate::And(ps) => {
                let mut cond = Condition::all();
                for p in ps {
                    cond = cond.add(p.to_condition(resolve)?);
                }
                Ok(cond)
            }
            Predicate::Or(ps) => {
                let mut cond = Condition::any();
                for p in ps {
                    cond = cond.add(p.to_condition(resolve)?);
                }
                Ok(cond)
            }
            leaf => Ok(Condition::all().add(leaf.leaf_expr(resolve)?)),
        }
    }

    fn leaf_expr<F>(&self, resolve: &F) -> Result<SimpleExpr, ServiceError>
    where
        F: Fn(&Field) -> Option<SqlField>,
    {
        let field = match self {
            Predicate::Eq(f, _) | Predicate::Ne(f, _) | Predicate::In(f, _) => f,
            Predicate::And(_) | Predicate::Or(_) => {
                return Err(ServiceError::Validation("compound predicate is not a leaf".into()))
            }
        };
        let sql = resolve(field)
            .ok_or_else(|| ServiceError::Validation(format!("field {:?} is not queryable on this collection", field)))?;

        let expr = match (self, sql) {
            (Predicate::Eq(_, v), SqlField::Column(col)) => Expr::expr(col).eq(db_value(v)),
            (Predicate::Ne(_, v), SqlField::Column(col)) => Expr::expr(col).ne(db_value(v)),
            (Predicate::In(_, vs), SqlField::Column(col)) => Expr::expr(col).is_in(vs.iter().map(db_value)),
            (Predicate::Eq(_, v), SqlField::JsonKey { column, key }) => json_eq(column, &key, v),
            (Predicate::Ne(_, v), SqlField::JsonKey { column, key }) => json_ne(column, &key, v),
            (Predicate::In(_, vs), SqlField::JsonKey { column, key }) => vs
                .iter()
                .map(|v| json_eq(column, &key, v))
                .reduce(|acc, e| acc.or(e))
                .unwrap_or_else(|| Expr::val(1).eq(2)),
            (Predicate::And(_) | Predicate::Or(_), _) => {
                return Err(ServiceError::Validation("compound predicate is not a leaf".into()))
            }
        };
        Ok(expr)
    }
}

/// JSON equality as jsonb sees it: `7` and `7.0` are the same number.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(i), Some(j)) => i == j,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).map_or(false, |y| same_value(x, y)))
        }
        _ => a == b,
    }
}

/// `column -> key`; NULL when the key is absent.
fn json_field(column: &'static str, key: &str) -> SimpleExpr {
    Expr::col(Alias::new(column)).get_json_field(key.to_string())
}

/// A bound jsonb literal, `CAST($n AS jsonb)`.
pub fn jsonb_literal(json: String) -> SimpleExpr {
    Func::cast_as(json, Alias::new("jsonb")).into()
}

fn json_eq(column: &'static str, key: &str, value: &Value) -> SimpleExpr {
    Expr::expr(json_field(column, key)).eq(jsonb_literal(value.to_string()))
}

fn json_ne(column: &'static str, key: &str, value: &Value) -> SimpleExpr {
    Expr::expr(json_field(column, key))
        .ne(jsonb_literal(value.to_string()))
        .or(Expr::expr(json_field(column, key)).is_null())
}

fn db_value(v: &Value) -> DbValue {
    match v {
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                u.into()
            } else {
                n.as_f64().unwrap_or_default().into()
            }
        }
        Value::String(s) => s.clone().into(),
        other => other.clone().into(),
    }
}
