//! Diff computation: which hosts differ from the rule values, and what to write.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::domain::HostAttribute;
use super::repository::HostApplyStore;
use crate::errors::ServiceError;
use crate::kit::Kit;
use crate::predicate::{Field, Predicate};

/// `{property_id: value}` to merge into host attributes.
///
/// Backed by a `BTreeMap`, so serialization order is the lexicographic
/// property order and the bytes are stable for a fixed rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MergeDocument(BTreeMap<String, Value>);

impl MergeDocument {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn get(&self, property_id: &str) -> Option<&Value> { self.0.get(property_id) }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> { self.0.iter() }

    pub fn to_json_string(&self) -> Result<String, ServiceError> {
        serde_json::to_string(&self.0).map_err(|e| ServiceError::Dependency(format!("encode merge document: {e}")))
    }
}

/// Everything the apply executor needs for one pass.
#[derive(Debug, Clone)]
pub struct HostApplyPlan {
    pub document: MergeDocument,
    pub host_ids: BTreeSet<i64>,
    /// One mismatch filter per host shard.
    pub shards: Vec<Predicate>,
}

/// Keep the first value per attribute, preserving input order.
pub fn first_value_per_attribute(rules: &[(i64, Value)]) -> Vec<(i64, Value)> {
    let mut seen = BTreeSet::new();
    rules
        .iter()
        .filter(|(attribute_id, _)| seen.insert(*attribute_id))
        .cloned()
        .collect()
}

/// Resolve attribute IDs to property IDs and build the merge document.
pub fn build_document(rules: &[(i64, Value)], schema: &BTreeMap<i64, String>) -> Result<MergeDocument, ServiceError> {
    let mut doc = BTreeMap::new();
    for (attribute_id, value) in first_value_per_attribute(rules) {
        let property_id = schema
            .get(&attribute_id)
            .ok_or_else(|| ServiceError::Validation(format!("host attribute {attribute_id} does not exist")))?;
        doc.insert(property_id.clone(), value);
    }
    Ok(MergeDocument(doc))
}

/// Split `host_ids` into ascending chunks of at most `size` IDs.
pub fn shard_hosts(host_ids: &BTreeSet<i64>, size: usize) -> Vec<BTreeSet<i64>> {
    let ids: Vec<i64> = host_ids.iter().copied().collect();
    ids.chunks(size.max(1)).map(|chunk| chunk.iter().copied().collect()).collect()
}

/// Hosts in `host_ids` where any document property differs.
pub fn mismatch_predicate(document: &MergeDocument, host_ids: &BTreeSet<i64>) -> Predicate {
    let differs = document
        .iter()
        .map(|(property_id, value)| Predicate::Ne(Field::Property(property_id.clone()), value.clone()))
        .collect();
    Predicate::and(vec![
        Predicate::is_in(Field::HostId, host_ids.iter().copied()),
        Predicate::or(differs),
    ])
}

/// One filter per property, for per-attribute divergence counts.
pub fn attribute_mismatch_filters(document: &MergeDocument, host_ids: &BTreeSet<i64>) -> Vec<(String, Predicate)> {
    document
        .iter()
        .map(|(property_id, value)| {
            let filter = Predicate::and(vec![
                Predicate::is_in(Field::HostId, host_ids.iter().copied()),
                Predicate::Ne(Field::Property(property_id.clone()), value.clone()),
            ]);
            (property_id.clone(), filter)
        })
        .collect()
}

/// Attribute ID to property ID map for one business (global attributes included).
pub async fn load_schema(
    store: &dyn HostApplyStore,
    biz_id: i64,
    attribute_ids: impl IntoIterator<Item = i64>,
) -> Result<BTreeMap<i64, String>, ServiceError> {
    let ids: BTreeSet<i64> = attribute_ids.into_iter().collect();
    if ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let filter = Predicate::and(vec![
        Predicate::is_in(Field::Id, ids.iter().copied()),
        Predicate::is_in(Field::BizId, [biz_id, models::host_attribute::GLOBAL_BIZ_ID]),
    ]);
    let attrs: Vec<HostAttribute> = store.host_attributes(&filter).await?;
    Ok(attrs.into_iter().map(|a| (a.id, a.property_id)).collect())
}

/// Resolve the schema and build the plan for one rule set over one host set.
pub async fn compute_plan(
    store: &dyn HostApplyStore,
    kit: &Kit,
    biz_id: i64,
    rules: &[(i64, Value)],
    host_ids: &BTreeSet<i64>,
    shard_size: usize,
) -> Result<HostApplyPlan, ServiceError> {
    let schema = load_schema(store, biz_id, rules.iter().map(|(id, _)| *id)).await?;
    let document = build_document(rules, &schema)?;
    let shards: Vec<Predicate> = shard_hosts(host_ids, shard_size)
        .iter()
        .map(|shard| mismatch_predicate(&document, shard))
        .collect();
    debug!(
        rid = %kit.rid,
        properties = document.len(),
        hosts = host_ids.len(),
        shards = shards.len(),
        "host_apply_plan_computed"
    );
    Ok(HostApplyPlan { document, host_ids: host_ids.clone(), shards })
}
