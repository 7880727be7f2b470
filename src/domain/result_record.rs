//! Harvested records and the in-memory result store
//!
//! Field values are kept as raw JSON values: the embedded cache mixes
//! strings, numbers and nested objects, and whatever was found is written
//! back out unchanged. Anything missing is `null`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifiers already present in persisted output
pub type CompletedIdSet = HashSet<String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceData {
    pub actual: Value,
    pub unit_price: Value,
    pub unit_of_measure: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductData {
    pub id: Value,
    pub title: Value,
    pub description: Value,
    pub bulk_buy_limit: Value,
    pub status: Value,
    pub price: PriceData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromotionData {
    pub id: Value,
    pub start_date: Value,
    pub end_date: Value,
    pub description: Value,
    pub unit_selling_info: Value,
}

/// One successful extraction. The presence of the record is what marks the
/// identifier as completed, even when both halves are null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    pub product_data: Option<ProductData>,
    pub promotion_data: Option<PromotionData>,
}

/// Identifier → record. At most one record per identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultStore {
    records: BTreeMap<String, ResultRecord>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins. Returns the record that was replaced, if any.
    pub fn merge(&mut self, id: impl Into<String>, record: ResultRecord) -> Option<ResultRecord> {
        self.records.insert(id.into(), record)
    }

    pub fn get(&self, id: &str) -> Option<&ResultRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultRecord)> {
        self.records.iter()
    }

    /// Snapshot of the identifiers in the store, used to skip finished work
    pub fn completed_ids(&self) -> CompletedIdSet {
        self.records.keys().cloned().collect()
    }
}

impl FromIterator<(String, ResultRecord)> for ResultStore {
    fn from_iter<T: IntoIterator<Item = (String, ResultRecord)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
