//! Series tables: time-indexed, typed values keyed by identity triples
//!
//! A [`SeriesTable`] is the ephemeral unit of data flowing through the
//! pipeline: columns are `(device_type, measurement, device)` identity
//! keys, cells are typed values, and an absent cell is a missing sample,
//! never a default.

pub mod shape;
pub mod units;

pub use shape::{convert_value, format_value, shape_series};
pub use units::convert_unit;

use crate::metadata::DeviceType;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity key of one series: the contract between the shaper, the node
/// views, and the write path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub device_type: DeviceType,
    pub measurement: String,
    pub device: String,
}

impl SeriesKey {
    pub fn new(device_type: DeviceType, measurement: &str, device: &str) -> Self {
        Self {
            device_type,
            measurement: measurement.to_string(),
            device: device.to_string(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.device_type, self.measurement, self.device)
    }
}

/// One typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view used by normalization and aggregation; text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(t) => serde_json::Value::from(t.clone()),
        }
    }
}

/// One column: timestamp -> value, missing samples absent.
pub type Series = BTreeMap<DateTime<Utc>, Value>;

/// Time-indexed table of typed values, columns in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    columns: IndexMap<SeriesKey, Series>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.columns.values().all(|series| series.is_empty())
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.columns.keys()
    }

    pub fn column(&self, key: &SeriesKey) -> Option<&Series> {
        self.columns.get(key)
    }

    pub fn insert_column(&mut self, key: SeriesKey, series: Series) {
        self.columns.insert(key, series);
    }

    /// Insert an empty column for `key` unless one already exists.
    pub fn ensure_column(&mut self, key: SeriesKey) {
        self.columns.entry(key).or_default();
    }

    pub fn insert_value(&mut self, key: &SeriesKey, timestamp: DateTime<Utc>, value: Value) {
        self.columns
            .entry(key.clone())
            .or_default()
            .insert(timestamp, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &Series)> {
        self.columns.iter()
    }

    /// Union of all timestamps present in any column.
    pub fn timestamps(&self) -> BTreeSet<DateTime<Utc>> {
        self.columns
            .values()
            .flat_map(|series| series.keys().copied())
            .collect()
    }

    /// True when every column has a value at `timestamp`.
    pub fn row_complete(&self, timestamp: DateTime<Utc>) -> bool {
        self.columns
            .values()
            .all(|series| series.contains_key(&timestamp))
    }

    /// Project down to exactly `keys`, in that order. Keys with no column
    /// become empty columns so the projection's shape is fixed.
    pub fn project(&self, keys: &[SeriesKey]) -> SeriesTable {
        let mut table = SeriesTable::new();
        for key in keys {
            let series = self.columns.get(key).cloned().unwrap_or_default();
            table.insert_column(key.clone(), series);
        }
        table
    }

    /// Keep only the rows at `timestamps`, preserving column order.
    pub fn restrict(&self, timestamps: &[DateTime<Utc>]) -> SeriesTable {
        let mut table = SeriesTable::new();
        for (key, series) in &self.columns {
            let filtered: Series = timestamps
                .iter()
                .filter_map(|timestamp| {
                    series
                        .get(timestamp)
                        .map(|value| (*timestamp, value.clone()))
                })
                .collect();
            table.insert_column(key.clone(), filtered);
        }
        table
    }

    /// Drop every row that lacks a value in any column.
    pub fn drop_incomplete_rows(&self) -> SeriesTable {
        let complete: Vec<DateTime<Utc>> = self
            .timestamps()
            .into_iter()
            .filter(|timestamp| self.row_complete(*timestamp))
            .collect();
        self.restrict(&complete)
    }
}
