//! Time-series store protocol types and client trait
//!
//! The store speaks a `select ... from ... [where] [group by] ...` query
//! subset and a tagged point-write call with a configurable time precision.
//! The store is accessed through a separate, unscoped client per call;
//! failures are wrapped into the engine's own error taxonomy.

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::query::TimePrecision;
use crate::series::Value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// One series of a query response: a measurement name, the group tags, and
/// raw (timestamp, value) pairs. A null value is a missing sample.
/// Timestamps stay raw (string instant or epoch integer) until the result
/// shaper converts them.
#[derive(Debug, Clone, Default)]
pub struct RawSeries {
    pub measurement: String,
    pub tags: IndexMap<String, String>,
    pub values: Vec<(serde_json::Value, serde_json::Value)>,
}

/// One typed point of a write batch.
#[derive(Debug, Clone)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub value: Value,
}

/// A tagged per-measurement write batch.
#[derive(Debug, Clone)]
pub struct PointBatch {
    pub measurement: String,
    pub tags: IndexMap<String, String>,
    pub points: Vec<Point>,
}

/// Client contract for the time-series store.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Execute a compiled query. With `epoch` set, the store returns
    /// integer timestamps at that precision; otherwise calendar instants.
    async fn query(&self, query: &str, epoch: Option<TimePrecision>) -> Result<Vec<RawSeries>>;

    /// Write one batch; returns whether the store accepted every point.
    async fn write_points(
        &self,
        batch: &PointBatch,
        precision: Option<TimePrecision>,
    ) -> Result<bool>;

    /// Drop every series of `measurement` matching `tags`.
    async fn delete_series(&self, measurement: &str, tags: &IndexMap<String, String>)
        -> Result<()>;
}
