//! Store query compilation
//!
//! Turns a concrete device-type mapping plus filter/aggregation options
//! into directly executable query strings for the time-series store.
//!
//! Equality values are quoted naively, with no escaping or
//! parameterization; callers must validate identifiers upstream before
//! they reach this stage.

pub mod time;

pub use time::{
    convert_timestamp, format_timestamp, parse_instant, time_literal, TimePrecision,
};

use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One tag predicate: an equality, or a disjunction of equalities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagFilter {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for TagFilter {
    fn from(value: &str) -> Self {
        TagFilter::One(value.to_string())
    }
}

impl From<Vec<String>> for TagFilter {
    fn from(values: Vec<String>) -> Self {
        TagFilter::Many(values)
    }
}

/// The filter clause: inclusive-lower/exclusive-upper time bounds plus a
/// conjunction of tag predicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub starttime: Option<String>,
    #[serde(default)]
    pub endtime: Option<String>,
    #[serde(flatten)]
    pub tags: IndexMap<String, TagFilter>,
}

impl Filter {
    pub fn time_range(starttime: Option<&str>, endtime: Option<&str>) -> Self {
        Self {
            starttime: starttime.map(str::to_string),
            endtime: endtime.map(str::to_string),
            tags: IndexMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<TagFilter>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    fn compile(&self) -> Result<String> {
        let mut predicates = Vec::new();
        if let Some(starttime) = &self.starttime {
            predicates.push(format!("time >= {}", time_literal(starttime)?));
        }
        if let Some(endtime) = &self.endtime {
            predicates.push(format!("time < {}", time_literal(endtime)?));
        }
        for (key, filter) in &self.tags {
            match filter {
                TagFilter::One(value) => predicates.push(format!("{key} = '{value}'")),
                TagFilter::Many(values) => {
                    if values.is_empty() {
                        continue;
                    }
                    let equalities: Vec<String> = values
                        .iter()
                        .map(|value| format!("{key} = '{value}'"))
                        .collect();
                    predicates.push(format!("({})", equalities.join(" or ")));
                }
            }
        }
        Ok(predicates.join(" and "))
    }
}

/// A single store query over one measurement expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Measurement literal, or a `/^a|b$/` regex built by
    /// [`measurement_pattern`]
    pub measurement: String,
    #[serde(default, rename = "where")]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl QuerySpec {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            ..Default::default()
        }
    }

    /// Compile into a complete, directly executable query string.
    pub fn compile(&self) -> Result<String> {
        let value = match &self.aggregation {
            Some(aggregation) => format!("{aggregation}(value) as value"),
            None => "value".to_string(),
        };
        let mut query = format!("select {value} from {}", self.measurement);
        if let Some(filter) = &self.filter {
            let clause = filter.compile()?;
            if !clause.is_empty() {
                query.push_str(" where ");
                query.push_str(&clause);
            }
        }
        let group_by = self.group_dimensions();
        if !group_by.is_empty() {
            query.push_str(" group by ");
            query.push_str(&group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            query.push_str(" order by ");
            query.push_str(&self.order_by.join(", "));
        }
        if let Some(fill) = &self.fill {
            query.push_str(&format!(" fill({fill})"));
        }
        if let Some(limit) = self.limit {
            query.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = self.offset {
            query.push_str(&format!(" offset {offset}"));
        }
        debug!(%query, "compiled query");
        Ok(query)
    }

    /// Caller-specified dimensions plus the implicit `device` dimension, so
    /// per-device series can be recovered from one query spanning many
    /// devices.
    fn group_dimensions(&self) -> Vec<String> {
        let mut dimensions = self.group_by.clone();
        let grouped = !dimensions.is_empty() || self.aggregation.is_some();
        if grouped && !dimensions.iter().any(|d| d == "device") {
            dimensions.push("device".to_string());
        }
        dimensions
    }
}

/// Regex alternation matching a measurement's canonical name plus any
/// alternative spellings registered on its metadata.
pub fn measurement_pattern(names: &[&str]) -> String {
    format!("/^{}$/", names.join("|"))
}

/// The measurement expression to query: the literal name, or the
/// alternation with `pattern` when alternative spellings are registered,
/// so series written under those spellings are picked up too.
pub fn measurement_selector(name: &str, pattern: Option<&str>) -> String {
    match pattern {
        Some(pattern) => measurement_pattern(&[name, pattern]),
        None => name.to_string(),
    }
}
