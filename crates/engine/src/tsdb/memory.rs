//! In-memory time-series store
//!
//! Backs tests and offline tooling. Understands exactly the query subset
//! the compiler emits: an optional `mean` aggregation, a measurement
//! literal or `/^a|b$/` alternation, equality/disjunction tag predicates,
//! `time >=`/`time <` bounds, and `time(Ns)` bucketing with the implicit
//! `device` dimension.

use crate::error::{EngineError, Result};
use crate::query::{parse_instant, TimePrecision};
use crate::series::Value;
use crate::tsdb::{PointBatch, RawSeries, TimeSeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredPoint {
    measurement: String,
    tags: IndexMap<String, String>,
    time: DateTime<Utc>,
    value: Value,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<Vec<StoredPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn point_count(&self) -> usize {
        self.points.read().await.len()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn query(&self, query: &str, epoch: Option<TimePrecision>) -> Result<Vec<RawSeries>> {
        let parsed = ParsedQuery::parse(query)?;
        let points = self.points.read().await;
        let mut groups: BTreeMap<(String, String), Vec<&StoredPoint>> = BTreeMap::new();
        for point in points.iter() {
            if !parsed.matches(point) {
                continue;
            }
            let device = point.tags.get("device").cloned().unwrap_or_default();
            groups
                .entry((point.measurement.clone(), device))
                .or_default()
                .push(point);
        }
        let mut series = Vec::new();
        for ((measurement, device), group) in groups {
            let mut tags = IndexMap::new();
            tags.insert("device".to_string(), device);
            let mut values: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
            let mut raw_values: BTreeMap<DateTime<Utc>, serde_json::Value> = BTreeMap::new();
            for point in group {
                let bucket = match parsed.bucket_seconds {
                    Some(seconds) => {
                        let epoch_secs = point.time.timestamp().div_euclid(seconds);
                        DateTime::from_timestamp(epoch_secs * seconds, 0).ok_or_else(|| {
                            EngineError::InvalidParameter("bucket out of range".to_string())
                        })?
                    }
                    None => point.time,
                };
                if parsed.aggregate_mean {
                    if let Some(number) = point.value.as_f64() {
                        values.entry(bucket).or_default().push(number);
                    }
                } else {
                    raw_values.insert(bucket, point.value.to_json());
                }
            }
            if parsed.aggregate_mean {
                for (bucket, numbers) in values {
                    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                    raw_values.insert(bucket, serde_json::Value::from(mean));
                }
            }
            let values = raw_values
                .into_iter()
                .map(|(time, value)| (timestamp_json(time, epoch), value))
                .collect();
            series.push(RawSeries {
                measurement,
                tags,
                values,
            });
        }
        Ok(series)
    }

    async fn write_points(
        &self,
        batch: &PointBatch,
        _precision: Option<TimePrecision>,
    ) -> Result<bool> {
        let mut points = self.points.write().await;
        for point in &batch.points {
            points.push(StoredPoint {
                measurement: batch.measurement.clone(),
                tags: batch.tags.clone(),
                time: point.time,
                value: point.value.clone(),
            });
        }
        Ok(true)
    }

    async fn delete_series(
        &self,
        measurement: &str,
        tags: &IndexMap<String, String>,
    ) -> Result<()> {
        let mut points = self.points.write().await;
        points.retain(|point| {
            point.measurement != measurement
                || !tags
                    .iter()
                    .all(|(key, value)| point.tags.get(key) == Some(value))
        });
        Ok(())
    }
}

fn timestamp_json(time: DateTime<Utc>, epoch: Option<TimePrecision>) -> serde_json::Value {
    match epoch {
        Some(precision) => serde_json::Value::from(precision.epoch(time)),
        None => serde_json::Value::from(time.to_rfc3339()),
    }
}

enum MeasurementExpr {
    Literal(String),
    Pattern(Regex),
}

enum TagPredicate {
    Equal(String, String),
    AnyOf(String, Vec<String>),
}

struct ParsedQuery {
    measurement: MeasurementExpr,
    aggregate_mean: bool,
    starttime: Option<DateTime<Utc>>,
    endtime: Option<DateTime<Utc>>,
    predicates: Vec<TagPredicate>,
    bucket_seconds: Option<i64>,
}

fn query_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(
            r"^select (?P<value>mean\(value\) as value|value) from (?P<measurement>\S+)(?: where (?P<where>.+?))?(?: group by (?P<group>[^;]+?))?(?: order by time)?(?: fill\(\w+\))?(?: limit \d+)?(?: offset \d+)?$",
        )
        .expect("query shape")
    })
}

impl ParsedQuery {
    fn parse(query: &str) -> Result<Self> {
        let captures = query_shape().captures(query).ok_or_else(|| {
            EngineError::InvalidParameter(format!("unsupported query: {query}"))
        })?;
        let aggregate_mean = &captures["value"] != "value";
        let measurement = parse_measurement(&captures["measurement"])?;
        let mut parsed = ParsedQuery {
            measurement,
            aggregate_mean,
            starttime: None,
            endtime: None,
            predicates: Vec::new(),
            bucket_seconds: None,
        };
        if let Some(clause) = captures.name("where") {
            parsed.parse_where(clause.as_str())?;
        }
        if let Some(group) = captures.name("group") {
            let bucket = Regex::new(r"time\((\d+)s\)").expect("bucket shape");
            if let Some(capture) = bucket.captures(group.as_str()) {
                parsed.bucket_seconds = Some(capture[1].parse().map_err(|_| {
                    EngineError::InvalidParameter("bad bucket size".to_string())
                })?);
            }
        }
        Ok(parsed)
    }

    fn parse_where(&mut self, clause: &str) -> Result<()> {
        for predicate in clause.split(" and ") {
            let predicate = predicate.trim();
            if let Some(rest) = predicate.strip_prefix("time >= ") {
                self.starttime = Some(eval_time_literal(rest)?);
            } else if let Some(rest) = predicate.strip_prefix("time < ") {
                self.endtime = Some(eval_time_literal(rest)?);
            } else if predicate.starts_with('(') && predicate.ends_with(')') {
                let inner = &predicate[1..predicate.len() - 1];
                let mut key = None;
                let mut values = Vec::new();
                for equality in inner.split(" or ") {
                    let (k, v) = parse_equality(equality)?;
                    key = Some(k);
                    values.push(v);
                }
                if let Some(key) = key {
                    self.predicates.push(TagPredicate::AnyOf(key, values));
                }
            } else {
                let (key, value) = parse_equality(predicate)?;
                self.predicates.push(TagPredicate::Equal(key, value));
            }
        }
        Ok(())
    }

    fn matches(&self, point: &StoredPoint) -> bool {
        let measurement_matches = match &self.measurement {
            MeasurementExpr::Literal(name) => *name == point.measurement,
            MeasurementExpr::Pattern(pattern) => pattern.is_match(&point.measurement),
        };
        if !measurement_matches {
            return false;
        }
        if let Some(starttime) = self.starttime {
            if point.time < starttime {
                return false;
            }
        }
        if let Some(endtime) = self.endtime {
            if point.time >= endtime {
                return false;
            }
        }
        self.predicates.iter().all(|predicate| match predicate {
            TagPredicate::Equal(key, value) => point.tags.get(key) == Some(value),
            TagPredicate::AnyOf(key, values) => point
                .tags
                .get(key)
                .map(|actual| values.contains(actual))
                .unwrap_or(false),
        })
    }
}

fn parse_measurement(expr: &str) -> Result<MeasurementExpr> {
    if let Some(inner) = expr.strip_prefix('/').and_then(|e| e.strip_suffix('/')) {
        let pattern = Regex::new(inner)
            .map_err(|error| EngineError::InvalidParameter(error.to_string()))?;
        return Ok(MeasurementExpr::Pattern(pattern));
    }
    Ok(MeasurementExpr::Literal(expr.to_string()))
}

fn parse_equality(predicate: &str) -> Result<(String, String)> {
    let (key, value) = predicate.split_once(" = ").ok_or_else(|| {
        EngineError::InvalidParameter(format!("unsupported predicate: {predicate}"))
    })?;
    let value = value.trim_matches('\'');
    Ok((key.trim().to_string(), value.to_string()))
}

/// Evaluate a compiled time literal: a quoted calendar instant, or a
/// `now()`-anchored offset chain.
fn eval_time_literal(literal: &str) -> Result<DateTime<Utc>> {
    let literal = literal.trim();
    if let Some(inner) = literal.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
        return parse_instant(inner.trim_end_matches(" UTC"));
    }
    let offsets = Regex::new(r"([+-])\s*(\d+)(u|ms|s|m|h|d|w)").expect("offset shape");
    let mut time = Utc::now();
    let anchored = literal.strip_prefix("now()").ok_or_else(|| {
        EngineError::InvalidParameter(format!("unsupported time literal: {literal}"))
    })?;
    for capture in offsets.captures_iter(anchored) {
        let amount: i64 = capture[2]
            .parse()
            .map_err(|_| EngineError::InvalidParameter("bad offset".to_string()))?;
        let span = match &capture[3] {
            "u" => Duration::microseconds(amount),
            "ms" => Duration::milliseconds(amount),
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            "w" => Duration::weeks(amount),
            _ => unreachable!(),
        };
        if &capture[1] == "+" {
            time += span;
        } else {
            time -= span;
        }
    }
    Ok(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, QuerySpec};
    use crate::tsdb::Point;

    fn batch(measurement: &str, device: &str, values: &[(i64, f64)]) -> PointBatch {
        let mut tags = IndexMap::new();
        tags.insert("datacenter".to_string(), "dc1".to_string());
        tags.insert("device".to_string(), device.to_string());
        PointBatch {
            measurement: measurement.to_string(),
            tags,
            points: values
                .iter()
                .map(|(epoch, value)| Point {
                    time: DateTime::from_timestamp(*epoch, 0).unwrap(),
                    value: Value::Float(*value),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let store = MemoryStore::new();
        store
            .write_points(
                &batch("temperature", "s1", &[(60, 21.0), (120, 22.5)]),
                Some(TimePrecision::Seconds),
            )
            .await
            .unwrap();

        let spec = QuerySpec {
            measurement: "temperature".to_string(),
            filter: Some(Filter::default().tag("device", vec!["s1".to_string()])),
            group_by: vec!["device".to_string()],
            ..Default::default()
        };
        let series = store
            .query(&spec.compile().unwrap(), Some(TimePrecision::Seconds))
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].tags["device"], "s1");
        assert_eq!(
            series[0].values,
            vec![
                (serde_json::json!(60), serde_json::json!(21.0)),
                (serde_json::json!(120), serde_json::json!(22.5)),
            ]
        );
    }

    #[tokio::test]
    async fn test_mean_aggregation_with_buckets() {
        let store = MemoryStore::new();
        store
            .write_points(
                &batch("temperature", "s1", &[(0, 20.0), (30, 22.0), (60, 30.0)]),
                Some(TimePrecision::Seconds),
            )
            .await
            .unwrap();

        let mut spec = QuerySpec::new("temperature");
        spec.aggregation = Some("mean".to_string());
        spec.group_by = vec!["time(60s)".to_string()];
        let series = store
            .query(&spec.compile().unwrap(), Some(TimePrecision::Seconds))
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(
            series[0].values,
            vec![
                (serde_json::json!(0), serde_json::json!(21.0)),
                (serde_json::json!(60), serde_json::json!(30.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_measurement_pattern_and_time_bounds() {
        let store = MemoryStore::new();
        store
            .write_points(&batch("temperature", "s1", &[(60, 21.0)]), None)
            .await
            .unwrap();
        store
            .write_points(&batch("temperature.prediction", "s1", &[(60, 20.5)]), None)
            .await
            .unwrap();

        let spec = QuerySpec {
            measurement: "/^temperature|temperature.prediction$/".to_string(),
            filter: Some(Filter::time_range(
                Some("1970-01-01 00:00:30"),
                Some("1970-01-01 00:02:00"),
            )),
            ..Default::default()
        };
        let series = store
            .query(&spec.compile().unwrap(), Some(TimePrecision::Seconds))
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_series() {
        let store = MemoryStore::new();
        store
            .write_points(&batch("temperature", "s1", &[(60, 21.0)]), None)
            .await
            .unwrap();
        let mut tags = IndexMap::new();
        tags.insert("device".to_string(), "s1".to_string());
        store.delete_series("temperature", &tags).await.unwrap();
        assert_eq!(store.point_count().await, 0);
    }
}
