//! HTTP client for the time-series store
//!
//! Speaks the store's `/query` + `/write` HTTP surface: queries go out as
//! URL parameters, writes as line-protocol batches. Transport and store
//! failures surface as `Database`; malformed response bodies as
//! `InvalidResponse`.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::query::TimePrecision;
use crate::series::Value;
use crate::tsdb::{PointBatch, RawSeries, TimeSeriesStore};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP store client. One unscoped client per engine; no cross-call state.
pub struct HttpStore {
    base: Url,
    database: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base = Url::parse(&config.tsdb_url)
            .map_err(|error| EngineError::InvalidParameter(error.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.tsdb_timeout_secs))
            .build()?;
        Ok(Self {
            base,
            database: config.tsdb_database.clone(),
            client,
        })
    }

    async fn run_query(
        &self,
        query: &str,
        epoch: Option<TimePrecision>,
    ) -> Result<Vec<RawSeries>> {
        let mut url = self.base.join("query").map_err(EngineError::from_store)?;
        url.query_pairs_mut()
            .append_pair("db", &self.database)
            .append_pair("q", query);
        if let Some(epoch) = epoch {
            url.query_pairs_mut().append_pair("epoch", epoch.as_str());
        }
        debug!(%query, "store query");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Database(format!(
                "query failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        let body: QueryResponse = response.json().await?;
        let mut series = Vec::new();
        for result in body.results {
            if let Some(error) = result.error {
                return Err(EngineError::Database(error));
            }
            for wire in result.series {
                series.push(wire.into_raw_series()?);
            }
        }
        Ok(series)
    }
}

#[async_trait]
impl TimeSeriesStore for HttpStore {
    async fn query(&self, query: &str, epoch: Option<TimePrecision>) -> Result<Vec<RawSeries>> {
        self.run_query(query, epoch).await
    }

    async fn write_points(
        &self,
        batch: &PointBatch,
        precision: Option<TimePrecision>,
    ) -> Result<bool> {
        let mut url = self.base.join("write").map_err(EngineError::from_store)?;
        url.query_pairs_mut().append_pair("db", &self.database);
        if let Some(precision) = precision {
            url.query_pairs_mut()
                .append_pair("precision", precision.as_str());
        }
        let body = line_protocol(batch, precision);
        debug!(
            measurement = %batch.measurement,
            points = batch.points.len(),
            "store write"
        );
        let response = self.client.post(url).body(body).send().await?;
        Ok(response.status().is_success())
    }

    async fn delete_series(
        &self,
        measurement: &str,
        tags: &IndexMap<String, String>,
    ) -> Result<()> {
        let predicates: Vec<String> = tags
            .iter()
            .map(|(key, value)| format!("{key} = '{value}'"))
            .collect();
        let mut query = format!("drop series from \"{measurement}\"");
        if !predicates.is_empty() {
            query.push_str(" where ");
            query.push_str(&predicates.join(" and "));
        }
        self.run_query(&query, None).await?;
        Ok(())
    }
}

/// Render one batch as line protocol.
fn line_protocol(batch: &PointBatch, precision: Option<TimePrecision>) -> String {
    let mut lines = Vec::with_capacity(batch.points.len());
    let mut prefix = escape_identifier(&batch.measurement);
    for (key, value) in &batch.tags {
        prefix.push(',');
        prefix.push_str(&escape_identifier(key));
        prefix.push('=');
        prefix.push_str(&escape_identifier(value));
    }
    for point in &batch.points {
        let timestamp = match precision {
            Some(precision) => precision.epoch(point.time),
            None => point.time.timestamp_nanos_opt().unwrap_or_default(),
        };
        lines.push(format!(
            "{prefix} value={} {timestamp}",
            field_literal(&point.value)
        ));
    }
    lines.join("\n")
}

fn escape_identifier(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn field_literal(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => format!("{i}i"),
        Value::Float(f) => f.to_string(),
        Value::Text(t) => format!("\"{}\"", t.replace('"', "\\\"")),
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<WireSeries>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSeries {
    name: String,
    #[serde(default)]
    tags: IndexMap<String, String>,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl WireSeries {
    fn into_raw_series(self) -> Result<RawSeries> {
        let time_index = self.columns.iter().position(|c| c == "time");
        let value_index = self.columns.iter().position(|c| c == "value");
        let (time_index, value_index) = match (time_index, value_index) {
            (Some(t), Some(v)) => (t, v),
            _ => {
                return Err(EngineError::InvalidResponse(format!(
                    "series {} missing time/value columns: {:?}",
                    self.name, self.columns
                )));
            }
        };
        let mut values = Vec::with_capacity(self.values.len());
        for row in self.values {
            if row.len() <= time_index.max(value_index) {
                return Err(EngineError::InvalidResponse(format!(
                    "series {} has a short row", self.name
                )));
            }
            values.push((row[time_index].clone(), row[value_index].clone()));
        }
        Ok(RawSeries {
            measurement: self.name,
            tags: self.tags,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_instant;
    use crate::tsdb::Point;

    #[test]
    fn test_line_protocol_rendering() {
        let mut tags = IndexMap::new();
        tags.insert("datacenter".to_string(), "dc 1".to_string());
        tags.insert("device".to_string(), "s1".to_string());
        let batch = PointBatch {
            measurement: "temperature".to_string(),
            tags,
            points: vec![
                Point {
                    time: parse_instant("2026-01-02 00:00:00").unwrap(),
                    value: Value::Float(21.5),
                },
                Point {
                    time: parse_instant("2026-01-02 00:01:00").unwrap(),
                    value: Value::Int(3),
                },
            ],
        };
        let body = line_protocol(&batch, Some(TimePrecision::Seconds));
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("temperature,datacenter=dc\\ 1,device=s1 value=21.5 "));
        assert!(lines[1].contains("value=3i "));
    }

    #[test]
    fn test_wire_series_parsing() {
        let wire: WireSeries = serde_json::from_value(serde_json::json!({
            "name": "temperature",
            "tags": {"device": "s1"},
            "columns": ["time", "value"],
            "values": [[60, 21.0], [120, null]]
        }))
        .unwrap();
        let raw = wire.into_raw_series().unwrap();
        assert_eq!(raw.measurement, "temperature");
        assert_eq!(raw.tags["device"], "s1");
        assert_eq!(raw.values.len(), 2);
        assert!(raw.values[1].1.is_null());
    }

    #[test]
    fn test_wire_series_missing_columns() {
        let wire: WireSeries = serde_json::from_value(serde_json::json!({
            "name": "temperature",
            "columns": ["time", "count"],
            "values": []
        }))
        .unwrap();
        assert!(matches!(
            wire.into_raw_series(),
            Err(EngineError::InvalidResponse(_))
        ));
    }
}
