//! Statistics refresh
//!
//! Recomputes each measurement's mean/deviation (and the same for its
//! per-interval differentiation) from a historical window, then buffers the
//! rewritten datacenter metadata into the caller's session. Every other
//! stage divides by these deviations, so an all-missing window is a fatal
//! precondition failure, not a recoverable error.

use crate::error::Result;
use crate::metadata::{AttributeSummary, MetadataSession};
use crate::query::{measurement_selector, Filter, QuerySpec};
use crate::series::{shape_series, SeriesTable};
use crate::tsdb::TimeSeriesStore;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Historical window the statistics are drawn from, in the relative or
/// absolute time-literal grammar.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    pub starttime: String,
    pub endtime: String,
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self {
            starttime: "now() - 1w".to_string(),
            endtime: "now()".to_string(),
        }
    }
}

fn sample(table: &SeriesTable, interval: Duration) -> (Vec<f64>, Vec<f64>) {
    let mut values = Vec::new();
    let mut deltas = Vec::new();
    for (_, series) in table.iter() {
        let column: Vec<(DateTime<Utc>, f64)> = series
            .iter()
            .filter_map(|(timestamp, value)| value.as_f64().map(|v| (*timestamp, v)))
            .collect();
        // differentiation is per interval: samples across a gap are not
        // consecutive and produce no delta
        for pair in column.windows(2) {
            if pair[1].0 - pair[0].0 == interval {
                deltas.push(pair[1].1 - pair[0].1);
            }
        }
        values.extend(column.iter().map(|(_, value)| *value));
    }
    (values, deltas)
}

fn mean_and_deviation(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let deviation = variance.sqrt();
    (mean.is_finite() && deviation.is_finite()).then_some((mean, deviation))
}

fn bounds(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let max = values.iter().copied().fold(None, |max: Option<f64>, v| {
        Some(max.map_or(v, |m| m.max(v)))
    });
    let min = values.iter().copied().fold(None, |min: Option<f64>, v| {
        Some(min.map_or(v, |m| m.min(v)))
    });
    (max, min)
}

fn refresh_attribute(
    attribute: &mut AttributeSummary,
    table: &SeriesTable,
    name: &str,
    interval: Duration,
) {
    let (values, deltas) = sample(table, interval);
    let stats = mean_and_deviation(&values);
    assert!(
        stats.is_some(),
        "statistics for {name} are undefined, the window holds no data"
    );
    let (mean, deviation) = stats.unwrap_or_default();
    attribute.mean = Some(mean);
    attribute.deviation = Some(deviation);
    (attribute.max, attribute.min) = bounds(&values);

    match mean_and_deviation(&deltas) {
        Some((mean, deviation)) => {
            attribute.differentiation_mean = Some(mean);
            attribute.differentiation_deviation = Some(deviation);
            (attribute.differentiation_max, attribute.differentiation_min) = bounds(&deltas);
        }
        None => warn!(measurement = name, "window too short to differentiate"),
    }
}

/// Recompute every measurement's statistics for `datacenter` and buffer the
/// rewritten metadata into `session`; the caller decides when to commit.
pub async fn refresh_statistics(
    session: &mut MetadataSession<'_>,
    store: &dyn TimeSeriesStore,
    datacenter: &str,
    window: &StatsWindow,
) -> Result<()> {
    let mut metadata = session.datacenter_metadata(datacenter).await?;
    let interval = Duration::seconds(metadata.time_interval as i64);
    let precision = None;
    for (device_type, measurements) in metadata.device_types.iter_mut() {
        for (name, measurement) in measurements.iter_mut() {
            let mut spec = QuerySpec::new(&measurement_selector(
                name,
                measurement.attribute.pattern.as_deref(),
            ));
            spec.filter = Some(
                Filter::time_range(Some(&window.starttime), Some(&window.endtime))
                    .tag("datacenter", datacenter)
                    .tag("device", measurement.devices.clone()),
            );
            spec.group_by = vec!["device".to_string()];
            spec.order_by = vec!["time".to_string()];
            let raw = store.query(&spec.compile()?, precision).await?;
            let table = shape_series(
                &raw,
                *device_type,
                name,
                &measurement.devices,
                measurement.attribute.value_type,
                None,
                precision,
            )?;
            refresh_attribute(&mut measurement.attribute, &table, name, interval);
        }
    }
    info!(datacenter, "statistics refreshed");
    session.write_datacenter(datacenter, metadata);
    Ok(())
}
