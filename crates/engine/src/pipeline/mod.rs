//! Node transform pipeline
//!
//! Stage functions over a [`SeriesTable`] keyed by node identity. The
//! forward order for train/test is filter, merge, transform, normalize,
//! clean; the inverse applied to model output is denormalize, detransform,
//! clean. Each stage returns a fresh table so a caller always holds the
//! pre-stage data too.

pub mod driver;
pub mod variants;

pub use driver::{ModelConfig, ModelPipeline};
pub use variants::{variant_registry, ModelVariant, VariantRegistry};

use crate::error::{EngineError, Result};
use crate::nodes::{NodeSet, NodeSpec};
use crate::series::{Series, SeriesKey, SeriesTable, Value};
use chrono::Duration;
use tracing::debug;

/// Project the fetched table down to exactly the raw series the node list
/// needs, in fetch order.
pub fn filter_nodes(table: &SeriesTable, set: &NodeSet, keys: &[SeriesKey]) -> Result<SeriesTable> {
    let unmerged = set.unmerged(keys)?;
    Ok(table.project(&unmerged))
}

/// Re-key the table by the node list itself, aggregating composite nodes by
/// summing their sub-node columns. A timestamp missing in any sub-column is
/// skipped; a composite whose sub-table is empty contributes an empty
/// column.
pub fn merge_nodes(table: &SeriesTable, set: &NodeSet, keys: &[SeriesKey]) -> Result<SeriesTable> {
    let mut merged = SeriesTable::new();
    for key in keys {
        let series = resolve_series(table, set, key)?;
        merged.insert_column(key.clone(), series);
    }
    Ok(merged)
}

fn resolve_series(table: &SeriesTable, set: &NodeSet, key: &SeriesKey) -> Result<Series> {
    let node = set.arena.get(key)?;
    match &node.spec {
        NodeSpec::Simple => Ok(table.column(key).cloned().unwrap_or_default()),
        // A derived node starts from its base's series; the transform stage
        // maps it under the derived key afterwards.
        NodeSpec::Derived { base, .. } => resolve_series(table, set, base),
        NodeSpec::Composite { children } => {
            let mut sub = SeriesTable::new();
            for child in children {
                sub.insert_column(child.clone(), resolve_series(table, set, child)?);
            }
            if sub.is_empty() {
                debug!(node = %key, "composite node skipped, no sub-node data");
                return Ok(Series::new());
            }
            let mut sum = Series::new();
            for timestamp in sub.timestamps() {
                if !sub.row_complete(timestamp) {
                    continue;
                }
                let mut total = 0.0;
                for (child, series) in sub.iter() {
                    let value = &series[&timestamp];
                    total += value.as_f64().ok_or_else(|| {
                        EngineError::InvalidParameter(format!(
                            "value {value:?} of {child} cannot be aggregated"
                        ))
                    })?;
                }
                sum.insert(timestamp, Value::Float(total));
            }
            Ok(sum)
        }
    }
}

/// Apply each derived node's transformer to its own column. Must run on a
/// merged table, where the derived key already holds its base's series.
pub fn transform_nodes(
    table: &SeriesTable,
    set: &NodeSet,
    keys: &[SeriesKey],
    interval: Duration,
) -> Result<SeriesTable> {
    let mut transformed = SeriesTable::new();
    for key in keys {
        let series = table.column(key).cloned().unwrap_or_default();
        let series = match &set.arena.get(key)?.spec {
            NodeSpec::Derived { transform, .. } => transform.apply(&series, interval),
            _ => series,
        };
        transformed.insert_column(key.clone(), series);
    }
    Ok(transformed)
}

/// Apply each derived node's inverse transformer and re-key the column to
/// the node's original identity, so results read in physical terms.
pub fn detransform_nodes(
    table: &SeriesTable,
    set: &NodeSet,
    keys: &[SeriesKey],
    interval: Duration,
) -> Result<SeriesTable> {
    let mut recovered = SeriesTable::new();
    for key in keys {
        let series = table.column(key).cloned().unwrap_or_default();
        let series = match &set.arena.get(key)?.spec {
            NodeSpec::Derived { inverse, .. } => inverse.apply(&series, interval),
            _ => series,
        };
        recovered.insert_column(set.original(key)?, series);
    }
    Ok(recovered)
}

fn node_stats(set: &NodeSet, key: &SeriesKey) -> Result<(f64, f64)> {
    let stats = &set.arena.get(key)?.stats;
    match (stats.mean, stats.deviation) {
        (Some(mean), Some(deviation)) if mean.is_finite() && deviation.is_finite() => {
            Ok((mean, deviation))
        }
        _ => Err(EngineError::InvalidParameter(format!(
            "node {key} has no mean/deviation, refresh statistics first"
        ))),
    }
}

fn numeric(key: &SeriesKey, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        EngineError::InvalidParameter(format!("value {value:?} of {key} is not numeric"))
    })
}

/// Z-score each column by its node's mean and deviation.
pub fn normalize(table: &SeriesTable, set: &NodeSet, keys: &[SeriesKey]) -> Result<SeriesTable> {
    let mut normalized = SeriesTable::new();
    for key in keys {
        let (mean, deviation) = node_stats(set, key)?;
        let mut series = Series::new();
        if let Some(column) = table.column(key) {
            for (timestamp, value) in column {
                let value = numeric(key, value)?;
                series.insert(*timestamp, Value::Float((value - mean) / deviation));
            }
        }
        normalized.insert_column(key.clone(), series);
    }
    Ok(normalized)
}

/// Inverse of [`normalize`]. The 0.1 added to the deviation keeps the
/// inverse defined when a deviation is zero or near-zero.
pub fn denormalize(table: &SeriesTable, set: &NodeSet, keys: &[SeriesKey]) -> Result<SeriesTable> {
    let mut denormalized = SeriesTable::new();
    for key in keys {
        let (mean, deviation) = node_stats(set, key)?;
        let mut series = Series::new();
        if let Some(column) = table.column(key) {
            for (timestamp, value) in column {
                let value = numeric(key, value)?;
                series.insert(*timestamp, Value::Float(value * (deviation + 0.1) + mean));
            }
        }
        denormalized.insert_column(key.clone(), series);
    }
    Ok(denormalized)
}

/// Inner-join the input and output tables on the time index, keeping only
/// timestamps at which every column of both tables has a value.
pub fn clean(input: &SeriesTable, output: &SeriesTable) -> (SeriesTable, SeriesTable) {
    let survivors: Vec<_> = input
        .timestamps()
        .intersection(&output.timestamps())
        .filter(|timestamp| input.row_complete(**timestamp) && output.row_complete(**timestamp))
        .copied()
        .collect();
    (input.restrict(&survivors), output.restrict(&survivors))
}

/// Forward stages for one node list: filter, merge, transform, normalize.
/// The caller pairs the result with the opposite list through [`clean`].
pub fn process(
    table: &SeriesTable,
    set: &NodeSet,
    keys: &[SeriesKey],
    interval: Duration,
) -> Result<SeriesTable> {
    let table = filter_nodes(table, set, keys)?;
    let table = merge_nodes(&table, set, keys)?;
    let table = transform_nodes(&table, set, keys, interval)?;
    normalize(&table, set, keys)
}

/// Full forward pipeline over an input/output table pair.
pub fn process_pair(
    input: &SeriesTable,
    output: &SeriesTable,
    set: &NodeSet,
    interval: Duration,
) -> Result<(SeriesTable, SeriesTable)> {
    let input = process(input, set, &set.input, interval)?;
    let output = process(output, set, &set.output, interval)?;
    Ok(clean(&input, &output))
}

/// Inverse stages applied to model output: denormalize, detransform, drop
/// rows left incomplete by the boundary-dropping transforms.
pub fn recover(
    table: &SeriesTable,
    set: &NodeSet,
    keys: &[SeriesKey],
    interval: Duration,
) -> Result<SeriesTable> {
    let table = denormalize(table, set, keys)?;
    let table = detransform_nodes(&table, set, keys, interval)?;
    Ok(table.drop_incomplete_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AttributeSummary, DeviceType, ValueType};
    use crate::nodes::{Node, NodeSpec, TransformKind};
    use crate::query::parse_instant;
    use chrono::{DateTime, Utc};

    fn key(device: &str) -> SeriesKey {
        SeriesKey::new(DeviceType::SensorAttribute, "temperature", device)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        parse_instant(&format!("2026-01-02 03:{minute:02}:00")).unwrap()
    }

    fn attribute(mean: f64, deviation: f64) -> AttributeSummary {
        let mut attribute = AttributeSummary::new(ValueType::Continuous);
        attribute.mean = Some(mean);
        attribute.deviation = Some(deviation);
        attribute
    }

    fn float_at(table: &SeriesTable, key: &SeriesKey, timestamp: DateTime<Utc>) -> f64 {
        table.column(key).unwrap()[&timestamp].as_f64().unwrap()
    }

    #[test]
    fn test_merge_sums_complete_rows_only() {
        let s1 = Node::simple(key("s1"), &attribute(20.0, 2.0));
        let s2 = Node::simple(key("s2"), &attribute(20.0, 2.0));
        let total = Node {
            key: key("total"),
            stats: s1.stats.clone(),
            spec: NodeSpec::Composite {
                children: vec![key("s1"), key("s2")],
            },
        };
        let set = NodeSet::new(vec![s1, s2, total], Vec::new());

        let mut raw = SeriesTable::new();
        raw.insert_value(&key("s1"), at(0), Value::Float(21.0));
        raw.insert_value(&key("s1"), at(1), Value::Float(22.0));
        raw.insert_value(&key("s2"), at(0), Value::Float(19.0));

        let merged = merge_nodes(&raw, &set, &[key("total")]).unwrap();
        let column = merged.column(&key("total")).unwrap();
        assert_eq!(column.len(), 1);
        assert_eq!(column[&at(0)], Value::Float(40.0));
    }

    #[test]
    fn test_empty_composite_contributes_nothing() {
        let s1 = Node::simple(key("s1"), &attribute(20.0, 2.0));
        let total = Node {
            key: key("total"),
            stats: s1.stats.clone(),
            spec: NodeSpec::Composite {
                children: vec![key("s1")],
            },
        };
        let set = NodeSet::new(vec![s1, total], Vec::new());

        let merged = merge_nodes(&SeriesTable::new(), &set, &[key("total")]).unwrap();
        assert!(merged.column(&key("total")).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_denormalize_with_deviation_guard() {
        let set = NodeSet::new(vec![Node::simple(key("s1"), &attribute(20.0, 2.0))], Vec::new());
        let mut table = SeriesTable::new();
        table.insert_value(&key("s1"), at(0), Value::Float(21.0));

        let normalized = normalize(&table, &set, &set.input).unwrap();
        assert!((float_at(&normalized, &key("s1"), at(0)) - 0.5).abs() < 1e-9);

        let recovered = denormalize(&normalized, &set, &set.input).unwrap();
        // 0.5 * (2.0 + 0.1) + 20.0
        assert!((float_at(&recovered, &key("s1"), at(0)) - 21.05).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_requires_statistics() {
        let set = NodeSet::new(
            vec![Node::simple(key("s1"), &AttributeSummary::new(ValueType::Continuous))],
            Vec::new(),
        );
        let mut table = SeriesTable::new();
        table.insert_value(&key("s1"), at(0), Value::Float(21.0));
        assert!(normalize(&table, &set, &set.input).is_err());
    }

    #[test]
    fn test_clean_inner_joins_on_time() {
        let mut input = SeriesTable::new();
        input.insert_value(&key("s1"), at(0), Value::Float(1.0));
        input.insert_value(&key("s1"), at(1), Value::Float(2.0));
        let mut output = SeriesTable::new();
        output.insert_value(&key("s2"), at(1), Value::Float(3.0));
        output.insert_value(&key("s2"), at(2), Value::Float(4.0));

        let (input, output) = clean(&input, &output);
        assert_eq!(input.column(&key("s1")).unwrap().len(), 1);
        assert_eq!(output.column(&key("s2")).unwrap().len(), 1);
        assert!(input.column(&key("s1")).unwrap().contains_key(&at(1)));
    }

    #[test]
    fn test_transform_then_detransform_rekeys_to_original() {
        let base = Node::simple(key("s1"), &attribute(20.0, 2.0));
        let shifted = Node::derived(
            key("shifted_s1"),
            &base,
            TransformKind::Shift,
            TransformKind::Unshift,
        );
        let set = NodeSet::new(vec![base, shifted], Vec::new());
        let interval = Duration::seconds(60);

        let mut raw = SeriesTable::new();
        for minute in 0..3 {
            raw.insert_value(&key("s1"), at(minute), Value::Float(f64::from(minute)));
        }

        let merged = merge_nodes(&raw, &set, &[key("shifted_s1")]).unwrap();
        let transformed = transform_nodes(&merged, &set, &[key("shifted_s1")], interval).unwrap();
        // shift advances timestamps and drops the trailing row
        let column = transformed.column(&key("shifted_s1")).unwrap();
        assert_eq!(column.len(), 2);
        assert_eq!(column[&at(1)], Value::Float(0.0));

        let recovered =
            detransform_nodes(&transformed, &set, &[key("shifted_s1")], interval).unwrap();
        let column = recovered.column(&key("s1")).unwrap();
        assert_eq!(column.len(), 1);
        assert_eq!(column[&at(0)], Value::Float(0.0));
    }
}
