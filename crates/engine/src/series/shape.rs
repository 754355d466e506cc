//! Result shaping: raw store series to typed per-device columns
//!
//! Pivots per-device rows into a uniform series table keyed by
//! `(device_type, measurement, device)`, converting values according to
//! the measurement's declared type and converting units when the requested
//! unit differs from the metadata unit.

use crate::error::{EngineError, Result};
use crate::metadata::{DeviceType, ValueType};
use crate::query::{convert_timestamp, TimePrecision};
use crate::series::{convert_unit, SeriesKey, SeriesTable, Value};
use crate::tsdb::RawSeries;
use tracing::warn;

/// Convert one raw store value according to the declared value type.
///
/// Nulls are carried through as missing (`None`), never defaulted.
/// Unconvertible values raise `InvalidParameter` in strict mode and are
/// logged and dropped otherwise.
pub fn convert_value(
    raw: &serde_json::Value,
    value_type: ValueType,
    strict: bool,
) -> Result<Option<Value>> {
    if raw.is_null() {
        return Ok(None);
    }
    let converted = match value_type {
        ValueType::Binary => match raw {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
            _ => None,
        },
        ValueType::Continuous => match raw {
            serde_json::Value::Number(n) => n.as_f64().map(Value::Float),
            serde_json::Value::String(s) => s.parse::<f64>().ok().map(Value::Float),
            _ => None,
        },
        ValueType::Integer => match raw {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(Value::Int),
            serde_json::Value::String(s) => s.parse::<i64>().ok().map(Value::Int),
            _ => None,
        },
        ValueType::Discrete => match raw {
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            other => Some(Value::Text(other.to_string())),
        },
    };
    match converted {
        Some(value) => Ok(Some(value)),
        None if strict => Err(EngineError::InvalidParameter(format!(
            "cannot convert {raw} to {value_type:?}"
        ))),
        None => {
            warn!(value = %raw, ?value_type, "dropping unconvertible value");
            Ok(None)
        }
    }
}

/// Type-specific output formatting, applied in addition to unit
/// conversion: continuous values round to 2 decimal places and offset by
/// an optional running base, integer values offset by the base, binary and
/// discrete values pass through unchanged.
pub fn format_value(value: &Value, value_type: ValueType, base: Option<f64>) -> Value {
    match (value_type, value) {
        (ValueType::Continuous, Value::Float(f)) => {
            Value::Float((f * 100.0).round() / 100.0 + base.unwrap_or(0.0))
        }
        (ValueType::Integer, Value::Int(i)) => Value::Int(i + base.unwrap_or(0.0).round() as i64),
        _ => value.clone(),
    }
}

/// Shape raw store series for one (device_type, measurement) pair into a
/// partial series table.
///
/// Rows whose `device` tag is not in the expected `devices` set are
/// dropped, defending against over-broad pattern matches. `unit` is the
/// `(metadata_unit, requested_unit)` pair when a conversion is requested.
pub fn shape_series(
    raw: &[RawSeries],
    device_type: DeviceType,
    measurement: &str,
    devices: &[String],
    value_type: ValueType,
    unit: Option<(&str, &str)>,
    precision: Option<TimePrecision>,
) -> Result<SeriesTable> {
    let mut table = SeriesTable::new();
    for series in raw {
        let device = match series.tags.get("device") {
            Some(device) => device,
            None => {
                return Err(EngineError::InvalidResponse(format!(
                    "series {} has no device tag",
                    series.measurement
                )));
            }
        };
        if !devices.iter().any(|expected| expected == device) {
            warn!(
                measurement = %series.measurement,
                device = %device,
                "dropping series for unexpected device"
            );
            continue;
        }
        let key = SeriesKey::new(device_type, measurement, device);
        for (raw_time, raw_value) in &series.values {
            let timestamp = convert_timestamp(raw_time, precision)?;
            let value = match convert_value(raw_value, value_type, false)? {
                Some(value) => value,
                None => continue,
            };
            let value = match (unit, &value) {
                (Some((from, to)), Value::Float(f)) => Value::Float(convert_unit(*f, from, to)),
                _ => value,
            };
            table.insert_value(&key, timestamp, value);
        }
        // a device with only missing samples still gets a column
        table.ensure_column(key);
    }
    Ok(table)
}
