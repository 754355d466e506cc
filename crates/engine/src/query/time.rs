//! Time literals, precisions, and timestamp conversion
//!
//! Time bounds accept two grammars: a relative offset grammar
//! (`[+-]N<unit>` chained with `+`/`-`, anchored to `now()` when no
//! absolute base is given) and an absolute calendar grammar. The relative
//! grammar is recognized by regex before falling back to calendar parsing.

use crate::error::{EngineError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Closed set of epoch precisions understood by the store.
///
/// When no precision is requested timestamps stay full calendar instants;
/// with a precision they become integer counts of that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimePrecision {
    #[serde(rename = "u")]
    Microseconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
}

impl TimePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePrecision::Microseconds => "u",
            TimePrecision::Milliseconds => "ms",
            TimePrecision::Seconds => "s",
            TimePrecision::Minutes => "m",
            TimePrecision::Hours => "h",
        }
    }

    /// Integer count of this unit for `timestamp`.
    pub fn epoch(&self, timestamp: DateTime<Utc>) -> i64 {
        match self {
            TimePrecision::Microseconds => timestamp.timestamp_micros(),
            TimePrecision::Milliseconds => timestamp.timestamp_millis(),
            TimePrecision::Seconds => timestamp.timestamp(),
            TimePrecision::Minutes => timestamp.timestamp() / 60,
            TimePrecision::Hours => timestamp.timestamp() / 3600,
        }
    }

    /// Instant for an integer count of this unit.
    pub fn instant(&self, epoch: i64) -> Result<DateTime<Utc>> {
        let timestamp = match self {
            TimePrecision::Microseconds => Utc.timestamp_micros(epoch).single(),
            TimePrecision::Milliseconds => DateTime::from_timestamp_millis(epoch),
            TimePrecision::Seconds => DateTime::from_timestamp(epoch, 0),
            TimePrecision::Minutes => DateTime::from_timestamp(epoch * 60, 0),
            TimePrecision::Hours => DateTime::from_timestamp(epoch * 3600, 0),
        };
        timestamp
            .ok_or_else(|| EngineError::InvalidParameter(format!("epoch {epoch} out of range")))
    }

    /// A span of `seconds` expressed in this unit, for interval arithmetic
    /// against epoch timestamps.
    pub fn timedelta(&self, seconds: u64) -> i64 {
        let seconds = seconds as i64;
        match self {
            TimePrecision::Microseconds => seconds * 1_000_000,
            TimePrecision::Milliseconds => seconds * 1_000,
            TimePrecision::Seconds => seconds,
            TimePrecision::Minutes => seconds / 60,
            TimePrecision::Hours => seconds / 3600,
        }
    }
}

impl fmt::Display for TimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePrecision {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "u" => Ok(TimePrecision::Microseconds),
            "ms" => Ok(TimePrecision::Milliseconds),
            "s" => Ok(TimePrecision::Seconds),
            "m" => Ok(TimePrecision::Minutes),
            "h" => Ok(TimePrecision::Hours),
            other => Err(EngineError::InvalidParameter(format!(
                "unknown time precision {other}"
            ))),
        }
    }
}

fn relative_grammar() -> &'static Regex {
    static RELATIVE: OnceLock<Regex> = OnceLock::new();
    RELATIVE.get_or_init(|| {
        Regex::new(
            r"^(now\(\))?\s*[+-]?\s*\d+(u|ms|s|m|h|d|w)(\s*[+-]\s*\d+(u|ms|s|m|h|d|w))*$",
        )
        .expect("relative time grammar")
    })
}

fn offset_spacing() -> &'static Regex {
    static SPACING: OnceLock<Regex> = OnceLock::new();
    SPACING.get_or_init(|| Regex::new(r"\s*([+-])\s*").expect("offset spacing"))
}

/// Compile a caller-supplied time bound into a store literal.
///
/// A leading `+`/`-` anchors the offset chain to `now()`. Anything not
/// matching the relative grammar must parse as a calendar instant and is
/// emitted as a quoted string literal.
pub fn time_literal(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EngineError::InvalidParameter(
            "empty time literal".to_string(),
        ));
    }
    let anchored = if raw.starts_with('+') || raw.starts_with('-') {
        format!("now(){raw}")
    } else {
        raw.to_string()
    };
    if anchored == "now()" || relative_grammar().is_match(&anchored) {
        return Ok(offset_spacing().replace_all(&anchored, " $1 ").into_owned());
    }
    let instant = parse_instant(raw)?;
    Ok(format!("'{}'", instant.format("%Y-%m-%d %H:%M:%S%.f UTC")))
}

/// Parse an absolute calendar timestamp in any of the accepted spellings.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f UTC",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(EngineError::InvalidParameter(format!(
        "cannot parse timestamp {raw}"
    )))
}

/// Convert one raw store timestamp (string instant or epoch integer at the
/// given precision) into a typed instant.
pub fn convert_timestamp(
    raw: &serde_json::Value,
    precision: Option<TimePrecision>,
) -> Result<DateTime<Utc>> {
    match (precision, raw) {
        (Some(precision), serde_json::Value::Number(number)) => {
            let epoch = number.as_i64().ok_or_else(|| {
                EngineError::InvalidResponse(format!("timestamp {number} is not an integer"))
            })?;
            precision.instant(epoch)
        }
        (None, serde_json::Value::String(text)) => parse_instant(text),
        // some stores return epoch numbers even without a requested
        // precision; treat them as nanoseconds
        (None, serde_json::Value::Number(number)) => {
            let nanos = number.as_i64().ok_or_else(|| {
                EngineError::InvalidResponse(format!("timestamp {number} is not an integer"))
            })?;
            Ok(Utc.timestamp_nanos(nanos))
        }
        (_, other) => Err(EngineError::InvalidResponse(format!(
            "unexpected timestamp value {other}"
        ))),
    }
}

/// Format a typed instant for output: an integer count at the requested
/// precision, or a full calendar instant when none is requested.
pub fn format_timestamp(
    timestamp: DateTime<Utc>,
    precision: Option<TimePrecision>,
) -> serde_json::Value {
    match precision {
        Some(precision) => serde_json::Value::from(precision.epoch(timestamp)),
        None => serde_json::Value::from(timestamp.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_literals() {
        assert_eq!(time_literal("-1h").unwrap(), "now() - 1h");
        assert_eq!(time_literal("+30m").unwrap(), "now() + 30m");
        assert_eq!(time_literal("now()").unwrap(), "now()");
        assert_eq!(time_literal("now()-1d+2h").unwrap(), "now() - 1d + 2h");
        assert_eq!(time_literal("5m - 30s").unwrap(), "5m - 30s");
    }

    #[test]
    fn test_absolute_literals_are_quoted() {
        let literal = time_literal("2026-01-02T03:04:05Z").unwrap();
        assert!(literal.starts_with('\''), "literal was {literal}");
        assert!(literal.contains("2026-01-02 03:04:05"));
        assert!(time_literal("not a time").is_err());
    }

    #[test]
    fn test_precision_epoch_round_trip() {
        let instant = parse_instant("2026-01-02 03:04:05").unwrap();
        for precision in [
            TimePrecision::Microseconds,
            TimePrecision::Milliseconds,
            TimePrecision::Seconds,
        ] {
            let epoch = precision.epoch(instant);
            assert_eq!(precision.instant(epoch).unwrap(), instant);
        }
        // minute/hour precision truncates
        let epoch = TimePrecision::Minutes.epoch(instant);
        assert_eq!(
            TimePrecision::Minutes.instant(epoch).unwrap(),
            parse_instant("2026-01-02 03:04:00").unwrap()
        );
    }

    #[test]
    fn test_convert_timestamp_shapes() {
        let instant = convert_timestamp(
            &serde_json::json!(1_700_000_000),
            Some(TimePrecision::Seconds),
        )
        .unwrap();
        assert_eq!(instant.timestamp(), 1_700_000_000);

        let instant =
            convert_timestamp(&serde_json::json!("2026-01-02T00:00:00Z"), None).unwrap();
        assert_eq!(instant, parse_instant("2026-01-02").unwrap());

        assert!(convert_timestamp(&serde_json::json!(true), None).is_err());
    }

    #[test]
    fn test_timedelta_scaling() {
        assert_eq!(TimePrecision::Seconds.timedelta(90), 90);
        assert_eq!(TimePrecision::Milliseconds.timedelta(2), 2_000);
        assert_eq!(TimePrecision::Minutes.timedelta(120), 2);
        assert_eq!(TimePrecision::Hours.timedelta(7200), 2);
    }

    #[test]
    fn test_format_timestamp() {
        let instant = parse_instant("2026-01-02 03:04:05").unwrap();
        assert_eq!(
            format_timestamp(instant, Some(TimePrecision::Seconds)),
            serde_json::json!(instant.timestamp())
        );
        assert_eq!(
            format_timestamp(instant, None),
            serde_json::json!(instant.to_rfc3339())
        );
    }
}
