//! Unit conversion
//!
//! A closed registry of supported conversion pairs. Unknown pairs log and
//! pass the value through unconverted; conversion never fails a query.

use tracing::warn;

/// Registered conversion factors as (from, to, factor).
const CONVERSIONS: &[(&str, &str, f64)] = &[("w", "kw", 1e-3), ("kw", "w", 1e3)];

/// Convert `value` from the metadata unit to the requested unit.
///
/// Matching is case-insensitive; identical units are returned unchanged.
pub fn convert_unit(value: f64, from: &str, to: &str) -> f64 {
    let from = from.to_ascii_lowercase();
    let to = to.to_ascii_lowercase();
    if from == to {
        return value;
    }
    match CONVERSIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
    {
        Some((_, _, factor)) => value * factor,
        None => {
            warn!(%from, %to, "no conversion registered, passing value through");
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watt_kilowatt() {
        assert_eq!(convert_unit(1500.0, "w", "kw"), 1.5);
        assert_eq!(convert_unit(1.5, "kw", "w"), 1500.0);
        assert_eq!(convert_unit(1.5, "KW", "W"), 1500.0);
    }

    #[test]
    fn test_conversion_is_invertible() {
        for (from, to, _) in CONVERSIONS {
            let x = 123.456;
            let round_trip = convert_unit(convert_unit(x, from, to), to, from);
            assert!((round_trip - x).abs() < 1e-9);
        }
    }

    #[test]
    fn test_unknown_pair_passes_through() {
        assert_eq!(convert_unit(42.0, "c", "f"), 42.0);
        assert_eq!(convert_unit(42.0, "w", "w"), 42.0);
    }
}
