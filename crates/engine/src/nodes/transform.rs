//! Named per-node series transforms
//!
//! A derived node's series is computed from its base node's series by a
//! named transformer on the way into the model and mapped back by the
//! inverse on the way out. "default" is the identity.

use crate::series::Series;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Closed set of series transforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Default,
    Shift,
    Unshift,
}

impl TransformKind {
    pub fn inverse(&self) -> TransformKind {
        match self {
            TransformKind::Default => TransformKind::Default,
            TransformKind::Shift => TransformKind::Unshift,
            TransformKind::Unshift => TransformKind::Shift,
        }
    }

    /// Apply the transform with `interval` as the sampling cadence.
    pub fn apply(&self, series: &Series, interval: Duration) -> Series {
        match self {
            TransformKind::Default => series.clone(),
            TransformKind::Shift => shift(series, interval),
            TransformKind::Unshift => unshift(series, interval),
        }
    }
}

/// Advance the series by one sampling interval and drop the now-undefined
/// last row.
fn shift(series: &Series, interval: Duration) -> Series {
    let mut shifted: Series = series
        .iter()
        .map(|(timestamp, value)| (*timestamp + interval, value.clone()))
        .collect();
    if let Some(last) = shifted.keys().next_back().copied() {
        shifted.remove(&last);
    }
    shifted
}

/// Shift the series back by one interval and drop the now-undefined first
/// row.
fn unshift(series: &Series, interval: Duration) -> Series {
    let mut unshifted: Series = series
        .iter()
        .map(|(timestamp, value)| (*timestamp - interval, value.clone()))
        .collect();
    if let Some(first) = unshifted.keys().next().copied() {
        unshifted.remove(&first);
    }
    unshifted
}
