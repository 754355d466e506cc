//! Model boundary
//!
//! The pipeline hands a model normalized input/output tables and gets
//! predictions back in the same shape. Models are constructed through a
//! static name-indexed registry.

pub mod linear;

pub use linear::LinearModel;

use crate::error::{EngineError, Result};
use crate::series::{SeriesKey, SeriesTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Per-output-column fit quality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub mse: f64,
    pub r_squared: f64,
}

/// Result of a train or test run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub predictions: SeriesTable,
    pub expectations: SeriesTable,
    pub statistics: IndexMap<SeriesKey, ColumnStatistics>,
}

/// Estimator contract. Tables crossing this boundary are normalized and
/// cleaned; every input column has a value at every timestamp.
pub trait Model: Send {
    /// Fit on aligned input/output tables.
    fn train(&mut self, input: &SeriesTable, output: &SeriesTable) -> Result<()>;

    /// Predict output columns for each complete input row.
    fn apply(&self, input: &SeriesTable) -> Result<SeriesTable>;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Mean squared error between a prediction column and its expectation.
pub fn mean_squared_error(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    pairs
        .iter()
        .map(|(predicted, expected)| (predicted - expected).powi(2))
        .sum::<f64>()
        / pairs.len() as f64
}

/// Coefficient of determination. A total sum of squares below 0.01 means
/// the expectations are effectively constant, which would make the ratio
/// meaningless; the score is reported as 0 instead.
pub fn r_squared(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let mean = pairs.iter().map(|(_, expected)| expected).sum::<f64>() / pairs.len() as f64;
    let ss_tot: f64 = pairs
        .iter()
        .map(|(_, expected)| (expected - mean).powi(2))
        .sum();
    if ss_tot < 0.01 {
        return 0.0;
    }
    let ss_res: f64 = pairs
        .iter()
        .map(|(predicted, expected)| (expected - predicted).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

/// Per-column statistics over rows present in both tables.
pub fn evaluate(
    predictions: &SeriesTable,
    expectations: &SeriesTable,
) -> IndexMap<SeriesKey, ColumnStatistics> {
    let mut statistics = IndexMap::new();
    for (key, predicted) in predictions.iter() {
        let Some(expected) = expectations.column(key) else {
            continue;
        };
        let pairs: Vec<(f64, f64)> = predicted
            .iter()
            .filter_map(|(timestamp, value)| {
                let predicted = value.as_f64()?;
                let expected = expected.get(timestamp)?.as_f64()?;
                Some((predicted, expected))
            })
            .collect();
        statistics.insert(
            key.clone(),
            ColumnStatistics {
                mse: mean_squared_error(&pairs),
                r_squared: r_squared(&pairs),
            },
        );
    }
    statistics
}

type ModelConstructor = fn() -> Box<dyn Model>;

/// Name-indexed model constructors.
pub struct ModelRegistry {
    constructors: IndexMap<&'static str, ModelConstructor>,
}

impl ModelRegistry {
    fn new() -> Self {
        let mut constructors: IndexMap<&'static str, ModelConstructor> = IndexMap::new();
        constructors.insert("linear", || Box::new(LinearModel::new()));
        Self { constructors }
    }

    pub fn build(&self, name: &str) -> Result<Box<dyn Model>> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| EngineError::RecordNotExists(format!("model {name} does not exist")))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

/// The process-wide registry, assembled on first use.
pub fn model_registry() -> &'static ModelRegistry {
    static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ModelRegistry::new)
}
