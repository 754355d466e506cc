//! Ordinary-least-squares linear model, one estimator per output column,
//! solved through the normal equations with Gaussian elimination.

use crate::error::{EngineError, Result};
use crate::series::{Series, SeriesKey, SeriesTable, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Coefficients {
    inputs: Vec<SeriesKey>,
    // per output column: intercept followed by one weight per input
    #[serde(with = "indexmap::map::serde_seq")]
    outputs: IndexMap<SeriesKey, Vec<f64>>,
}

#[derive(Debug, Default)]
pub struct LinearModel {
    coefficients: Coefficients,
}

impl LinearModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(input: &SeriesTable) -> Result<Vec<(chrono::DateTime<chrono::Utc>, Vec<f64>)>> {
        let keys: Vec<SeriesKey> = input.keys().cloned().collect();
        let mut rows = Vec::new();
        for timestamp in input.timestamps() {
            if !input.row_complete(timestamp) {
                continue;
            }
            let mut features = vec![1.0];
            for key in &keys {
                let value = input
                    .column(key)
                    .and_then(|series| series.get(&timestamp))
                    .and_then(|value| value.as_f64())
                    .ok_or_else(|| {
                        EngineError::InvalidParameter(format!(
                            "non-numeric value for {key} at {timestamp}"
                        ))
                    })?;
                features.push(value);
            }
            rows.push((timestamp, features));
        }
        Ok(rows)
    }
}

impl super::Model for LinearModel {
    fn train(&mut self, input: &SeriesTable, output: &SeriesTable) -> Result<()> {
        let rows = Self::rows(input)?;
        if rows.is_empty() {
            return Err(EngineError::InvalidParameter(
                "no complete rows to train on".to_string(),
            ));
        }
        let width = rows[0].1.len();
        self.coefficients = Coefficients {
            inputs: input.keys().cloned().collect(),
            outputs: IndexMap::new(),
        };
        for (key, series) in output.iter() {
            // X^T X and X^T y over rows where the target is defined
            let mut xtx = vec![vec![0.0; width]; width];
            let mut xty = vec![0.0; width];
            let mut samples = 0usize;
            for (timestamp, features) in &rows {
                let Some(target) = series.get(timestamp).and_then(|value| value.as_f64()) else {
                    continue;
                };
                samples += 1;
                for i in 0..width {
                    xty[i] += features[i] * target;
                    for j in 0..width {
                        xtx[i][j] += features[i] * features[j];
                    }
                }
            }
            if samples < width {
                return Err(EngineError::InvalidParameter(format!(
                    "{samples} samples for {key} cannot determine {width} coefficients"
                )));
            }
            let weights = solve(xtx, xty).ok_or_else(|| {
                EngineError::InvalidParameter(format!("singular normal equations for {key}"))
            })?;
            self.coefficients.outputs.insert(key.clone(), weights);
        }
        info!(
            inputs = self.coefficients.inputs.len(),
            outputs = self.coefficients.outputs.len(),
            "linear model fitted"
        );
        Ok(())
    }

    fn apply(&self, input: &SeriesTable) -> Result<SeriesTable> {
        if self.coefficients.outputs.is_empty() {
            return Err(EngineError::InvalidParameter(
                "model has not been trained".to_string(),
            ));
        }
        let aligned = input.project(&self.coefficients.inputs);
        let mut predictions = SeriesTable::new();
        for (key, weights) in &self.coefficients.outputs {
            let mut series = Series::new();
            for (timestamp, features) in Self::rows(&aligned)? {
                let value: f64 = weights
                    .iter()
                    .zip(&features)
                    .map(|(weight, feature)| weight * feature)
                    .sum();
                series.insert(timestamp, Value::Float(value));
            }
            predictions.insert_column(key.clone(), series);
        }
        Ok(predictions)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.coefficients)?;
        fs::write(path, json)
            .map_err(|e| EngineError::InvalidParameter(format!("cannot write {path:?}: {e}")))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let json = fs::read_to_string(path)
            .map_err(|e| EngineError::RecordNotExists(format!("cannot read {path:?}: {e}")))?;
        self.coefficients = serde_json::from_str(&json)?;
        Ok(())
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting. Returns
/// `None` when the system is singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for column in 0..n {
        let pivot = (column..n).max_by(|&i, &j| {
            a[i][column]
                .abs()
                .partial_cmp(&a[j][column].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][column].abs() < 1e-12 {
            return None;
        }
        a.swap(column, pivot);
        b.swap(column, pivot);
        for row in column + 1..n {
            let factor = a[row][column] / a[column][column];
            for k in column..n {
                a[row][k] -= factor * a[column][k];
            }
            b[row] -= factor * b[column];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for column in row + 1..n {
            sum -= a[row][column] * x[column];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
