use ndarray::Array1;

use crate::utils::AnalysisError;

/// Summary statistics of a per-sample anomaly statistic
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation (ddof = 0)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Statistics {
    /// Compute statistics over `values`
    pub fn compute(values: &Array1<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mean = values.mean()?;
        let std = values.std(0.0);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Statistics {
            count: values.len(),
            mean,
            std,
            min,
            max,
        })
    }

    /// Decision boundary: one standard deviation above the mean
    pub fn threshold(&self) -> f64 {
        self.mean + self.std
    }
}

/// Threshold for a per-sample statistic over training data
///
/// # Returns
/// * `Ok(threshold)` - mean + population std of `values`
/// * `Err(AnalysisError)` - If `values` is empty or contains NaN/Inf
pub fn mean_plus_std(values: &Array1<f64>) -> Result<f64, AnalysisError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::ModelError(
            "anomaly statistic contains NaN or Inf values".to_string(),
        ));
    }
    Statistics::compute(values)
        .map(|stats| stats.threshold())
        .ok_or_else(|| {
            AnalysisError::ValidationError(
                "cannot determine a threshold from an empty statistic".to_string(),
            )
        })
}
