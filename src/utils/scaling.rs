use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::utils::persistence::{load_artifact, save_artifact, LoadOutcome};
use crate::utils::AnalysisError;

const SCALER_ARTIFACT: &str = "scaler";

/// Scaling method for feature normalization
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    /// No scaling (data already preprocessed)
    None,
    /// MinMax scaling: (x - min) / (max - min) -> [0, 1]
    MinMax,
    /// Standard scaling: (x - mean) / std -> zero mean, unit variance
    Standard,
}

impl FromStr for ScalingMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "minmax" | "min_max" => Ok(Self::MinMax),
            "standard" => Ok(Self::Standard),
            other => Err(AnalysisError::ValidationError(format!(
                "unknown scaling method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScalingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMethod::None => write!(f, "none"),
            ScalingMethod::MinMax => write!(f, "minmax"),
            ScalingMethod::Standard => write!(f, "standard"),
        }
    }
}

/// A fitted per-column transform: `(x - offset) / scale`
///
/// A `scale` of zero marks a constant column; those are mapped to 0.0.
/// `columns` names the fitted columns in order, empty when unknown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    method: ScalingMethod,
    offsets: Array1<f64>,
    scales: Array1<f64>,
    #[serde(default)]
    columns: Vec<String>,
}

impl Scaler {
    /// Learn column parameters from `features`
    ///
    /// # Returns
    /// * `Ok(scaler)` - Fitted scaler
    /// * `Err(AnalysisError)` - If the matrix has no rows or no columns
    pub fn fit(features: &Array2<f64>, method: ScalingMethod) -> Result<Self, AnalysisError> {
        if features.nrows() == 0 || features.ncols() == 0 {
            return Err(AnalysisError::ValidationError(
                "cannot fit a scaler on an empty feature matrix".to_string(),
            ));
        }

        let n_cols = features.ncols();
        let (offsets, scales) = match method {
            ScalingMethod::None => (Array1::zeros(n_cols), Array1::ones(n_cols)),
            ScalingMethod::MinMax => {
                let mut offsets = Array1::zeros(n_cols);
                let mut scales = Array1::zeros(n_cols);
                for (col_idx, col) in features.axis_iter(Axis(1)).enumerate() {
                    let min = col.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = col.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    offsets[col_idx] = min;
                    scales[col_idx] = constant_guard(max - min);
                }
                (offsets, scales)
            }
            ScalingMethod::Standard => {
                let mut offsets = Array1::zeros(n_cols);
                let mut scales = Array1::zeros(n_cols);
                for (col_idx, col) in features.axis_iter(Axis(1)).enumerate() {
                    offsets[col_idx] = col.mean().unwrap_or(0.0);
                    scales[col_idx] = constant_guard(col.std(0.0));
                }
                (offsets, scales)
            }
        };

        Ok(Self {
            method,
            offsets,
            scales,
            columns: Vec::new(),
        })
    }

    /// Record the names of the fitted columns
    pub fn with_columns(mut self, columns: Vec<String>) -> Result<Self, AnalysisError> {
        if columns.len() != self.n_features() {
            return Err(AnalysisError::ValidationError(format!(
                "scaler was fitted on {} features, got {} column names",
                self.n_features(),
                columns.len()
            )));
        }
        self.columns = columns;
        Ok(self)
    }

    pub fn method(&self) -> ScalingMethod {
        self.method
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_features(&self) -> usize {
        self.offsets.len()
    }

    /// Apply the fitted transform to `features`
    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        if features.ncols() != self.n_features() {
            return Err(AnalysisError::ValidationError(format!(
                "scaler was fitted on {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }

        let mut scaled = features.clone();
        for (col_idx, mut col) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let offset = self.offsets[col_idx];
            let scale = self.scales[col_idx];
            if scale == 0.0 {
                col.fill(0.0);
            } else {
                col.mapv_inplace(|x| (x - offset) / scale);
            }
        }
        Ok(scaled)
    }

    /// Refit on `features` in place, then transform them
    pub fn fit_transform(&mut self, features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        let columns = std::mem::take(&mut self.columns);
        *self = Scaler {
            columns,
            ..Scaler::fit(features, self.method)?
        };
        self.transform(features)
    }

    pub fn save(&self, path: &Path) -> Result<(), AnalysisError> {
        save_artifact(path, SCALER_ARTIFACT, self)
    }

    pub fn load(path: &Path) -> LoadOutcome<Scaler> {
        load_artifact(path, SCALER_ARTIFACT)
    }
}

fn constant_guard(spread: f64) -> f64 {
    if spread.abs() < f64::EPSILON {
        0.0
    } else {
        spread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn min_max_scale(features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        Scaler::fit(features, ScalingMethod::MinMax)?.transform(features)
    }

    fn standard_scale(features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        Scaler::fit(features, ScalingMethod::Standard)?.transform(features)
    }

    #[test]
    fn test_scaling_method_from_str() {
        assert_eq!("none".parse::<ScalingMethod>().unwrap(), ScalingMethod::None);
        assert_eq!("MinMax".parse::<ScalingMethod>().unwrap(), ScalingMethod::MinMax);
        assert_eq!(
            "standard".parse::<ScalingMethod>().unwrap(),
            ScalingMethod::Standard
        );
        assert!("robust".parse::<ScalingMethod>().is_err());
    }

    #[test]
    fn test_min_max_scale_normal() {
        let features = arr2(&[[0.0, 10.0], [5.0, 20.0], [10.0, 30.0]]);
        let scaled = min_max_scale(&features).unwrap();

        // Column 0: min=0, max=10, range=10
        assert!((scaled[[0, 0]] - 0.0).abs() < 1e-10);
        assert!((scaled[[1, 0]] - 0.5).abs() < 1e-10);
        assert!((scaled[[2, 0]] - 1.0).abs() < 1e-10);

        // Column 1: min=10, max=30, range=20
        assert!((scaled[[0, 1]] - 0.0).abs() < 1e-10);
        assert!((scaled[[1, 1]] - 0.5).abs() < 1e-10);
        assert!((scaled[[2, 1]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_min_max_scale_constant_column() {
        let features = arr2(&[[5.0, 10.0], [5.0, 20.0], [5.0, 30.0]]);
        let scaled = min_max_scale(&features).unwrap();

        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[1, 0]], 0.0);
        assert_eq!(scaled[[2, 0]], 0.0);

        assert!((scaled[[0, 1]] - 0.0).abs() < 1e-10);
        assert!((scaled[[2, 1]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_standard_scale_normal() {
        let features = arr2(&[[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]]);
        let scaled = standard_scale(&features).unwrap();

        for col in 0..2 {
            let mean = scaled.column(col).mean().unwrap();
            let std = scaled.column(col).std(0.0);
            assert!(mean.abs() < 1e-10);
            assert!((std - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_transform_uses_fitted_parameters() {
        let train = arr2(&[[0.0], [10.0]]);
        let scaler = Scaler::fit(&train, ScalingMethod::MinMax).unwrap();

        // Values outside the fitted range are not clipped
        let scaled = scaler.transform(&arr2(&[[20.0], [-10.0], [5.0]])).unwrap();
        assert!((scaled[[0, 0]] - 2.0).abs() < 1e-10);
        assert!((scaled[[1, 0]] + 1.0).abs() < 1e-10);
        assert!((scaled[[2, 0]] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_fit_transform_refits_on_batch() {
        let mut scaler = Scaler::fit(&arr2(&[[0.0], [10.0]]), ScalingMethod::MinMax).unwrap();
        let scaled = scaler.fit_transform(&arr2(&[[100.0], [200.0]])).unwrap();
        assert_eq!(scaled, arr2(&[[0.0], [1.0]]));
    }

    #[test]
    fn test_transform_rejects_column_mismatch() {
        let scaler = Scaler::fit(&arr2(&[[1.0, 2.0]]), ScalingMethod::None).unwrap();
        assert!(scaler.transform(&arr2(&[[1.0]])).is_err());
    }

    #[test]
    fn test_fit_rejects_empty_matrix() {
        let features = Array2::<f64>::zeros((0, 3));
        assert!(Scaler::fit(&features, ScalingMethod::Standard).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("location_scaler.pkl");
        let scaler = Scaler::fit(
            &arr2(&[[1.0, -4.0], [3.0, 8.0], [7.0, 2.0]]),
            ScalingMethod::Standard,
        )
        .unwrap();

        scaler.save(&path).unwrap();
        let loaded = Scaler::load(&path).into_option().unwrap();
        assert_eq!(loaded, scaler);
    }

    #[test]
    fn test_column_names_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("velocity_scaler.pkl");
        let mut scaler = Scaler::fit(&arr2(&[[1.0, 2.0], [3.0, 5.0]]), ScalingMethod::MinMax)
            .unwrap()
            .with_columns(vec!["vx".to_string(), "vy".to_string()])
            .unwrap();

        scaler.save(&path).unwrap();
        let loaded = Scaler::load(&path).into_option().unwrap();
        assert_eq!(loaded.columns(), ["vx", "vy"]);

        scaler.fit_transform(&arr2(&[[0.0, 0.0], [1.0, 1.0]])).unwrap();
        assert_eq!(scaler.columns(), ["vx", "vy"]);
    }

    #[test]
    fn test_column_names_must_match_width() {
        let scaler = Scaler::fit(&arr2(&[[1.0, 2.0]]), ScalingMethod::None).unwrap();
        assert!(scaler.columns().is_empty());
        assert!(scaler.with_columns(vec!["only".to_string()]).is_err());
    }

    #[test]
    fn test_min_max_scale_negative_values() {
        let features = arr2(&[[-10.0], [0.0], [10.0]]);
        let scaled = min_max_scale(&features).unwrap();

        assert!((scaled[[0, 0]] - 0.0).abs() < 1e-10);
        assert!((scaled[[1, 0]] - 0.5).abs() < 1e-10);
        assert!((scaled[[2, 0]] - 1.0).abs() < 1e-10);
    }
}
