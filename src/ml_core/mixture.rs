//! Gaussian mixture density for likelihood-based outlier scoring
//!
//! Fitting is delegated to linfa-clustering's EM implementation; the fitted
//! weights, means and full covariances are captured in [`MixtureDensity`],
//! which owns the per-sample log-likelihood computation and is the unit that
//! gets persisted.

use linfa::prelude::*;
use linfa_clustering::GaussianMixtureModel;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use crate::ml_core::feature::{validate_features, validate_width};
use crate::utils::AnalysisError;

/// Hyperparameters for the mixture fit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureParams {
    /// Number of Gaussian components
    pub n_components: usize,
    pub max_n_iterations: u64,
    /// Number of EM restarts; the best log-likelihood wins
    pub n_runs: u64,
    pub tolerance: f64,
    /// Added to covariance diagonals to keep them positive definite
    pub reg_covariance: f64,
}

impl Default for MixtureParams {
    fn default() -> Self {
        Self {
            n_components: 1,
            max_n_iterations: 100,
            n_runs: 1,
            tolerance: 1e-3,
            reg_covariance: 1e-6,
        }
    }
}

impl MixtureParams {
    pub fn with_components(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }
}

/// A fitted mixture of full-covariance Gaussians
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixtureDensity {
    weights: Array1<f64>,
    means: Array2<f64>,
    covariances: Array3<f64>,
}

impl MixtureDensity {
    /// Fit a mixture on `features` (rows=samples, cols=features)
    ///
    /// # Returns
    /// * `Ok(density)` - Fitted mixture
    /// * `Err(AnalysisError)` - If validation or EM fails
    pub fn fit(features: &Array2<f64>, params: &MixtureParams) -> Result<Self, AnalysisError> {
        validate_features(features)?;

        if params.n_components == 0 {
            return Err(AnalysisError::ValidationError(
                "n_components must be > 0".to_string(),
            ));
        }

        if params.n_components > features.nrows() {
            return Err(AnalysisError::ValidationError(format!(
                "n_components ({}) cannot exceed number of samples ({})",
                params.n_components,
                features.nrows()
            )));
        }

        // linfa needs records + targets, we use unit targets for unsupervised
        let targets = Array1::from_elem(features.nrows(), ());
        let dataset = Dataset::new(features.clone(), targets);

        let model = GaussianMixtureModel::<f64>::params(params.n_components)
            .n_runs(params.n_runs)
            .max_n_iterations(params.max_n_iterations)
            .tolerance(params.tolerance)
            .reg_covariance(params.reg_covariance)
            .fit(&dataset)
            .map_err(|e| AnalysisError::ModelError(format!("Gaussian mixture fit failed: {}", e)))?;

        debug!(
            n_components = params.n_components,
            n_samples = features.nrows(),
            "Gaussian mixture fitted"
        );

        Self::new(
            model.weights().to_owned(),
            model.means().to_owned(),
            model.covariances().to_owned(),
        )
    }

    /// Assemble a density from raw parameters, checking their shapes agree
    pub fn new(
        weights: Array1<f64>,
        means: Array2<f64>,
        covariances: Array3<f64>,
    ) -> Result<Self, AnalysisError> {
        let (n_components, n_features) = means.dim();
        if weights.len() != n_components || covariances.dim() != (n_components, n_features, n_features) {
            return Err(AnalysisError::ModelError(format!(
                "inconsistent mixture shapes: weights {:?}, means {:?}, covariances {:?}",
                weights.dim(),
                means.dim(),
                covariances.dim()
            )));
        }
        Ok(Self {
            weights,
            means,
            covariances,
        })
    }

    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    /// Mixing weight of each component
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Log-likelihood of each sample under the mixture
    pub fn score_samples(&self, features: &Array2<f64>) -> Result<Array1<f64>, AnalysisError> {
        validate_width(features, self.n_features())?;

        let d = self.n_features() as f64;
        let components: Vec<(usize, f64, Array2<f64>)> = self
            .covariances
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(k, _)| self.weights[*k] > 0.0)
            .map(|(k, cov)| {
                let chol = cholesky(cov).ok_or_else(|| {
                    AnalysisError::ModelError(format!(
                        "covariance of component {} is not positive definite",
                        k
                    ))
                })?;
                let log_det: f64 = chol.diag().iter().map(|v| v.ln()).sum::<f64>() * 2.0;
                let log_norm = self.weights[k].ln() - 0.5 * (d * (2.0 * PI).ln() + log_det);
                Ok((k, log_norm, chol))
            })
            .collect::<Result<_, AnalysisError>>()?;

        let scores = features
            .axis_iter(Axis(0))
            .map(|sample| {
                let per_component: Vec<f64> = components
                    .iter()
                    .map(|(k, log_norm, chol)| {
                        let centered = &sample - &self.means.row(*k);
                        let z = forward_substitute(chol, centered.view());
                        log_norm - 0.5 * z.dot(&z)
                    })
                    .collect();
                log_sum_exp(&per_component)
            })
            .collect();

        Ok(scores)
    }
}

/// Lower-triangular Cholesky factor, `None` if `a` is not positive definite
fn cholesky(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L z = b` for lower-triangular `L`
fn forward_substitute(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    z
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
