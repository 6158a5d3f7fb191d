use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{DetectorConfig, ScalerMode};
use crate::detector::{
    ensure_parent_exists, AnomalyDetector, ArtifactPaths, DatasetKind, DetectorKind, DetectorState,
    Verdict,
};
use crate::ml_core::{MixtureDensity, MixtureParams};
use crate::utils::{load_artifact, save_artifact, AnalysisError, LoadOutcome};

const GMM_ARTIFACT: &str = "gaussian_mixture";

#[derive(Serialize, Deserialize)]
struct GmmArtifact {
    params: MixtureParams,
    density: MixtureDensity,
    threshold: Option<f64>,
}

/// Likelihood-based detector: low log-likelihood under the mixture is abnormal
#[derive(Debug, Clone)]
pub struct GmmDetector {
    state: DetectorState,
    default_params: MixtureParams,
    /// Set by `build_model`, consumed by `train_model`
    params: Option<MixtureParams>,
    model: Option<MixtureDensity>,
}

impl GmmDetector {
    pub fn new(dataset: DatasetKind, config: &DetectorConfig) -> Self {
        Self::with_artifacts(
            ArtifactPaths::new(DetectorKind::Classic, dataset, config.artifact_dir.clone()),
            config.scaler_mode,
            config.gmm.clone(),
        )
    }

    pub fn with_artifacts(artifacts: ArtifactPaths, scaler_mode: ScalerMode, default_params: MixtureParams) -> Self {
        Self {
            state: DetectorState::new(artifacts, scaler_mode),
            default_params,
            params: None,
            model: None,
        }
    }

    /// Hyperparameters from configuration, used when the caller has no preference
    pub fn default_params(&self) -> &MixtureParams {
        &self.default_params
    }

    pub fn model(&self) -> Option<&MixtureDensity> {
        self.model.as_ref()
    }
}

impl AnomalyDetector for GmmDetector {
    type Params = MixtureParams;
    type TrainOutput = ();

    fn kind(&self) -> DetectorKind {
        DetectorKind::Classic
    }

    fn state(&self) -> &DetectorState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DetectorState {
        &mut self.state
    }

    fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn build_model(&mut self, params: MixtureParams) -> Result<(), AnalysisError> {
        if params.n_components == 0 {
            return Err(AnalysisError::ValidationError(
                "n_components must be > 0".to_string(),
            ));
        }
        debug!(n_components = params.n_components, "Gaussian mixture built");
        self.params = Some(params);
        self.model = None;
        self.state.set_threshold(None);
        Ok(())
    }

    fn train_model(
        &mut self,
        x_train: &Array2<f64>,
        x_validation: Option<&Array2<f64>>,
    ) -> Result<(), AnalysisError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| AnalysisError::ModelNotBuilt("call build_model before train_model".to_string()))?;
        if x_validation.is_some() {
            debug!("validation data is not used by the Gaussian mixture");
        }

        info!(samples = x_train.nrows(), n_components = params.n_components, "training Gaussian mixture");
        let density = MixtureDensity::fit(x_train, &params)?;
        debug!(weights = ?density.weights().to_vec(), "mixture component weights");
        self.model = Some(density);
        // The previous threshold does not describe the new mixture
        self.state.set_threshold(None);

        self.save_model()?;
        self.determine_threshold(x_train)?;
        // Re-save so the artifact carries the threshold for later detection runs
        self.save_model()?;
        Ok(())
    }

    fn save_model(&self) -> Result<PathBuf, AnalysisError> {
        let density = self
            .model
            .as_ref()
            .ok_or_else(|| AnalysisError::ModelNotBuilt("no fitted Gaussian mixture to save".to_string()))?;
        let path = self.state.artifacts().model_path();
        ensure_parent_exists(&path)?;

        let artifact = GmmArtifact {
            params: self.params.clone().unwrap_or_else(|| self.default_params.clone()),
            density: density.clone(),
            threshold: self.state.threshold(),
        };
        save_artifact(&path, GMM_ARTIFACT, &artifact)?;
        info!(path = %path.display(), "GMM model saved");
        Ok(path)
    }

    fn load_model(&mut self) -> LoadOutcome<()> {
        let path = self.state.artifacts().model_path();
        let outcome = load_artifact::<GmmArtifact>(&path, GMM_ARTIFACT);
        let status = outcome.status();
        if let LoadOutcome::Loaded(artifact) = outcome {
            info!(path = %path.display(), "GMM model loaded successfully");
            self.params = Some(artifact.params);
            self.model = Some(artifact.density);
            if artifact.threshold.is_some() {
                self.state.set_threshold(artifact.threshold);
            }
        }
        status
    }

    fn score_samples(&self, features: &Array2<f64>) -> Result<Array1<f64>, AnalysisError> {
        self.model
            .as_ref()
            .ok_or_else(|| AnalysisError::ModelNotBuilt("Gaussian mixture is not fitted".to_string()))?
            .score_samples(features)
    }

    /// Log-likelihood above the threshold is typical, hence normal
    fn classify(&self, statistic: f64, threshold: f64) -> Verdict {
        if statistic > threshold {
            Verdict::Normal
        } else {
            Verdict::Abnormal
        }
    }
}
