//! Anomaly detector contract and its two strategies
//!
//! Both strategies share the same lifecycle: build an untrained model, train
//! it (which persists the model and determines the decision threshold), and
//! later detect anomalies on new batches, loading the persisted scaler and
//! model on demand.

pub mod deep_learning;
pub mod factory;
pub mod gmm;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::ScalerMode;
use crate::utils::{AnalysisError, LoadOutcome, Scaler};

pub use deep_learning::{DeepLearningDetector, TrainOptions};
pub use factory::{anomaly_detector, Detector, TrainReport};
pub use gmm::GmmDetector;

/// Detector strategy tag as used in configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Gaussian mixture model, tag `classic`
    Classic,
    /// Autoencoder, tag `deep_learning`
    DeepLearning,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::Classic => "classic",
            DetectorKind::DeepLearning => "deep_learning",
        }
    }
}

impl FromStr for DetectorKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classic" => Ok(DetectorKind::Classic),
            "deep_learning" => Ok(DetectorKind::DeepLearning),
            other => Err(AnalysisError::InvalidDetectorType(other.to_string())),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset identity selecting the persisted artifact names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Location,
    Velocity,
}

impl DatasetKind {
    /// `"location"` selects the location artifacts; any other name falls back to velocity
    pub fn from_name(name: &str) -> Self {
        if name == "location" {
            DatasetKind::Location
        } else {
            DatasetKind::Velocity
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Location => "location",
            DatasetKind::Velocity => "velocity",
        }
    }
}

/// File names of the persisted scaler and model, resolved against a directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub model_name: String,
    pub scaler_name: String,
}

impl ArtifactPaths {
    pub fn new(kind: DetectorKind, dataset: DatasetKind, dir: impl Into<PathBuf>) -> Self {
        let model_name = match kind {
            DetectorKind::Classic => format!("GMM_{}.pkl", dataset.as_str()),
            DetectorKind::DeepLearning => format!("DL_{}_model.h5", dataset.as_str()),
        };
        Self {
            dir: dir.into(),
            model_name,
            scaler_name: format!("{}_scaler.pkl", dataset.as_str()),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model_name)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(&self.scaler_name)
    }
}

/// Verdict for a single sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Abnormal,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Normal => write!(f, "Normal"),
            Verdict::Abnormal => write!(f, "Abnormal"),
        }
    }
}

/// Per-sample detection result
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Row index in the scored batch
    pub index: usize,
    /// Anomaly statistic (log-likelihood or reconstruction error)
    pub statistic: f64,
    pub verdict: Verdict,
}

impl Detection {
    pub fn is_anomaly(&self) -> bool {
        self.verdict == Verdict::Abnormal
    }
}

/// State shared by every strategy: artifact names, scaler and threshold
#[derive(Debug, Clone)]
pub struct DetectorState {
    artifacts: ArtifactPaths,
    scaler_mode: ScalerMode,
    scaler: Option<Scaler>,
    threshold: Option<f64>,
}

impl DetectorState {
    pub fn new(artifacts: ArtifactPaths, scaler_mode: ScalerMode) -> Self {
        Self {
            artifacts,
            scaler_mode,
            scaler: None,
            threshold: None,
        }
    }

    pub fn artifacts(&self) -> &ArtifactPaths {
        &self.artifacts
    }

    pub fn scaler(&self) -> Option<&Scaler> {
        self.scaler.as_ref()
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub(crate) fn set_threshold(&mut self, threshold: Option<f64>) {
        self.threshold = threshold;
    }

    /// Read the persisted scaler; a failed load leaves the current scaler in place
    pub fn load_scaler(&mut self) -> LoadOutcome<()> {
        let path = self.artifacts.scaler_path();
        let outcome = Scaler::load(&path);
        let status = outcome.status();
        if let LoadOutcome::Loaded(scaler) = outcome {
            info!(path = %path.display(), method = %scaler.method(), "scaler loaded successfully");
            self.scaler = Some(scaler);
        }
        status
    }

    /// Normalize a batch with the loaded scaler
    pub fn scale(&mut self, features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        let path = self.artifacts.scaler_path();
        let scaler = self
            .scaler
            .as_mut()
            .ok_or(AnalysisError::ScalerUnavailable { path })?;
        match self.scaler_mode {
            ScalerMode::TransformOnly => scaler.transform(features),
            ScalerMode::RefitOnBatch => scaler.fit_transform(features),
        }
    }
}

/// Capability contract implemented by every detection strategy
pub trait AnomalyDetector {
    /// Strategy-specific hyperparameters for `build_model`
    type Params;
    /// What `train_model` hands back
    type TrainOutput;

    fn kind(&self) -> DetectorKind;
    fn state(&self) -> &DetectorState;
    fn state_mut(&mut self) -> &mut DetectorState;

    /// Whether a fitted or loaded model is present
    fn has_model(&self) -> bool;

    /// Construct an untrained model
    fn build_model(&mut self, params: Self::Params) -> Result<(), AnalysisError>;

    /// Fit on `x_train`, save the model, then determine the threshold
    fn train_model(
        &mut self,
        x_train: &Array2<f64>,
        x_validation: Option<&Array2<f64>>,
    ) -> Result<Self::TrainOutput, AnalysisError>;

    /// Persist the in-memory model (and threshold, when known)
    fn save_model(&self) -> Result<PathBuf, AnalysisError>;

    /// Read the persisted model; a failed load leaves the current model in place
    fn load_model(&mut self) -> LoadOutcome<()>;

    /// Per-sample anomaly statistic on already scaled data
    fn score_samples(&self, features: &Array2<f64>) -> Result<Array1<f64>, AnalysisError>;

    /// Threshold statistic on training data, which may differ from `score_samples`
    fn threshold_statistic(&self, x_train: &Array2<f64>) -> Result<Array1<f64>, AnalysisError> {
        self.score_samples(x_train)
    }

    /// Decide a verdict for one statistic value
    fn classify(&self, statistic: f64, threshold: f64) -> Verdict;

    fn artifacts(&self) -> &ArtifactPaths {
        self.state().artifacts()
    }

    fn threshold(&self) -> Option<f64> {
        self.state().threshold()
    }

    fn load_scaler(&mut self) -> LoadOutcome<()> {
        self.state_mut().load_scaler()
    }

    /// Threshold = mean + one standard deviation of the training statistic
    fn determine_threshold(&mut self, x_train: &Array2<f64>) -> Result<f64, AnalysisError> {
        let statistic = self.threshold_statistic(x_train)?;
        let threshold = crate::stats::mean_plus_std(&statistic)?;
        info!(detector = %self.kind(), threshold, "anomaly threshold determined");
        self.state_mut().set_threshold(Some(threshold));
        Ok(threshold)
    }

    /// Scale `features`, score them and classify every sample
    fn detect_anomalies(&mut self, features: &Array2<f64>) -> Result<Vec<Detection>, AnalysisError> {
        let _ = self.load_scaler();
        let scaled = self.state_mut().scale(features)?;

        if !self.has_model() {
            info!(detector = %self.kind(), "model not trained, trying to load the model");
            if !self.load_model().is_loaded() {
                return Err(AnalysisError::ModelNotBuilt(
                    self.artifacts().model_path().display().to_string(),
                ));
            }
        }

        let threshold = self.threshold().ok_or(AnalysisError::ThresholdNotSet)?;
        let statistics = self.score_samples(&scaled)?;

        let detections: Vec<Detection> = statistics
            .iter()
            .enumerate()
            .map(|(index, &statistic)| Detection {
                index,
                statistic,
                verdict: self.classify(statistic, threshold),
            })
            .collect();

        let anomalies = detections.iter().filter(|d| d.is_anomaly()).count();
        if anomalies > 0 {
            warn!(detector = %self.kind(), anomalies, total = detections.len(), "anomalies detected");
        } else {
            info!(detector = %self.kind(), total = detections.len(), "no anomalies detected");
        }
        Ok(detections)
    }
}

pub(crate) fn ensure_parent_exists(path: &Path) -> Result<(), AnalysisError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|e| AnalysisError::io(parent, e))
        }
        _ => Ok(()),
    }
}
