use ndarray::{Array1, Array2};
use std::path::PathBuf;
use tracing::info;

use crate::config::DetectorConfig;
use crate::detector::{
    AnomalyDetector, ArtifactPaths, DatasetKind, DeepLearningDetector, Detection, DetectorKind,
    GmmDetector,
};
use crate::ml_core::History;
use crate::utils::{AnalysisError, LoadOutcome};

/// A detector of either strategy, as returned by [`anomaly_detector`]
#[derive(Debug, Clone)]
pub enum Detector {
    Gmm(GmmDetector),
    DeepLearning(DeepLearningDetector),
}

/// Strategy-specific outcome of [`Detector::train`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrainReport {
    Gmm,
    DeepLearning(History),
}

/// Build the detector named by `detector_type` (`"classic"` or `"deep_learning"`)
/// bound to the artifacts of `dataset_name`
///
/// # Arguments
/// * `detector_type` - Exact strategy tag, case sensitive
/// * `dataset_name` - `"location"`, anything else selects the velocity artifacts
/// * `config` - Artifact directory, scaler mode and strategy defaults
///
/// # Returns
/// * `Ok(Detector)` - Untrained detector with no scaler or model loaded
/// * `Err(AnalysisError::InvalidDetectorType)` - Unknown tag
pub fn anomaly_detector(
    detector_type: &str,
    dataset_name: &str,
    config: &DetectorConfig,
) -> Result<Detector, AnalysisError> {
    let kind: DetectorKind = detector_type.parse()?;
    let dataset = DatasetKind::from_name(dataset_name);
    info!(detector = %kind, dataset = dataset.as_str(), "creating anomaly detector");

    Ok(match kind {
        DetectorKind::Classic => Detector::Gmm(GmmDetector::new(dataset, config)),
        DetectorKind::DeepLearning => Detector::DeepLearning(DeepLearningDetector::new(dataset, config)),
    })
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Detector::Gmm($inner) => $body,
            Detector::DeepLearning($inner) => $body,
        }
    };
}

impl Detector {
    pub fn kind(&self) -> DetectorKind {
        dispatch!(self, d => d.kind())
    }

    pub fn artifacts(&self) -> &ArtifactPaths {
        dispatch!(self, d => d.artifacts())
    }

    pub fn threshold(&self) -> Option<f64> {
        dispatch!(self, d => d.threshold())
    }

    pub fn has_model(&self) -> bool {
        dispatch!(self, d => d.has_model())
    }

    pub fn load_scaler(&mut self) -> LoadOutcome<()> {
        dispatch!(self, d => d.load_scaler())
    }

    pub fn load_model(&mut self) -> LoadOutcome<()> {
        dispatch!(self, d => d.load_model())
    }

    pub fn save_model(&self) -> Result<PathBuf, AnalysisError> {
        dispatch!(self, d => d.save_model())
    }

    /// Build an untrained model for `n_features` inputs; the mixture takes its
    /// hyperparameters from configuration
    pub fn build_model(&mut self, n_features: usize) -> Result<(), AnalysisError> {
        match self {
            Detector::Gmm(gmm) => {
                let params = gmm.default_params().clone();
                gmm.build_model(params)
            }
            Detector::DeepLearning(dl) => dl.build_model(n_features),
        }
    }

    pub fn train(
        &mut self,
        x_train: &Array2<f64>,
        x_validation: Option<&Array2<f64>>,
    ) -> Result<TrainReport, AnalysisError> {
        match self {
            Detector::Gmm(gmm) => gmm.train_model(x_train, x_validation).map(|()| TrainReport::Gmm),
            Detector::DeepLearning(dl) => dl
                .train_model(x_train, x_validation)
                .map(TrainReport::DeepLearning),
        }
    }

    pub fn score_samples(&self, features: &Array2<f64>) -> Result<Array1<f64>, AnalysisError> {
        dispatch!(self, d => d.score_samples(features))
    }

    pub fn determine_threshold(&mut self, x_train: &Array2<f64>) -> Result<f64, AnalysisError> {
        dispatch!(self, d => d.determine_threshold(x_train))
    }

    pub fn detect_anomalies(&mut self, features: &Array2<f64>) -> Result<Vec<Detection>, AnalysisError> {
        dispatch!(self, d => d.detect_anomalies(features))
    }
}
