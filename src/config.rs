use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::detector::TrainOptions;
use crate::ml_core::MixtureParams;
use crate::utils::AnalysisError;

/// How `detect_anomalies` applies the persisted scaler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerMode {
    /// Apply the persisted fit unchanged
    #[default]
    TransformOnly,
    /// Refit the scaler on every scored batch before transforming it
    RefitOnBatch,
}

/// Settings handed to the factory and forwarded to the detectors it builds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Directory holding scaler and model artifacts
    pub artifact_dir: PathBuf,
    pub scaler_mode: ScalerMode,
    pub gmm: MixtureParams,
    pub deep_learning: TrainOptions,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("."),
            scaler_mode: ScalerMode::default(),
            gmm: MixtureParams::default(),
            deep_learning: TrainOptions::default(),
        }
    }
}

impl DetectorConfig {
    /// Default configuration with artifacts stored under `dir`
    pub fn with_artifact_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}
