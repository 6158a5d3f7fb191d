//! Fast Anomaly Detector - batch anomaly detection on numeric feature tables
//!
//! Two interchangeable strategies share one lifecycle: a Gaussian mixture
//! that flags low-likelihood samples, and a dense autoencoder that flags
//! samples it reconstructs poorly. Fitted scalers and models are persisted
//! per dataset so detection can run in a later process.

pub mod config;
pub mod dataset;
pub mod detector;
pub mod ml_core;
pub mod stats;
pub mod utils;

pub use config::{DetectorConfig, ScalerMode};
pub use dataset::FeatureTable;
pub use detector::{
    anomaly_detector, AnomalyDetector, ArtifactPaths, DatasetKind, DeepLearningDetector, Detection,
    Detector, DetectorKind, GmmDetector, TrainOptions, TrainReport, Verdict,
};
pub use stats::Statistics;
pub use utils::{AnalysisError, LoadOutcome, Scaler, ScalingMethod};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
