use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::{DetectorConfig, ScalerMode};
use crate::detector::{
    ensure_parent_exists, AnomalyDetector, ArtifactPaths, DatasetKind, DetectorKind, DetectorState,
    Verdict,
};
use crate::ml_core::{Autoencoder, FitSchedule, History, Optimizer, OptimizerKind, ReconstructionLoss};
use crate::utils::{load_artifact, save_artifact, AnalysisError, LoadOutcome};

const BUNDLE_ARTIFACT: &str = "autoencoder_bundle";

/// Compile and fit settings for the autoencoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    /// Training loss
    pub loss: ReconstructionLoss,
    /// `None` uses the optimizer's default rate
    pub learning_rate: Option<f64>,
    /// Seeds weight initialization and batch shuffling
    pub seed: u64,
    /// Reconstruction error used both for the threshold and for scoring
    pub metric: ReconstructionLoss,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 512,
            optimizer: OptimizerKind::Adam,
            loss: ReconstructionLoss::Mae,
            learning_rate: None,
            seed: 42,
            metric: ReconstructionLoss::Mae,
        }
    }
}

/// Self-contained saved model: architecture and weights, optimizer state,
/// loss, scoring metric and threshold
#[derive(Serialize, Deserialize)]
struct ModelBundle {
    input_dim: usize,
    widths: Vec<usize>,
    network: Autoencoder,
    optimizer: Option<Optimizer>,
    loss: ReconstructionLoss,
    metric: ReconstructionLoss,
    threshold: Option<f64>,
}

/// Reconstruction-based detector: high reconstruction error is abnormal
#[derive(Debug, Clone)]
pub struct DeepLearningDetector {
    state: DetectorState,
    options: TrainOptions,
    model: Option<Autoencoder>,
    optimizer: Option<Optimizer>,
}

impl DeepLearningDetector {
    pub fn new(dataset: DatasetKind, config: &DetectorConfig) -> Self {
        Self::with_artifacts(
            ArtifactPaths::new(DetectorKind::DeepLearning, dataset, config.artifact_dir.clone()),
            config.scaler_mode,
            config.deep_learning.clone(),
        )
    }

    pub fn with_artifacts(artifacts: ArtifactPaths, scaler_mode: ScalerMode, options: TrainOptions) -> Self {
        Self {
            state: DetectorState::new(artifacts, scaler_mode),
            options,
            model: None,
            optimizer: None,
        }
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    pub fn model(&self) -> Option<&Autoencoder> {
        self.model.as_ref()
    }

    /// Reconstruction of already scaled `features`
    pub fn reconstruct(&self, features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        self.network()?.predict(features)
    }

    fn network(&self) -> Result<&Autoencoder, AnalysisError> {
        self.model
            .as_ref()
            .ok_or_else(|| AnalysisError::ModelNotBuilt("autoencoder is not built".to_string()))
    }
}

impl AnomalyDetector for DeepLearningDetector {
    /// Input (and output) width of the network
    type Params = usize;
    type TrainOutput = History;

    fn kind(&self) -> DetectorKind {
        DetectorKind::DeepLearning
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

    fn build_model(&mut self, input_dim: usize) -> Result<(), AnalysisError> {
        let network = Autoencoder::new(input_dim, self.options.seed)?;
        debug!(input_dim, widths = ?network.widths(), "autoencoder built");
        self.model = Some(network);
        self.optimizer = None;
        self.state.set_threshold(None);
        Ok(())
    }

    fn train_model(
        &mut self,
        x_train: &Array2<f64>,
        x_validation: Option<&Array2<f64>>,
    ) -> Result<History, AnalysisError> {
        let options = self.options.clone();
        let mut optimizer = Optimizer::new(options.optimizer, options.learning_rate)?;
        let network = self
            .model
            .as_mut()
            .ok_or_else(|| AnalysisError::ModelNotBuilt("call build_model before train_model".to_string()))?;

        info!(
            samples = x_train.nrows(),
            epochs = options.epochs,
            batch_size = options.batch_size,
            optimizer = %optimizer.kind(),
            learning_rate = optimizer.learning_rate(),
            loss = %options.loss,
            "training autoencoder"
        );
        let history = network.fit(
            x_train,
            x_validation,
            options.loss,
            &mut optimizer,
            FitSchedule {
                epochs: options.epochs,
                batch_size: options.batch_size,
                seed: options.seed,
            },
        )?;
        self.optimizer = Some(optimizer);
        // The previous threshold does not describe the new weights
        self.state.set_threshold(None);

        self.save_model()?;
        self.determine_threshold(x_train)?;
        // Re-save so the bundle carries the threshold for later detection runs
        self.save_model()?;
        Ok(history)
    }

    fn save_model(&self) -> Result<PathBuf, AnalysisError> {
        let network = self.network()?;
        let path = self.state.artifacts().model_path();
        ensure_parent_exists(&path)?;

        let bundle = ModelBundle {
            input_dim: network.input_dim(),
            widths: network.widths(),
            network: network.clone(),
            optimizer: self.optimizer.clone(),
            loss: self.options.loss,
            metric: self.options.metric,
            threshold: self.state.threshold(),
        };
        save_artifact(&path, BUNDLE_ARTIFACT, &bundle)?;
        info!(path = %path.display(), "Deep Learning model saved");
        Ok(path)
    }

    fn load_model(&mut self) -> LoadOutcome<()> {
        let path = self.state.artifacts().model_path();
        let outcome = match load_artifact::<ModelBundle>(&path, BUNDLE_ARTIFACT) {
            LoadOutcome::Loaded(bundle)
                if bundle.network.input_dim() != bundle.input_dim || bundle.network.widths() != bundle.widths =>
            {
                let reason = "bundle architecture does not match its weights".to_string();
                warn!(path = %path.display(), %reason, "error while loading Deep Learning model");
                LoadOutcome::Corrupt { path: path.clone(), reason }
            }
            other => other,
        };
        let status = outcome.status();
        if let LoadOutcome::Loaded(bundle) = outcome {
            info!(path = %path.display(), "Deep Learning model loaded successfully");
            self.model = Some(bundle.network);
            self.optimizer = bundle.optimizer;
            self.options.loss = bundle.loss;
            // The stored threshold was computed with the stored metric
            self.options.metric = bundle.metric;
            if bundle.threshold.is_some() {
                self.state.set_threshold(bundle.threshold);
            }
        }
        status
    }

    /// Per-sample reconstruction error under the configured metric
    fn score_samples(&self, features: &Array2<f64>) -> Result<Array1<f64>, AnalysisError> {
        self.network()?.reconstruction_errors(features, self.options.metric)
    }

    /// Reconstruction error above the threshold is abnormal
    fn classify(&self, statistic: f64, threshold: f64) -> Verdict {
        if statistic > threshold {
            Verdict::Abnormal
        } else {
            Verdict::Normal
        }
    }
}
