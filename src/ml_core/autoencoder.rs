//! Fully connected autoencoder trained to reconstruct its own input
//!
//! Topology: `input -> 32 -> 16 -> 8 -> 16 -> 32 -> input`, ReLU on the
//! hidden layers and a sigmoid on the output, so inputs are expected to be
//! scaled into `[0, 1]`.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::ml_core::feature::validate_width;
use crate::ml_core::optimizer::{LayerGradients, Optimizer};
use crate::utils::AnalysisError;

/// Hidden layer widths around the bottleneck of 8
pub const HIDDEN_WIDTHS: [usize; 5] = [32, 16, 8, 16, 32];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, z: &mut Array2<f64>) {
        match self {
            Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
        }
    }

    /// Derivative expressed through the layer output `a = f(z)`
    fn derivative_from_output(self, a: f64) -> f64 {
        match self {
            Activation::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => a * (1.0 - a),
        }
    }
}

/// Per-sample reconstruction error, also used as the training loss
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionLoss {
    /// Mean absolute error over features
    Mae,
    /// Mean squared error over features
    Mse,
}

impl ReconstructionLoss {
    /// Error of each row of `reconstructed` against `original`
    pub fn per_sample(self, original: &Array2<f64>, reconstructed: &Array2<f64>) -> Array1<f64> {
        let diff = reconstructed - original;
        let per_element = match self {
            ReconstructionLoss::Mae => diff.mapv(f64::abs),
            ReconstructionLoss::Mse => diff.mapv(|d| d * d),
        };
        per_element
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(original.nrows()))
    }

    /// Batch loss: mean of the per-sample errors
    pub fn batch(self, original: &Array2<f64>, reconstructed: &Array2<f64>) -> f64 {
        self.per_sample(original, reconstructed).mean().unwrap_or(0.0)
    }

    /// Gradient of the batch loss with respect to the reconstruction
    fn gradient(self, original: &Array2<f64>, reconstructed: &Array2<f64>) -> Array2<f64> {
        let n = (original.len().max(1)) as f64;
        let diff = reconstructed - original;
        match self {
            ReconstructionLoss::Mae => diff.mapv(|d| {
                if d > 0.0 {
                    1.0 / n
                } else if d < 0.0 {
                    -1.0 / n
                } else {
                    0.0
                }
            }),
            ReconstructionLoss::Mse => diff.mapv(|d| 2.0 * d / n),
        }
    }
}

impl FromStr for ReconstructionLoss {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mae" | "mean_absolute_error" => Ok(Self::Mae),
            "mse" | "mean_squared_error" => Ok(Self::Mse),
            other => Err(AnalysisError::ValidationError(format!(
                "unknown reconstruction loss '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReconstructionLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructionLoss::Mae => write!(f, "mae"),
            ReconstructionLoss::Mse => write!(f, "mse"),
        }
    }
}

/// A dense layer: `f(x · W + b)`, `W` is `(inputs, units)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Glorot-uniform weights, zero bias
    fn glorot(inputs: usize, units: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + units) as f64).sqrt();
        let weights = Array2::from_shape_fn((inputs, units), |_| rng.gen_range(-limit..limit));
        Self {
            weights,
            bias: Array1::zeros(units),
            activation,
        }
    }

    pub fn units(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let mut z = input.dot(&self.weights) + &self.bias;
        self.activation.apply(&mut z);
        z
    }
}

/// Loss curves recorded during `fit`, one entry per epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl History {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }
}

/// Mini-batch schedule for `Autoencoder::fit`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSchedule {
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Autoencoder {
    layers: Vec<DenseLayer>,
}

impl Autoencoder {
    /// Build an untrained network for `input_dim` features
    pub fn new(input_dim: usize, seed: u64) -> Result<Self, AnalysisError> {
        if input_dim == 0 {
            return Err(AnalysisError::ValidationError(
                "input_dim must be > 0".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(HIDDEN_WIDTHS.len() + 1);
        let mut inputs = input_dim;
        for &units in HIDDEN_WIDTHS.iter() {
            layers.push(DenseLayer::glorot(inputs, units, Activation::Relu, &mut rng));
            inputs = units;
        }
        layers.push(DenseLayer::glorot(inputs, input_dim, Activation::Sigmoid, &mut rng));

        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.weights.nrows()).unwrap_or(0)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Layer widths from the first hidden layer to the output
    pub fn widths(&self) -> Vec<usize> {
        self.layers.iter().map(DenseLayer::units).collect()
    }

    /// Reconstruct `features`
    pub fn predict(&self, features: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
        validate_width(features, self.input_dim())?;
        Ok(self
            .layers
            .iter()
            .fold(features.clone(), |acc, layer| layer.forward(&acc)))
    }

    /// Per-sample reconstruction error of `features`
    pub fn reconstruction_errors(
        &self,
        features: &Array2<f64>,
        loss: ReconstructionLoss,
    ) -> Result<Array1<f64>, AnalysisError> {
        let reconstructed = self.predict(features)?;
        Ok(loss.per_sample(features, &reconstructed))
    }

    /// Train to reconstruct `features`; `validation` is only evaluated, never fitted
    pub fn fit(
        &mut self,
        features: &Array2<f64>,
        validation: Option<&Array2<f64>>,
        loss: ReconstructionLoss,
        optimizer: &mut Optimizer,
        schedule: FitSchedule,
    ) -> Result<History, AnalysisError> {
        validate_width(features, self.input_dim())?;
        if let Some(val) = validation {
            validate_width(val, self.input_dim())?;
        }
        if schedule.batch_size == 0 {
            return Err(AnalysisError::ValidationError(
                "batch_size must be > 0".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(schedule.seed);
        let mut indices: Vec<usize> = (0..features.nrows()).collect();
        let mut history = History::default();

        for epoch in 0..schedule.epochs {
            indices.shuffle(&mut rng);

            let mut weighted_loss = 0.0;
            for chunk in indices.chunks(schedule.batch_size) {
                let batch = features.select(Axis(0), chunk);
                let batch_loss = self.train_batch(&batch, loss, optimizer);
                weighted_loss += batch_loss * chunk.len() as f64;
            }
            let epoch_loss = weighted_loss / features.nrows() as f64;
            if !epoch_loss.is_finite() {
                return Err(AnalysisError::ModelError(format!(
                    "training diverged at epoch {}",
                    epoch + 1
                )));
            }
            history.loss.push(epoch_loss);

            match validation {
                Some(val) => {
                    let val_loss = loss.batch(val, &self.predict(val)?);
                    history.val_loss.push(val_loss);
                    info!(
                        epoch = epoch + 1,
                        epochs = schedule.epochs,
                        loss = epoch_loss,
                        val_loss,
                        "autoencoder epoch"
                    );
                }
                None => info!(
                    epoch = epoch + 1,
                    epochs = schedule.epochs,
                    loss = epoch_loss,
                    "autoencoder epoch"
                ),
            }
        }

        Ok(history)
    }

    /// One forward/backward pass and optimizer step, returns the batch loss
    fn train_batch(&mut self, batch: &Array2<f64>, loss: ReconstructionLoss, optimizer: &mut Optimizer) -> f64 {
        // activations[0] is the input, activations[i + 1] the output of layer i
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(batch.clone());
        for layer in &self.layers {
            let next = layer.forward(activations.last().unwrap_or(batch));
            activations.push(next);
        }

        let output = &activations[self.layers.len()];
        let batch_loss = loss.batch(batch, output);
        let mut upstream = loss.gradient(batch, output);

        let mut gradients = Vec::with_capacity(self.layers.len());
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            let out = &activations[idx + 1];
            let delta = &upstream * &out.mapv(|a| layer.activation.derivative_from_output(a));
            let input = &activations[idx];
            gradients.push(LayerGradients {
                weights: input.t().dot(&delta),
                bias: delta.sum_axis(Axis(0)),
            });
            upstream = delta.dot(&layer.weights.t());
        }
        gradients.reverse();

        optimizer.step(&mut self.layers, &gradients);
        batch_loss
    }
}
