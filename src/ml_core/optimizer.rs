use ndarray::{Array, Array1, Array2, Dimension, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ml_core::autoencoder::DenseLayer;
use crate::utils::AnalysisError;

const BETA_1: f64 = 0.9;
const BETA_2: f64 = 0.999;
const RHO: f64 = 0.9;
const EPSILON: f64 = 1e-7;

/// Gradient-descent variant used to compile the autoencoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    RmsProp,
}

impl OptimizerKind {
    pub fn default_learning_rate(self) -> f64 {
        match self {
            OptimizerKind::Adam | OptimizerKind::RmsProp => 0.001,
            OptimizerKind::Sgd => 0.01,
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            "rmsprop" => Ok(Self::RmsProp),
            other => Err(AnalysisError::ValidationError(format!(
                "unknown optimizer '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
            OptimizerKind::RmsProp => write!(f, "rmsprop"),
        }
    }
}

/// Gradients of the loss with respect to one dense layer
#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

/// First and second moment estimates for one dense layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LayerSlots {
    weights_m: Array2<f64>,
    weights_v: Array2<f64>,
    bias_m: Array1<f64>,
    bias_v: Array1<f64>,
}

impl LayerSlots {
    fn zeros_like(layer: &DenseLayer) -> Self {
        Self {
            weights_m: Array2::zeros(layer.weights.raw_dim()),
            weights_v: Array2::zeros(layer.weights.raw_dim()),
            bias_m: Array1::zeros(layer.bias.raw_dim()),
            bias_v: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

/// Optimizer together with its accumulated state
///
/// The state is serialized with the model so a reloaded bundle can keep
/// training where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f64,
    iterations: u64,
    slots: Vec<LayerSlots>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: Option<f64>) -> Result<Self, AnalysisError> {
        let learning_rate = learning_rate.unwrap_or_else(|| kind.default_learning_rate());
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(AnalysisError::ValidationError(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        Ok(Self {
            kind,
            learning_rate,
            iterations: 0,
            slots: Vec::new(),
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of update steps applied so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Apply one update step to `layers`
    pub fn step(&mut self, layers: &mut [DenseLayer], gradients: &[LayerGradients]) {
        debug_assert_eq!(layers.len(), gradients.len());
        if self.slots.len() != layers.len() {
            self.slots = layers.iter().map(LayerSlots::zeros_like).collect();
        }

        self.iterations += 1;
        let rule = UpdateRule {
            kind: self.kind,
            learning_rate: self.learning_rate,
            iteration: self.iterations,
        };

        for ((layer, grads), slots) in layers.iter_mut().zip(gradients).zip(&mut self.slots) {
            rule.apply(
                &mut layer.weights,
                &grads.weights,
                &mut slots.weights_m,
                &mut slots.weights_v,
            );
            rule.apply(&mut layer.bias, &grads.bias, &mut slots.bias_m, &mut slots.bias_v);
        }
    }
}

struct UpdateRule {
    kind: OptimizerKind,
    learning_rate: f64,
    iteration: u64,
}

impl UpdateRule {
    fn apply<D: Dimension>(
        &self,
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
        m: &mut Array<f64, D>,
        v: &mut Array<f64, D>,
    ) {
        let lr = self.learning_rate;
        match self.kind {
            OptimizerKind::Sgd => param.scaled_add(-lr, grad),
            OptimizerKind::Adam => {
                let t = self.iteration as i32;
                let lr_t = lr * (1.0 - BETA_2.powi(t)).sqrt() / (1.0 - BETA_1.powi(t));
                Zip::from(param)
                    .and(grad)
                    .and(m)
                    .and(v)
                    .for_each(|p, &g, m, v| {
                        *m = BETA_1 * *m + (1.0 - BETA_1) * g;
                        *v = BETA_2 * *v + (1.0 - BETA_2) * g * g;
                        *p -= lr_t * *m / (v.sqrt() + EPSILON);
                    });
            }
            OptimizerKind::RmsProp => {
                Zip::from(param).and(grad).and(v).for_each(|p, &g, v| {
                    *v = RHO * *v + (1.0 - RHO) * g * g;
                    *p -= lr * g / (v.sqrt() + EPSILON);
                });
            }
        }
    }
}
