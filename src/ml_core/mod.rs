/// Numerical model cores behind the detectors
pub mod autoencoder;
pub mod feature;
pub mod mixture;
pub mod optimizer;

// Re-export commonly used types
pub use autoencoder::{Autoencoder, FitSchedule, History, ReconstructionLoss};
pub use mixture::{MixtureDensity, MixtureParams};
pub use optimizer::{Optimizer, OptimizerKind};
