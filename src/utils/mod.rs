/// Utility modules for error handling, scaling and artifact persistence
pub mod error;
pub mod persistence;
pub mod scaling;

// Re-export commonly used types
pub use error::AnalysisError;
pub use persistence::{load_artifact, save_artifact, LoadOutcome};
pub use scaling::{Scaler, ScalingMethod};
