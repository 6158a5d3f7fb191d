use ndarray::Array2;

use crate::utils::AnalysisError;

/// Validate a feature matrix before fitting or scoring
///
/// # Returns
/// * `Ok(())` if the matrix has rows, columns and only finite values
/// * `Err(AnalysisError::ValidationError)` otherwise
pub fn validate_features(features: &Array2<f64>) -> Result<(), AnalysisError> {
    if features.nrows() == 0 {
        return Err(AnalysisError::ValidationError(
            "feature matrix cannot be empty".to_string(),
        ));
    }

    if features.ncols() == 0 {
        return Err(AnalysisError::ValidationError(
            "feature matrix must have at least one column".to_string(),
        ));
    }

    if features.iter().any(|value| !value.is_finite()) {
        return Err(AnalysisError::ValidationError(
            "feature matrix contains NaN or Inf values".to_string(),
        ));
    }

    Ok(())
}

/// Validate that `features` has the width a fitted model expects
pub fn validate_width(features: &Array2<f64>, expected: usize) -> Result<(), AnalysisError> {
    validate_features(features)?;
    if features.ncols() != expected {
        return Err(AnalysisError::ValidationError(format!(
            "model expects {} features, got {}",
            expected,
            features.ncols()
        )));
    }
    Ok(())
}
