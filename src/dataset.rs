use ndarray::{Array2, Axis};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::utils::{AnalysisError, Scaler};

/// A numeric feature matrix with its column names
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub features: Array2<f64>,
}

impl FeatureTable {
    /// Number of samples (rows)
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }

    /// Load from CSV text with a header row
    ///
    /// Columns where every value parses as a number become features; other
    /// columns (ids, labels, timestamps) are skipped.
    pub fn from_csv(csv_data: &str) -> crate::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_data.as_bytes());

        let headers = reader.headers()?.clone();
        let mut rows: Vec<Vec<String>> = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        let named: Vec<(String, Vec<Option<f64>>)> = headers
            .iter()
            .enumerate()
            .map(|(col_idx, header)| {
                let values = rows
                    .iter()
                    .map(|row| row.get(col_idx).and_then(|v| v.parse::<f64>().ok()))
                    .collect();
                (header.to_string(), values)
            })
            .collect();

        Ok(Self::from_columns(named, rows.len())?)
    }

    /// Load from a JSON array of flat objects
    ///
    /// Columns keep the order in which keys first appear.
    pub fn from_json(json_data: &str) -> crate::Result<Self> {
        let data: Vec<Map<String, Value>> = serde_json::from_str(json_data)?;

        let mut names: Vec<String> = Vec::new();
        for key in data.iter().flat_map(|item| item.keys()) {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }

        let named = names
            .into_iter()
            .map(|name| {
                let values = data
                    .iter()
                    .map(|item| item.get(&name).and_then(Value::as_f64))
                    .collect();
                (name, values)
            })
            .collect();

        Ok(Self::from_columns(named, data.len())?)
    }

    /// Load a file, picking the parser from its extension (`.json`, otherwise CSV)
    pub fn from_path(path: &Path) -> crate::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_csv(&content),
        }
    }

    /// Reorder the feature columns to `columns`, dropping any others
    ///
    /// # Returns
    /// * `Ok(table)` - Table whose columns are exactly `columns`
    /// * `Err(AnalysisError)` - If a requested column is absent
    pub fn select_columns(&self, columns: &[String]) -> Result<Self, AnalysisError> {
        let indices = columns
            .iter()
            .map(|name| {
                self.columns.iter().position(|c| c == name).ok_or_else(|| {
                    AnalysisError::ValidationError(format!(
                        "feature column '{}' is missing, available: {:?}",
                        name, self.columns
                    ))
                })
            })
            .collect::<Result<Vec<usize>, AnalysisError>>()?;

        Ok(Self {
            columns: columns.to_vec(),
            features: self.features.select(Axis(1), &indices),
        })
    }

    /// Arrange columns the way `scaler` was fitted; unchanged when the scaler
    /// carries no column names
    pub fn aligned_to(&self, scaler: &Scaler) -> Result<Self, AnalysisError> {
        if scaler.columns().is_empty() {
            Ok(self.clone())
        } else {
            self.select_columns(scaler.columns())
        }
    }

    fn from_columns(
        named: Vec<(String, Vec<Option<f64>>)>,
        n_rows: usize,
    ) -> Result<Self, AnalysisError> {
        let numeric: Vec<(String, Vec<f64>)> = named
            .into_iter()
            .filter_map(|(name, values)| {
                let values: Option<Vec<f64>> = values.into_iter().collect();
                values.map(|v| (name, v))
            })
            .collect();

        if n_rows == 0 || numeric.is_empty() {
            return Err(AnalysisError::ValidationError(
                "input contains no numeric feature columns".to_string(),
            ));
        }

        let columns: Vec<String> = numeric.iter().map(|(name, _)| name.clone()).collect();
        let features = Array2::from_shape_fn((n_rows, numeric.len()), |(row, col)| numeric[col].1[row]);

        Ok(Self { columns, features })
    }
}
