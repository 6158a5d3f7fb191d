//! Generic dump/load facility for fitted artifacts (scalers and models).
//!
//! Every artifact is written as a JSON envelope carrying a kind tag and a
//! format version next to the payload, so a scaler file handed to the model
//! loader is reported as corrupt instead of being half-parsed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::AnalysisError;

/// Current envelope format version
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    version: u32,
    payload: &'a T,
}

/// Envelope as read back; the payload stays untyped until kind and version check out
#[derive(Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    payload: serde_json::Value,
}

/// Result of trying to load a persisted artifact
#[derive(Debug)]
#[must_use]
pub enum LoadOutcome<T> {
    /// Artifact was read and decoded
    Loaded(T),
    /// No file at the expected location
    NotFound(PathBuf),
    /// File exists but could not be read or decoded
    Corrupt { path: PathBuf, reason: String },
}

impl<T> LoadOutcome<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }

    /// Drop the payload, keeping only the status
    pub fn status(&self) -> LoadOutcome<()> {
        match self {
            LoadOutcome::Loaded(_) => LoadOutcome::Loaded(()),
            LoadOutcome::NotFound(path) => LoadOutcome::NotFound(path.clone()),
            LoadOutcome::Corrupt { path, reason } => LoadOutcome::Corrupt {
                path: path.clone(),
                reason: reason.clone(),
            },
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            LoadOutcome::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LoadOutcome<U> {
        match self {
            LoadOutcome::Loaded(value) => LoadOutcome::Loaded(f(value)),
            LoadOutcome::NotFound(path) => LoadOutcome::NotFound(path),
            LoadOutcome::Corrupt { path, reason } => LoadOutcome::Corrupt { path, reason },
        }
    }
}

/// Serialize `value` into the envelope format at `path`
pub fn save_artifact<T: Serialize>(path: &Path, kind: &str, value: &T) -> Result<(), AnalysisError> {
    let envelope = EnvelopeRef {
        kind,
        version: ARTIFACT_VERSION,
        payload: value,
    };
    let bytes = serde_json::to_vec(&envelope)?;
    fs::write(path, bytes).map_err(|e| AnalysisError::io(path, e))?;
    debug!(path = %path.display(), kind, "artifact written");
    Ok(())
}

/// Read an artifact of the given kind; never fails, the outcome says what happened
pub fn load_artifact<T: DeserializeOwned>(path: &Path, kind: &str) -> LoadOutcome<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), kind, "artifact file not found");
            return LoadOutcome::NotFound(path.to_path_buf());
        }
        Err(e) => return corrupt(path, kind, format!("read failed: {}", e)),
    };

    let envelope: Envelope = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(e) => return corrupt(path, kind, format!("decode failed: {}", e)),
    };

    if envelope.kind != kind {
        return corrupt(
            path,
            kind,
            format!("expected a '{}' artifact, found '{}'", kind, envelope.kind),
        );
    }
    if envelope.version != ARTIFACT_VERSION {
        return corrupt(
            path,
            kind,
            format!("unsupported artifact version {}", envelope.version),
        );
    }

    match serde_json::from_value::<T>(envelope.payload) {
        Ok(payload) => {
            debug!(path = %path.display(), kind, "artifact loaded");
            LoadOutcome::Loaded(payload)
        }
        Err(e) => corrupt(path, kind, format!("payload decode failed: {}", e)),
    }
}

fn corrupt<T>(path: &Path, kind: &str, reason: String) -> LoadOutcome<T> {
    warn!(path = %path.display(), kind, %reason, "error while loading artifact");
    LoadOutcome::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}
