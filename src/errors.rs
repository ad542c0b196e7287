use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the recommendation flow.
///
/// `NotFound` and `InvalidSelection` are recoverable at the CLI layer;
/// the model errors are fatal for recommending since there is no model
/// to fall back to.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("no match found for '{0}'")]
    NotFound(String),

    #[error("model file not found at {path}")]
    ModelNotFound { path: PathBuf },

    #[error("model file at {path} could not be deserialized: {source}")]
    ModelCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("catalog API error: {0}")]
    ExternalService(String),

    #[error("no valid selection after {attempts} attempts")]
    InvalidSelection { attempts: usize },

    #[error("model serialization failed: {0}")]
    ModelSerialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RecommendError {
    /// Wrap a transport-level failure from the HTTP client.
    pub fn external(context: &str, err: impl std::fmt::Display) -> Self {
        RecommendError::ExternalService(format!("{context}: {err}"))
    }
}
