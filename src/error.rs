//! Typed error surface for the coordinator.
//!
//! Every core module returns `Result<_, CoordinatorError>` (or folds an
//! `anyhow::Error` into the `Internal` variant). The HTTP layer is the only
//! place that maps a variant to a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("no nodes online")]
    NoNodesOnline,

    #[error("file not found: '{0}'")]
    FileNotFound(String),

    #[error("manifest for '{0}' is missing its encryption key")]
    KeyMissing(String),

    #[error("chunk '{0}' unavailable: no live replica could serve it")]
    ChunkUnavailable(String),

    #[error("manifest for '{0}' is corrupt: {1}")]
    CorruptManifest(String, String),

    #[error("authentication failed while decrypting")]
    AuthFailure,

    #[error("storage node at '{0}' unreachable: {1}")]
    StorageNodeUnreachable(String, String),

    #[error("chunk '{0}' is unhealable: no live replica remains")]
    Unhealable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    /// Maps each kind to the HTTP status it surfaces as.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            CoordinatorError::UnknownNode(_) => StatusCode::NOT_FOUND,
            CoordinatorError::NoNodesOnline => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::FileNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::KeyMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::ChunkUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::CorruptManifest(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::AuthFailure => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::StorageNodeUnreachable(_, _) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Unhealable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
