//! Failures reported by host implementations: the assetstore holding
//! bitstream content and the search index used for item selection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The assetstore has no content under this internal id.
    #[error("Bitstream content not found: {0}")]
    NotFound(String),

    #[error("Assetstore I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Search query rejected: {0}")]
    InvalidQuery(String),

    /// Any other host-side failure.
    #[error("Host operation failed: {0}")]
    OperationFailed(String),
}

impl BridgeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
