use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Selection failed: {0}")]
    Selection(String),

    #[error("Enhancer '{enhancer}' failed: {message}")]
    Enhancer { enhancer: String, message: String },

    #[error("Invalid run phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
