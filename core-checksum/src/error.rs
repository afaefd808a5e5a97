use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("Handle {0} does not resolve to a community, collection or item")]
    UnknownHandle(String),

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Content of bitstream {bitstream_id} could not be read: {message}")]
    Content { bitstream_id: String, message: String },

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

pub type Result<T> = std::result::Result<T, ChecksumError>;
