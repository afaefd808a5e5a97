use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),

    #[error("Checksum error: {0}")]
    Checksum(#[from] core_checksum::ChecksumError),
}

impl CoreError {
    /// Whether the failure happened before any work started: bad arguments,
    /// an unknown scope, or an unreachable index.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            CoreError::Setup(_)
                | CoreError::Config(_)
                | CoreError::Metadata(core_metadata::MetadataError::IndexUnavailable(_))
                | CoreError::Metadata(core_metadata::MetadataError::Setup(_))
                | CoreError::Checksum(core_checksum::ChecksumError::UnknownHandle(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
