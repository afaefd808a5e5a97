//! Errors raised while assembling the runtime: configuration and logging.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A setting is missing, malformed or out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No implementation was injected for a host capability and no default exists.
    #[error("No {capability} available: {hint}")]
    CapabilityMissing { capability: &'static str, hint: String },
}

pub type Result<T> = std::result::Result<T, Error>;
