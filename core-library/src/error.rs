//! Errors raised by the repository database layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("{entity_type} {id} does not exist")]
    NotFound { entity_type: String, id: String },

    /// A value read from or written to the database is malformed.
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// An item session was used after it failed or was closed.
    #[error("Item session error: {0}")]
    Session(String),
}

impl LibraryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
