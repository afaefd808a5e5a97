//! Bitstream Store Implementation over a local assetstore directory

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::BitstreamStore,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Number of nested directory levels below the assetstore root.
const DIRECTORY_LEVELS: usize = 3;
/// Characters of the internal id used per directory level.
const DIGITS_PER_LEVEL: usize = 2;

/// Filesystem-backed bitstream store
///
/// Content lives under the assetstore root in a directory tree derived from the
/// internal id: `ab/cd/ef/abcdef0123...`. Ids shorter than the prefix are stored
/// directly under the root.
pub struct FsBitstreamStore {
    root: PathBuf,
}

impl FsBitstreamStore {
    /// Create a store rooted at the platform data directory.
    pub fn new() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("repository-curation")
            .join("assetstore");

        Self { root }
    }

    /// Create a store rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the on-disk path for an internal id.
    pub fn path_for(&self, internal_id: &str) -> Result<PathBuf> {
        if internal_id.is_empty()
            || !internal_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BridgeError::NotFound(format!(
                "invalid internal id '{}'",
                internal_id
            )));
        }

        let mut path = self.root.clone();
        if internal_id.len() > DIRECTORY_LEVELS * DIGITS_PER_LEVEL {
            for level in 0..DIRECTORY_LEVELS {
                let start = level * DIGITS_PER_LEVEL;
                path.push(&internal_id[start..start + DIGITS_PER_LEVEL]);
            }
        }
        path.push(internal_id);
        Ok(path)
    }

    fn map_io_error(internal_id: &str, e: std::io::Error) -> BridgeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BridgeError::NotFound(internal_id.to_string())
        } else {
            BridgeError::Io(e)
        }
    }
}

impl Default for FsBitstreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BitstreamStore for FsBitstreamStore {
    async fn retrieve(&self, internal_id: &str) -> Result<Bytes> {
        let path = self.path_for(internal_id)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::map_io_error(internal_id, e))?;
        debug!(path = ?path, size = data.len(), "Read bitstream");
        Ok(Bytes::from(data))
    }

    async fn exists(&self, internal_id: &str) -> Result<bool> {
        let path = self.path_for(internal_id)?;
        fs::try_exists(&path).await.map_err(BridgeError::Io)
    }
}
