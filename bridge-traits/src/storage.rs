//! Bitstream Storage Abstraction
//!
//! Content of stored files is addressed by the store's internal id (the
//! assetstore key), not by the bitstream's database id.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Read access to stored bitstream content.
///
/// Implementations return [`BridgeError::NotFound`](crate::error::BridgeError::NotFound)
/// when the content for `internal_id` is missing, and other errors for I/O
/// failures.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::BitstreamStore;
///
/// async fn size_of(store: &dyn BitstreamStore, internal_id: &str) -> Result<usize> {
///     Ok(store.retrieve(internal_id).await?.len())
/// }
/// ```
#[async_trait]
pub trait BitstreamStore: Send + Sync {
    /// Read the full content of a bitstream.
    async fn retrieve(&self, internal_id: &str) -> Result<Bytes>;

    /// Check whether content exists for `internal_id`.
    async fn exists(&self, internal_id: &str) -> Result<bool>;
}
