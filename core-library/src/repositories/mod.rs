//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//! - Batch writes to items go through an [`ItemSession`] so a page of work
//!   commits or rolls back as one transaction
//!
//! ## Available Repositories
//!
//! - `ItemRepository` / `ItemSession` - Items and their metadata statements
//! - `ContainerRepository` - Communities, collections and handle resolution
//! - `BitstreamRepository` - Stored files and container scoping
//! - `ChecksumHistoryRepository` - Verification history and dispatch state
//! - `MetadataFieldRegistry` - Cached field key to id mapping

pub mod bitstream;
pub mod checksum;
pub mod container;
pub mod field_registry;
pub mod item;

pub use bitstream::{BitstreamRepository, SqliteBitstreamRepository};
pub use checksum::{ChecksumHistoryRepository, SqliteChecksumHistoryRepository};
pub use container::{ContainerRepository, SqliteContainerRepository};
pub use field_registry::MetadataFieldRegistry;
pub use item::{ItemRepository, ItemSession, SqliteItemRepository, SqliteItemSession};
