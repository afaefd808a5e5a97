//! # Host Bridge Traits
//!
//! Collaborator traits that the curation core depends on but does not implement
//! itself.
//!
//! ## Overview
//!
//! The enhancement and checksum engines only need a handful of capabilities from
//! the outside world. Each one is a trait here so that hosts can plug in their
//! own backends and tests can plug in mocks.
//!
//! ## Traits
//!
//! ### Discovery & Storage
//! - [`SearchIndex`](search::SearchIndex) - Filtered, ordered lookup of object ids
//! - [`BitstreamStore`](storage::BitstreamStore) - Read access to stored file content
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to a host pipeline
//!
//! ## Implementations
//!
//! | Trait            | Implementation                                   |
//! |------------------|--------------------------------------------------|
//! | `SearchIndex`    | `core_library::query::SqliteSearchIndex`         |
//! | `BitstreamStore` | `bridge_desktop::FsBitstreamStore`               |
//! | `Clock`          | [`SystemClock`](time::SystemClock), [`ManualClock`](time::ManualClock) |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations should
//! convert backend-specific errors and keep enough context (ids, paths) in the
//! message to act on.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! behind `Arc` across async tasks.

pub mod error;
pub mod log;
pub mod search;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use search::{FilterQuery, ObjectKind, SearchHit, SearchIndex, SearchRequest, SortOrder};
pub use storage::BitstreamStore;
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, ManualClock, SystemClock};
