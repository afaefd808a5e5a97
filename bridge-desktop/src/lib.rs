//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for server and desktop hosts.
//!
//! ## Overview
//!
//! - `BitstreamStore` using `tokio::fs` over a local assetstore directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::FsBitstreamStore;
//! use bridge_traits::BitstreamStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = FsBitstreamStore::with_root("/srv/dspace/assetstore");
//!     let bytes = store.retrieve("1234567890").await;
//! }
//! ```

mod assetstore;

pub use assetstore::FsBitstreamStore;
