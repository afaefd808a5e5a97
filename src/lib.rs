//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-metadata`, `core-checksum`).
//! Host applications can depend on `curation-workspace` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "enhancement", feature = "checksum"))]
pub use core_service as service;

#[cfg(feature = "enhancement")]
pub use core_metadata as metadata;

#[cfg(feature = "checksum")]
pub use core_checksum as checksum;
