//! # Curation Runtime
//!
//! Shared plumbing for the enhancement and checksum jobs:
//!
//! - [`config`]: [`CoreConfig`](config::CoreConfig) and the run settings it
//!   carries, with duration parsing for checker limits
//! - [`logging`]: subscriber setup and host log forwarding
//! - [`events`]: the broadcast bus announcing job progress

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
