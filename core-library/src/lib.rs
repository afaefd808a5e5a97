//! # Repository Content Module
//!
//! Owns the repository database and provides repository patterns for data
//! access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Items, metadata statements, communities and collections
//! - Persistence sessions with commit/rollback for batch jobs
//! - Bitstreams and their checksum verification history
//! - A [`SearchIndex`](bridge_traits::SearchIndex) backed by the same database

pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use query::SqliteSearchIndex;
