//! # Metadata Enhancement Module
//!
//! Derives and reconciles item metadata in bulk.
//!
//! ## Overview
//!
//! This module handles:
//! - Minimal add/remove reconciliation of metadata values ([`diff`])
//! - Pluggable enhancement strategies and their ordered registry ([`enhancer`])
//! - Work-set selection through the search index ([`selector`])
//! - Paginated batch runs with commit checkpoints and dry-run accounting
//!   ([`enhancement_job`])
//! - Event-driven enhancement of single modified items ([`consumer`])

pub mod consumer;
pub mod diff;
pub mod enhancement_job;
pub mod enhancer;
pub mod error;
pub mod selector;

pub use consumer::EnhancementConsumer;
pub use diff::{DesiredValues, DiffOutcome, MetadataDelta, MetadataDiffEngine};
pub use enhancement_job::{
    ChangeStats, EnhancementConfig, EnhancementJob, EnhancementReport, FailureKind, ItemFailure, RunPhase,
};
pub use enhancer::{EnhancementContext, EnhancerRegistry, ItemEnhancer};
pub use error::{MetadataError, Result};
pub use selector::{BatchSelector, SelectionFilters, WorkItem};
