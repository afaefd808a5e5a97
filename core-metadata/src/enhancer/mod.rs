//! # Item Enhancers
//!
//! Strategies that derive metadata on an item, and the ordered registry that
//! runs them.
//!
//! ## Overview
//!
//! An [`ItemEnhancer`] decides whether it applies to an item and, if so,
//! rewrites some of the item's fields through the
//! [`MetadataDiffEngine`](crate::diff::MetadataDiffEngine). Enhancers must be
//! idempotent: running one twice leaves the item as running it once did.
//!
//! The [`EnhancerRegistry`] is an explicit, ordered list built once at
//! startup. Enhancers run in registration order and each one sees the
//! mutations of those before it. When several enhancers write the same field
//! the last one wins.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = EnhancerRegistry::builder()
//!     .register(WhitespaceNormalizeEnhancer::new(vec![title]))
//!     .register(RelatedEntityEnhancer::new("Publication", "department", department_field))
//!     .build();
//!
//! let mut ctx = EnhancementContext::new(session.as_mut(), false);
//! let outcome = registry.enhance_item(&mut ctx, &mut item).await;
//! ```

mod profile_copy;
mod related_entity;
mod whitespace;

pub use profile_copy::ProfileCopyEnhancer;
pub use related_entity::{RelatedEntityEnhancer, PLACEHOLDER_PARENT_METADATA_VALUE};
pub use whitespace::{normalize_whitespace, WhitespaceNormalizeEnhancer};

use crate::diff::DiffOutcome;
use crate::error::MetadataError;
use crate::Result;
use async_trait::async_trait;
use core_library::models::Item;
use core_library::repositories::ItemSession;
use std::sync::Arc;
use tracing::{debug, warn};

/// What an enhancer can reach while it runs.
pub struct EnhancementContext<'a> {
    /// Session of the current run, used to resolve related items.
    pub session: &'a mut dyn ItemSession,
    /// Re-derive values even when they look current.
    pub force: bool,
}

impl<'a> EnhancementContext<'a> {
    pub fn new(session: &'a mut dyn ItemSession, force: bool) -> Self {
        Self { session, force }
    }
}

/// A strategy deriving metadata on an item.
#[async_trait]
pub trait ItemEnhancer: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    fn can_enhance(&self, item: &Item) -> bool;

    /// Mutate `item` in memory. Persisting it is the caller's job.
    async fn enhance(&self, ctx: &mut EnhancementContext<'_>, item: &mut Item) -> Result<DiffOutcome>;
}

/// An enhancer error while processing one item.
#[derive(Debug)]
pub struct EnhancerFailure {
    pub enhancer: String,
    pub error: MetadataError,
}

/// Result of running the registry against one item.
#[derive(Debug, Default)]
pub struct RegistryOutcome {
    /// Changes made by the enhancers that completed.
    pub changes: DiffOutcome,
    /// Enhancers that applied to the item.
    pub applied: usize,
    /// Set when an enhancer failed; later enhancers did not run.
    pub failure: Option<EnhancerFailure>,
}

/// Ordered set of enhancers.
#[derive(Clone, Default)]
pub struct EnhancerRegistry {
    enhancers: Vec<Arc<dyn ItemEnhancer>>,
}

impl EnhancerRegistry {
    pub fn builder() -> EnhancerRegistryBuilder {
        EnhancerRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.enhancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enhancers.is_empty()
    }

    /// Enhancer names in run order.
    pub fn names(&self) -> Vec<&str> {
        self.enhancers.iter().map(|e| e.name()).collect()
    }

    /// Run every applicable enhancer against `item`, in order.
    ///
    /// Stops at the first failing enhancer. Changes made before the failure
    /// stay on the item.
    pub async fn enhance_item(&self, ctx: &mut EnhancementContext<'_>, item: &mut Item) -> RegistryOutcome {
        let mut outcome = RegistryOutcome::default();

        for enhancer in &self.enhancers {
            if !enhancer.can_enhance(item) {
                continue;
            }
            outcome.applied += 1;

            match enhancer.enhance(ctx, item).await {
                Ok(changes) => {
                    if !changes.is_empty() {
                        debug!(
                            item_id = %item.id,
                            enhancer = enhancer.name(),
                            added = changes.added,
                            removed = changes.removed,
                            "Enhancer changed item"
                        );
                    }
                    outcome.changes += changes;
                }
                Err(error) => {
                    warn!(item_id = %item.id, enhancer = enhancer.name(), error = %error, "Enhancer failed");
                    outcome.failure = Some(EnhancerFailure {
                        enhancer: enhancer.name().to_string(),
                        error,
                    });
                    break;
                }
            }
        }
        outcome
    }
}

/// Builder for [`EnhancerRegistry`]
#[derive(Default)]
pub struct EnhancerRegistryBuilder {
    enhancers: Vec<Arc<dyn ItemEnhancer>>,
}

impl EnhancerRegistryBuilder {
    pub fn register<E: ItemEnhancer + 'static>(mut self, enhancer: E) -> Self {
        self.enhancers.push(Arc::new(enhancer));
        self
    }

    pub fn register_arc(mut self, enhancer: Arc<dyn ItemEnhancer>) -> Self {
        self.enhancers.push(enhancer);
        self
    }

    pub fn build(self) -> EnhancerRegistry {
        EnhancerRegistry {
            enhancers: self.enhancers,
        }
    }
}
