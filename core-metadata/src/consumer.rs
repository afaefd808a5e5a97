//! # Enhancement Consumer
//!
//! Enhances single items as they change, driven by [`ItemEvent`]s on the
//! event bus.
//!
//! Writing an enhanced item raises a new `Modified` event for it. The
//! consumer remembers the items it has just written and skips the first
//! event it sees for each of them, so it never feeds on its own output.

use crate::diff::DiffOutcome;
use crate::enhancer::{EnhancementContext, EnhancerRegistry};
use crate::error::{MetadataError, Result};
use core_library::models::ItemId;
use core_library::repositories::ItemRepository;
use core_runtime::events::{CoreEvent, EventBus, EventStream, ItemEvent, RecvError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

pub struct EnhancementConsumer {
    registry: Arc<EnhancerRegistry>,
    items: Arc<dyn ItemRepository>,
    event_bus: Option<Arc<EventBus>>,
    /// Items written by this consumer whose echo event is still pending.
    processed: Mutex<HashSet<ItemId>>,
}

impl EnhancementConsumer {
    pub fn new(registry: Arc<EnhancerRegistry>, items: Arc<dyn ItemRepository>) -> Self {
        Self {
            registry,
            items,
            event_bus: None,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Announce written items on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn take_processed(&self, id: &ItemId) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }

    fn mark_processed(&self, id: ItemId) {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
    }

    /// Handle one event. Returns the changes written, `None` when the event
    /// was ignored.
    pub async fn handle(&self, event: &CoreEvent) -> Result<Option<DiffOutcome>> {
        let CoreEvent::Item(item_event) = event else {
            return Ok(None);
        };
        let id = ItemId::from_string(item_event.item_id())
            .map_err(|e| MetadataError::InvalidMetadata(format!("bad item id in event: {}", e)))?;

        if self.take_processed(&id) {
            debug!(item_id = %id, "Skipping event raised by own update");
            return Ok(None);
        }
        self.process(&id).await.map(Some)
    }

    /// Enhance one item and commit it.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn process(&self, id: &ItemId) -> Result<DiffOutcome> {
        let mut session = self.items.begin_session().await?;

        let Some(mut item) = session.find_by_id(id).await? else {
            session.rollback().await?;
            return Ok(DiffOutcome::default());
        };
        if !item.is_enhanceable() {
            session.rollback().await?;
            return Ok(DiffOutcome::default());
        }

        let outcome = {
            let mut ctx = EnhancementContext::new(session.as_mut(), false);
            self.registry.enhance_item(&mut ctx, &mut item).await
        };
        if let Some(failure) = &outcome.failure {
            warn!(enhancer = %failure.enhancer, error = %failure.error, "Enhancer failed on modified item");
        }

        if outcome.changes.is_empty() || !session.update(&item).await? {
            session.rollback().await?;
            return Ok(DiffOutcome::default());
        }
        session.commit().await?;

        self.mark_processed(item.id);
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Item(ItemEvent::Modified {
                item_id: item.id.to_string(),
            }))
            .ok();
        }
        info!(
            added = outcome.changes.added,
            removed = outcome.changes.removed,
            "Enhanced modified item"
        );
        Ok(outcome.changes)
    }

    /// Consume item events until the bus closes.
    pub async fn run(&self, mut stream: EventStream) {
        loop {
            match stream.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle(&event).await {
                        warn!(error = %e, "Failed to enhance modified item");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Enhancement consumer lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
