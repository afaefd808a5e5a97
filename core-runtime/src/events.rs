//! # Job Events
//!
//! Progress notifications published by the enhancement and checksum jobs,
//! plus the item notifications the enhancement consumer reacts to. They travel
//! over a `tokio::sync::broadcast` channel wrapped in [`EventBus`].
//!
//! Publishers never wait on subscribers. A subscriber that falls more than the
//! channel capacity behind gets `RecvError::Lagged(n)` and resumes with the
//! oldest retained event; `RecvError::Closed` means every bus was dropped.
//! With nobody subscribed `emit` fails, and publishers discard that
//! (`emit(..).ok()`).
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ItemEvent};
//!
//! let bus = EventBus::default();
//! let mut receiver = bus.subscribe();
//! bus.emit(CoreEvent::Item(ItemEvent::Installed {
//!     item_id: "5f1a3c0e-0000-4000-8000-000000000001".to_string(),
//! }))
//! .ok();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

use tokio::sync::broadcast::error::TryRecvError;

/// Events retained per subscriber by [`EventBus::default`].
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Enhancement(EnhancementEvent),
    Checksum(ChecksumEvent),
    Item(ItemEvent),
}

impl CoreEvent {
    /// Failed enhancement runs and checksum results other than a match.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            CoreEvent::Enhancement(EnhancementEvent::Failed { .. })
                | CoreEvent::Checksum(ChecksumEvent::Verified { matched: false, .. })
        )
    }
}

/// Lifecycle of a batch enhancement run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum EnhancementEvent {
    /// Selection finished and processing is about to start.
    Started {
        job_id: String,
        /// Number of items selected for the run.
        selected: u64,
        dry_run: bool,
        force: bool,
    },
    /// A page was committed (or rolled back in dry-run mode).
    PageCommitted {
        job_id: String,
        /// 1-based page number.
        page: u32,
        /// Items handled in this page.
        items: u64,
        dry_run: bool,
    },
    /// The run finished.
    Completed {
        job_id: String,
        items_processed: u64,
        items_changed: u64,
        items_failed: u64,
        fields_added: u64,
        fields_removed: u64,
        dry_run: bool,
        duration_ms: u64,
    },
    /// The run aborted and the open page was rolled back.
    Failed {
        job_id: String,
        message: String,
        items_processed: u64,
    },
}

/// Checksum verification progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ChecksumEvent {
    /// A checker run started.
    Started {
        run_id: String,
        /// Dispatch strategy name (e.g. "by-count").
        strategy: String,
    },
    /// One bitstream was verified.
    Verified {
        run_id: String,
        bitstream_id: String,
        /// Result code, e.g. `CHECKSUM_MATCH`.
        result: String,
        matched: bool,
    },
    /// A checker run finished.
    Completed {
        run_id: String,
        checked: u64,
        matched: u64,
        mismatched: u64,
        errors: u64,
    },
}

/// Item lifecycle notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ItemEvent {
    /// Metadata of an item changed.
    Modified { item_id: String },
    /// An item moved from the workspace into the archive.
    Installed { item_id: String },
}

impl ItemEvent {
    pub fn item_id(&self) -> &str {
        match self {
            ItemEvent::Modified { item_id } | ItemEvent::Installed { item_id } => item_id,
        }
    }
}

/// Cloneable handle to the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Deliver `event` to every current subscriber and return how many there
    /// were. Fails when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receiver for events emitted from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({} subscribers)", self.subscriber_count())
    }
}

/// Receiver that skips events a predicate rejects.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let checksum_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Checksum(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    predicate: Option<Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            predicate: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn wants(&self, event: &CoreEvent) -> bool {
        self.predicate.as_ref().map_or(true, |predicate| predicate(event))
    }

    /// Wait for the next accepted event. Lag and closure are passed through
    /// as in [`Receiver::recv`].
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.wants(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already queued, if any.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(skipped)) => return Some(Err(RecvError::Lagged(skipped))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.wants(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}
