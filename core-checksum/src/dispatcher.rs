//! # Bitstream Dispatchers
//!
//! Dispatchers decide which bitstream the checker verifies next.
//!
//! ## Strategies
//!
//! | Strategy | Source | Stops when |
//! |----------|--------|------------|
//! | single pass | oldest checked, not yet checked this run | nothing left |
//! | by count | same as single pass, terminal results excluded | `n` dispatched |
//! | by duration | oldest checked, cycling, terminal results excluded | deadline passed |
//! | by ids | fixed list | list exhausted |
//! | by handle | bitstreams under a community, collection or item | list exhausted |
//! | looping | oldest checked, cycling, terminal results excluded | cancelled |
//!
//! "Oldest checked" dispatchers query the most-recent table on every call, so
//! a bitstream checked moments ago moves to the back of the queue. Deadlines
//! and cancellation are only observed between units; a verification in
//! progress always finishes.

use crate::error::{ChecksumError, Result};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{BitstreamId, ChecksumResultCode};
use core_library::repositories::{BitstreamRepository, ChecksumHistoryRepository, ContainerRepository};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Source of bitstreams to verify.
#[async_trait]
pub trait BitstreamDispatcher: Send {
    /// Short strategy name used in logs and events
    fn name(&self) -> &'static str;

    /// The next bitstream to verify, `None` once the dispatcher is exhausted.
    async fn next(&mut self) -> Result<Option<BitstreamId>>;
}

/// Parse configured terminal result code names.
pub fn parse_result_codes<S: AsRef<str>>(names: &[S]) -> Result<Vec<ChecksumResultCode>> {
    names
        .iter()
        .map(|name| ChecksumResultCode::from_str(name.as_ref()).map_err(ChecksumError::from))
        .collect()
}

// =============================================================================
// Oldest-checked dispatchers
// =============================================================================

/// Every eligible bitstream once, oldest checked first.
///
/// A bitstream is eligible when it has not been checked since the run
/// started, so the pass ends after each one has been visited.
pub struct SinglePassDispatcher {
    history: Arc<dyn ChecksumHistoryRepository>,
    run_started: DateTime<Utc>,
}

impl SinglePassDispatcher {
    pub fn new(history: Arc<dyn ChecksumHistoryRepository>, run_started: DateTime<Utc>) -> Self {
        Self { history, run_started }
    }
}

#[async_trait]
impl BitstreamDispatcher for SinglePassDispatcher {
    fn name(&self) -> &'static str {
        "single-pass"
    }

    async fn next(&mut self) -> Result<Option<BitstreamId>> {
        Ok(self.history.find_oldest_eligible(Some(self.run_started), &[]).await?)
    }
}

/// The first `count` eligible bitstreams, oldest checked first.
pub struct LimitedCountDispatcher {
    history: Arc<dyn ChecksumHistoryRepository>,
    run_started: DateTime<Utc>,
    excluded: Vec<ChecksumResultCode>,
    remaining: u64,
}

impl LimitedCountDispatcher {
    pub fn new(
        history: Arc<dyn ChecksumHistoryRepository>,
        run_started: DateTime<Utc>,
        excluded: Vec<ChecksumResultCode>,
        count: u64,
    ) -> Self {
        Self {
            history,
            run_started,
            excluded,
            remaining: count,
        }
    }
}

#[async_trait]
impl BitstreamDispatcher for LimitedCountDispatcher {
    fn name(&self) -> &'static str {
        "by-count"
    }

    async fn next(&mut self) -> Result<Option<BitstreamId>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let next = self
            .history
            .find_oldest_eligible(Some(self.run_started), &self.excluded)
            .await?;
        if next.is_some() {
            self.remaining -= 1;
        }
        Ok(next)
    }
}

/// Oldest checked bitstreams, cycling, until a deadline.
pub struct LimitedDurationDispatcher {
    history: Arc<dyn ChecksumHistoryRepository>,
    clock: Arc<dyn Clock>,
    deadline: DateTime<Utc>,
    excluded: Vec<ChecksumResultCode>,
}

impl LimitedDurationDispatcher {
    /// Dispatch until `duration` has elapsed on `clock`.
    pub fn new(
        history: Arc<dyn ChecksumHistoryRepository>,
        clock: Arc<dyn Clock>,
        duration: Duration,
        excluded: Vec<ChecksumResultCode>,
    ) -> Self {
        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| clock.now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            history,
            clock,
            deadline,
            excluded,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }
}

#[async_trait]
impl BitstreamDispatcher for LimitedDurationDispatcher {
    fn name(&self) -> &'static str {
        "by-duration"
    }

    async fn next(&mut self) -> Result<Option<BitstreamId>> {
        if self.clock.now() >= self.deadline {
            debug!(deadline = %self.deadline, "Checksum run deadline reached");
            return Ok(None);
        }
        Ok(self.history.find_oldest_eligible(None, &self.excluded).await?)
    }
}

/// Oldest checked bitstreams, cycling, until cancelled.
///
/// Returns `None` when nothing is eligible at all, since every candidate is
/// either deleted or carries a terminal result.
pub struct LoopingDispatcher {
    history: Arc<dyn ChecksumHistoryRepository>,
    excluded: Vec<ChecksumResultCode>,
    cancel: CancellationToken,
}

impl LoopingDispatcher {
    pub fn new(
        history: Arc<dyn ChecksumHistoryRepository>,
        excluded: Vec<ChecksumResultCode>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            history,
            excluded,
            cancel,
        }
    }
}

#[async_trait]
impl BitstreamDispatcher for LoopingDispatcher {
    fn name(&self) -> &'static str {
        "looping"
    }

    async fn next(&mut self) -> Result<Option<BitstreamId>> {
        if self.cancel.is_cancelled() {
            info!("Looping checksum run cancelled");
            return Ok(None);
        }
        Ok(self.history.find_oldest_eligible(None, &self.excluded).await?)
    }
}

// =============================================================================
// Fixed-list dispatchers
// =============================================================================

/// Bitstreams from a fixed list, in order.
pub struct ListDispatcher {
    name: &'static str,
    ids: VecDeque<BitstreamId>,
}

impl ListDispatcher {
    pub fn new(ids: Vec<BitstreamId>) -> Self {
        Self {
            name: "by-ids",
            ids: ids.into(),
        }
    }

    /// All bitstreams under `handle`, ordered by id.
    ///
    /// # Errors
    ///
    /// [`ChecksumError::UnknownHandle`] when the handle resolves to nothing.
    pub async fn for_handle(
        handle: &str,
        containers: &dyn ContainerRepository,
        bitstreams: &dyn BitstreamRepository,
    ) -> Result<Self> {
        let target = containers
            .resolve_handle(handle)
            .await?
            .ok_or_else(|| ChecksumError::UnknownHandle(handle.to_string()))?;
        let ids = bitstreams.find_ids_under(target).await?;
        debug!(handle, bitstreams = ids.len(), "Resolved handle for checksum run");
        Ok(Self {
            name: "by-handle",
            ids: ids.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.ids.len()
    }
}

#[async_trait]
impl BitstreamDispatcher for ListDispatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn next(&mut self) -> Result<Option<BitstreamId>> {
        Ok(self.ids.pop_front())
    }
}

// =============================================================================
// Strategy selection
// =============================================================================

/// How a checksum run picks its bitstreams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DispatchStrategy {
    #[default]
    SinglePass,
    ByCount(u64),
    ByDuration(Duration),
    ByIds(Vec<BitstreamId>),
    ByHandle(String),
    Looping,
}

/// Everything a strategy may need to build its dispatcher.
pub struct DispatchSources {
    pub history: Arc<dyn ChecksumHistoryRepository>,
    pub bitstreams: Arc<dyn BitstreamRepository>,
    pub containers: Arc<dyn ContainerRepository>,
    pub clock: Arc<dyn Clock>,
    /// Result codes never dispatched again by repeating strategies
    pub terminal: Vec<ChecksumResultCode>,
    pub cancel: CancellationToken,
}

impl DispatchStrategy {
    pub async fn build(
        &self,
        sources: &DispatchSources,
        run_started: DateTime<Utc>,
    ) -> Result<Box<dyn BitstreamDispatcher>> {
        let dispatcher: Box<dyn BitstreamDispatcher> = match self {
            DispatchStrategy::SinglePass => {
                Box::new(SinglePassDispatcher::new(sources.history.clone(), run_started))
            }
            DispatchStrategy::ByCount(count) => Box::new(LimitedCountDispatcher::new(
                sources.history.clone(),
                run_started,
                sources.terminal.clone(),
                *count,
            )),
            DispatchStrategy::ByDuration(duration) => Box::new(LimitedDurationDispatcher::new(
                sources.history.clone(),
                sources.clock.clone(),
                *duration,
                sources.terminal.clone(),
            )),
            DispatchStrategy::ByIds(ids) => Box::new(ListDispatcher::new(ids.clone())),
            DispatchStrategy::ByHandle(handle) => Box::new(
                ListDispatcher::for_handle(handle, sources.containers.as_ref(), sources.bitstreams.as_ref())
                    .await?,
            ),
            DispatchStrategy::Looping => Box::new(LoopingDispatcher::new(
                sources.history.clone(),
                sources.terminal.clone(),
                sources.cancel.clone(),
            )),
        };
        Ok(dispatcher)
    }
}
