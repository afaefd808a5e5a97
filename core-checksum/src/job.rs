//! # Checksum Run
//!
//! Drives one checksum-checker invocation.
//!
//! ## Workflow
//!
//! 1. Optionally prune expired history
//! 2. Register bitstreams that have never been checked, and flag deleted ones
//! 3. Build the dispatcher for the requested strategy
//! 4. Verify bitstreams one at a time until the dispatcher is exhausted
//! 5. Report each result and the run summary, emitting events as it goes
//!
//! Bitstreams are verified sequentially. Cancelling the sources' token ends
//! the run after the bitstream in progress. A verification that fails outright
//! (database or store I/O) stops the run; per-bitstream problems such as
//! missing content are results, not failures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_checksum::{ChecksumJob, DispatchStrategy};
//!
//! let job = ChecksumJob::new(sources, store).with_event_bus(bus);
//! let report = job.run(&DispatchStrategy::ByCount(100)).await?;
//! println!("{} checked, {} mismatched", report.summary.checked, report.summary.mismatched);
//! ```

use crate::checker::ChecksumChecker;
use crate::dispatcher::{DispatchSources, DispatchStrategy};
use crate::error::Result;
use crate::pruner::HistoryPruner;
use crate::reporter::{LogReporter, ResultsReporter, RunSummary};
use bridge_traits::storage::BitstreamStore;
use core_runtime::config::ChecksumSettings;
use core_runtime::events::{ChecksumEvent, CoreEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Outcome of a checksum run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumReport {
    pub run_id: String,
    pub strategy: String,
    /// Most-recent rows created or flagged before dispatching
    pub registered: u64,
    /// History entries deleted by pruning, if pruning ran
    pub pruned: Option<u64>,
    pub summary: RunSummary,
    pub duration: Duration,
}

pub struct ChecksumJob {
    sources: DispatchSources,
    checker: ChecksumChecker,
    reporter: Arc<dyn ResultsReporter>,
    pruner: Option<HistoryPruner>,
    event_bus: Option<Arc<EventBus>>,
}

impl ChecksumJob {
    pub fn new(sources: DispatchSources, store: Arc<dyn BitstreamStore>) -> Self {
        let checker = ChecksumChecker::new(
            sources.bitstreams.clone(),
            sources.history.clone(),
            store,
            sources.clock.clone(),
        );
        Self {
            sources,
            checker,
            reporter: Arc::new(LogReporter::default()),
            pruner: None,
            event_bus: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ResultsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Prune history with `settings` retention before dispatching.
    pub fn with_pruning(mut self, settings: ChecksumSettings) -> Self {
        self.pruner = Some(HistoryPruner::new(
            self.sources.history.clone(),
            self.sources.clock.clone(),
            settings,
        ));
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    #[instrument(skip(self), fields(strategy = ?strategy))]
    pub async fn run(&self, strategy: &DispatchStrategy) -> Result<ChecksumReport> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let run_started = self.sources.clock.now();

        let pruned = match &self.pruner {
            Some(pruner) => Some(pruner.prune().await?),
            None => None,
        };
        let registered = self.sources.history.register_missing_bitstreams().await?;

        let mut dispatcher = strategy.build(&self.sources, run_started).await?;
        let strategy_name = dispatcher.name().to_string();
        info!(run_id = %run_id, strategy = %strategy_name, registered, "Starting checksum run");
        self.emit(ChecksumEvent::Started {
            run_id: run_id.clone(),
            strategy: strategy_name.clone(),
        });

        let mut summary = RunSummary::default();
        while !self.sources.cancel.is_cancelled() {
            let Some(bitstream_id) = dispatcher.next().await? else {
                break;
            };
            let result = match self.checker.check(&bitstream_id).await {
                Ok(result) => result,
                Err(e) => {
                    error!(run_id = %run_id, bitstream_id = %bitstream_id, error = %e, "Checksum run stopped");
                    self.reporter.summary(&summary);
                    return Err(e);
                }
            };

            summary.record(&result);
            self.reporter.report(&result);
            self.emit(ChecksumEvent::Verified {
                run_id: run_id.clone(),
                bitstream_id: bitstream_id.to_string(),
                result: result.result.as_str().to_string(),
                matched: result.result.is_match(),
            });
        }

        self.reporter.summary(&summary);
        self.emit(ChecksumEvent::Completed {
            run_id: run_id.clone(),
            checked: summary.checked,
            matched: summary.matched,
            mismatched: summary.mismatched,
            errors: summary.errors,
        });

        Ok(ChecksumReport {
            run_id,
            strategy: strategy_name,
            registered,
            pruned,
            summary,
            duration: started.elapsed(),
        })
    }

    fn emit(&self, event: ChecksumEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Checksum(event)).ok();
        }
    }
}
