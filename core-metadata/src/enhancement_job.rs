//! # Batch Enhancement Job
//!
//! Drives an enhancement run over a selected set of items, committing in
//! pages and accumulating change statistics.
//!
//! ## Overview
//!
//! The enhancement job:
//! - Selects the work set through the [`BatchSelector`]
//! - Processes it in pages of `page_size` items (one page when unset)
//! - Runs the [`EnhancerRegistry`] on each item, persists it and evicts it
//!   from the session cache
//! - Commits each page, or in dry-run mode rolls it back and reports what
//!   would have changed
//! - Records per-item failures and keeps going
//! - Aborts the whole run, rolling back the open page, on any other error
//! - Emits lifecycle events on the [`EventBus`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ EnhancementJob   │
//! │ - Config         │
//! │ - Phase tracking │
//! └────────┬─────────┘
//!          │
//!          ├──> BatchSelector    (ordered work set)
//!          ├──> ItemRepository   (one ItemSession per run)
//!          ├──> EnhancerRegistry (derive metadata)
//!          └──> EventBus         (emit progress)
//! ```
//!
//! ## Phases
//!
//! `Idle → Selecting → (PageProcessing → PageCommitting)* → Reporting → Done`,
//! with `Aborted` reachable from every non-terminal phase.
//!
//! ## Dry Run
//!
//! A dry run writes exactly like a real one and rolls the page back instead
//! of committing it. Both modes count the same thing: the per-field multiset
//! difference between an item as loaded and as written, so enhancers that
//! undo each other's work add nothing. On a dry run each difference is also
//! logged at warn.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::enhancement_job::{EnhancementConfig, EnhancementJob};
//! use core_metadata::selector::{BatchSelector, SelectionFilters};
//!
//! let config = EnhancementConfig::default()
//!     .with_page_size(100)
//!     .with_dry_run(true);
//!
//! let job = EnhancementJob::new(config, selector, registry, item_repository)
//!     .with_event_bus(event_bus);
//!
//! let report = job.run(&SelectionFilters::new().with_entity_type("Publication")).await?;
//! println!("{} items changed", report.stats.items_changed);
//! ```

use crate::diff::{multiset_difference, DiffOutcome};
use crate::enhancer::{EnhancementContext, EnhancerRegistry};
use crate::error::{MetadataError, Result};
use crate::selector::{BatchSelector, SelectionFilters, WorkItem};
use core_library::models::{Item, ItemId, MetadataField};
use core_library::repositories::{ItemRepository, ItemSession};
use core_runtime::config::EnhancementSettings;
use core_runtime::events::{CoreEvent, EnhancementEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for an enhancement run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhancementConfig {
    /// Items per committed page; `None` processes everything as one page
    pub page_size: Option<usize>,

    /// Roll back every page and only report the changes
    pub dry_run: bool,

    /// Re-derive values even when enhancers consider them current
    pub force: bool,
}

impl EnhancementConfig {
    pub fn builder() -> Self {
        Self::default()
    }

    /// Set page size; `0` means a single page
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = if size == 0 { None } else { Some(size) };
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl From<&EnhancementSettings> for EnhancementConfig {
    fn from(settings: &EnhancementSettings) -> Self {
        Self {
            page_size: settings.page_size,
            dry_run: settings.dry_run,
            force: settings.force,
        }
    }
}

// =============================================================================
// Run Phases
// =============================================================================

/// Phase of an enhancement run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Selecting,
    PageProcessing,
    PageCommitting,
    Reporting,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Selecting => "selecting",
            RunPhase::PageProcessing => "page_processing",
            RunPhase::PageCommitting => "page_committing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;

        if next == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Selecting)
                | (Selecting, PageProcessing)
                | (Selecting, Reporting)
                | (PageProcessing, PageCommitting)
                | (PageCommitting, PageProcessing)
                | (PageCommitting, Reporting)
                | (Reporting, Done)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated phase tracker.
#[derive(Debug)]
struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self { phase: RunPhase::Idle }
    }

    fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(MetadataError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.phase, to = %next, "Run phase transition");
        self.phase = next;
        Ok(())
    }
}

// =============================================================================
// Statistics and Reports
// =============================================================================

/// Change accounting for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub items_processed: u64,
    pub items_changed: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    pub fields_added: u64,
    pub fields_removed: u64,
}

impl ChangeStats {
    fn record_change(&mut self, outcome: DiffOutcome) {
        if !outcome.is_empty() {
            self.items_changed += 1;
            self.fields_added += outcome.added as u64;
            self.fields_removed += outcome.removed as u64;
        }
    }
}

/// Why an item could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The selected id did not resolve to an item.
    NotFound,
    /// An enhancer returned an error.
    Enhancer,
    /// Reading or writing the item failed.
    Persistence,
}

/// A per-item failure recorded in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of an enhancement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementReport {
    pub job_id: String,
    pub stats: ChangeStats,
    pub failures: Vec<ItemFailure>,
    /// Pages committed, or rolled back in dry-run mode
    pub pages: u32,
    /// `Done`, or `Aborted` when the run stopped early
    pub phase: RunPhase,
    pub dry_run: bool,
    /// Set when the run aborted
    pub abort_reason: Option<String>,
    pub duration: Duration,
}

impl EnhancementReport {
    pub fn is_aborted(&self) -> bool {
        self.phase == RunPhase::Aborted
    }

    /// One-line summary of the run.
    pub fn summary(&self) -> String {
        if self.dry_run {
            format!(
                "Dry run: {} of {} items would change ({} fields added, {} removed, {} failed)",
                self.stats.items_changed,
                self.stats.items_processed,
                self.stats.fields_added,
                self.stats.fields_removed,
                self.stats.items_failed
            )
        } else {
            format!(
                "Enhanced {} items, {} changed ({} failed)",
                self.stats.items_processed, self.stats.items_changed, self.stats.items_failed
            )
        }
    }
}

/// Per-page bookkeeping.
#[derive(Default)]
struct PageState {
    items: u64,
}

// =============================================================================
// Enhancement Job
// =============================================================================

/// Paginated batch enhancement over selected items
pub struct EnhancementJob {
    config: EnhancementConfig,
    selector: BatchSelector,
    registry: Arc<EnhancerRegistry>,
    items: Arc<dyn ItemRepository>,
    event_bus: Option<Arc<EventBus>>,
}

impl EnhancementJob {
    pub fn new(
        config: EnhancementConfig,
        selector: BatchSelector,
        registry: Arc<EnhancerRegistry>,
        items: Arc<dyn ItemRepository>,
    ) -> Self {
        Self {
            config,
            selector,
            registry,
            items,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    /// Run the job.
    ///
    /// # Errors
    ///
    /// Selection failures (index unreachable, query rejected) are returned as
    /// errors; nothing has been written at that point. Failures after
    /// selection abort the run and are reported through
    /// [`EnhancementReport::abort_reason`].
    #[instrument(skip(self, filters), name = "enhancement_job", fields(dry_run = self.config.dry_run, force = self.config.force))]
    pub async fn run(&self, filters: &SelectionFilters) -> Result<EnhancementReport> {
        let job_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut tracker = PhaseTracker::new();
        let mut stats = ChangeStats::default();
        let mut failures = Vec::new();
        let mut pages = 0u32;

        tracker.advance(RunPhase::Selecting)?;
        let work = match self.selector.select(filters).await {
            Ok(work) => work,
            Err(e) => {
                tracker.advance(RunPhase::Aborted)?;
                error!(error = %e, "Selection failed, aborting run");
                self.emit(EnhancementEvent::Failed {
                    job_id,
                    message: e.to_string(),
                    items_processed: 0,
                });
                return Err(e);
            }
        };

        info!(job_id = %job_id, selected = work.len(), "Starting enhancement run");
        self.emit(EnhancementEvent::Started {
            job_id: job_id.clone(),
            selected: work.len() as u64,
            dry_run: self.config.dry_run,
            force: self.config.force,
        });

        let page_size = self.config.page_size.unwrap_or(work.len()).max(1);
        let mut session = match self.items.begin_session().await {
            Ok(session) => session,
            Err(e) => {
                return Ok(self.abort(&mut tracker, None, job_id, stats, failures, pages, e.into(), started).await);
            }
        };

        for (index, page) in work.chunks(page_size).enumerate() {
            let page_number = index as u32 + 1;
            tracker.advance(RunPhase::PageProcessing)?;

            let result = self
                .process_page(session.as_mut(), page, &mut stats, &mut failures)
                .await;
            let state = match result {
                Ok(state) => state,
                Err(e) => {
                    return Ok(self
                        .abort(&mut tracker, Some(session.as_mut()), job_id, stats, failures, pages, e, started)
                        .await);
                }
            };

            tracker.advance(RunPhase::PageCommitting)?;
            if let Err(e) = self.finish_page(session.as_mut()).await {
                return Ok(self
                    .abort(&mut tracker, Some(session.as_mut()), job_id, stats, failures, pages, e, started)
                    .await);
            }
            pages = page_number;

            info!(
                page = page_number,
                items = state.items,
                items_changed = stats.items_changed,
                dry_run = self.config.dry_run,
                "Page finished"
            );
            self.emit(EnhancementEvent::PageCommitted {
                job_id: job_id.clone(),
                page: page_number,
                items: state.items,
                dry_run: self.config.dry_run,
            });
        }

        tracker.advance(RunPhase::Reporting)?;
        let duration = started.elapsed();
        let report = EnhancementReport {
            job_id: job_id.clone(),
            stats,
            failures,
            pages,
            phase: RunPhase::Done,
            dry_run: self.config.dry_run,
            abort_reason: None,
            duration,
        };

        for failure in &report.failures {
            warn!(item_id = %failure.item_id, kind = ?failure.kind, error = %failure.message, "Item not enhanced");
        }
        info!(
            items_processed = stats.items_processed,
            items_changed = stats.items_changed,
            items_failed = stats.items_failed,
            fields_added = stats.fields_added,
            fields_removed = stats.fields_removed,
            "{}",
            report.summary()
        );
        self.emit(EnhancementEvent::Completed {
            job_id,
            items_processed: stats.items_processed,
            items_changed: stats.items_changed,
            items_failed: stats.items_failed,
            fields_added: stats.fields_added,
            fields_removed: stats.fields_removed,
            dry_run: self.config.dry_run,
            duration_ms: duration.as_millis() as u64,
        });

        tracker.advance(RunPhase::Done)?;
        Ok(report)
    }

    /// Enhance and persist every item of a page.
    ///
    /// Per-item problems are recorded in `failures`; only errors that make
    /// the session unusable are returned.
    async fn process_page(
        &self,
        session: &mut dyn ItemSession,
        page: &[WorkItem],
        stats: &mut ChangeStats,
        failures: &mut Vec<ItemFailure>,
    ) -> Result<PageState> {
        let mut state = PageState::default();

        for work in page {
            state.items += 1;
            stats.items_processed += 1;

            let mut item = match session.find_by_id(&work.item_id).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    stats.items_failed += 1;
                    failures.push(ItemFailure {
                        item_id: work.item_id,
                        kind: FailureKind::NotFound,
                        message: "item not found".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    stats.items_failed += 1;
                    failures.push(ItemFailure {
                        item_id: work.item_id,
                        kind: FailureKind::Persistence,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !item.is_enhanceable() {
                debug!(item_id = %item.id, "Skipping item outside the archive");
                stats.items_skipped += 1;
                session.uncache(&item.id);
                continue;
            }

            let before = item.clone();
            let outcome = {
                let mut ctx = EnhancementContext::new(&mut *session, self.config.force);
                self.registry.enhance_item(&mut ctx, &mut item).await
            };

            if let Some(failure) = &outcome.failure {
                stats.items_failed += 1;
                failures.push(ItemFailure {
                    item_id: item.id,
                    kind: FailureKind::Enhancer,
                    message: format!("{}: {}", failure.enhancer, failure.error),
                });
            }

            if !outcome.changes.is_empty() {
                match session.update(&item).await {
                    // Enhancers may undo each other; only the net change counts.
                    Ok(true) => stats.record_change(net_change(&before, &item, self.config.dry_run)),
                    Ok(false) => debug!(item_id = %item.id, "Enhancers left the item unchanged"),
                    Err(e) => {
                        warn!(item_id = %item.id, error = %e, "Failed to persist item");
                        if outcome.failure.is_none() {
                            stats.items_failed += 1;
                        }
                        failures.push(ItemFailure {
                            item_id: item.id,
                            kind: FailureKind::Persistence,
                            message: e.to_string(),
                        });
                    }
                }
            }

            session.uncache(&item.id);
        }

        Ok(state)
    }

    /// Commit the page, or roll it back on a dry run.
    async fn finish_page(&self, session: &mut dyn ItemSession) -> Result<()> {
        if self.config.dry_run {
            session.rollback().await?;
        } else {
            session.commit().await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn abort(
        &self,
        tracker: &mut PhaseTracker,
        session: Option<&mut dyn ItemSession>,
        job_id: String,
        stats: ChangeStats,
        failures: Vec<ItemFailure>,
        pages: u32,
        cause: MetadataError,
        started: Instant,
    ) -> EnhancementReport {
        error!(job_id = %job_id, error = %cause, "Enhancement run aborted");
        if let Some(session) = session {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "Rollback after abort failed");
            }
        }
        if let Err(e) = tracker.advance(RunPhase::Aborted) {
            warn!(error = %e, "Run already finished");
        }

        self.emit(EnhancementEvent::Failed {
            job_id: job_id.clone(),
            message: cause.to_string(),
            items_processed: stats.items_processed,
        });

        EnhancementReport {
            job_id,
            stats,
            failures,
            pages,
            phase: RunPhase::Aborted,
            dry_run: self.config.dry_run,
            abort_reason: Some(cause.to_string()),
            duration: started.elapsed(),
        }
    }

    fn emit(&self, event: EnhancementEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Enhancement(event)).ok();
        }
    }
}

/// Values added and removed between two states of an item, compared per
/// field as multisets. On a dry run each difference is logged.
fn net_change(before: &Item, after: &Item, dry_run: bool) -> DiffOutcome {
    let fields: BTreeSet<&MetadataField> = after
        .metadata
        .iter()
        .chain(before.metadata.iter())
        .map(|v| &v.field)
        .collect();

    let mut outcome = DiffOutcome::default();
    for field in fields {
        let wanted = after.value_strings(field);
        let stored = before.value_strings(field);
        let wanted: Vec<&str> = wanted.iter().map(String::as_str).collect();
        let stored: Vec<&str> = stored.iter().map(String::as_str).collect();

        let (disappeared, added) = multiset_difference(&stored, &wanted);
        if dry_run {
            for value in &added {
                warn!(item_id = %after.id, field = %field, value = %value, "Dry run: value would be added");
            }
            for value in &disappeared {
                warn!(item_id = %after.id, field = %field, value = %value, "Dry run: value would disappear");
            }
        }
        outcome += DiffOutcome::new(added.len(), disappeared.len());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EnhancementConfig::builder()
            .with_page_size(25)
            .with_dry_run(true)
            .with_force(true);
        assert_eq!(config.page_size, Some(25));
        assert!(config.dry_run);
        assert!(config.force);

        assert_eq!(EnhancementConfig::default().with_page_size(0).page_size, None);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = EnhancementSettings::default().with_page_size(10).with_dry_run(true);
        let config = EnhancementConfig::from(&settings);
        assert_eq!(config.page_size, Some(10));
        assert!(config.dry_run);
        assert!(!config.force);
    }

    #[test]
    fn test_phase_transitions() {
        use RunPhase::*;

        assert!(Idle.can_transition_to(Selecting));
        assert!(Selecting.can_transition_to(Reporting));
        assert!(PageCommitting.can_transition_to(PageProcessing));
        assert!(PageProcessing.can_transition_to(Aborted));
        assert!(!Idle.can_transition_to(PageProcessing));
        assert!(!PageProcessing.can_transition_to(Reporting));
        assert!(!Done.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Selecting));
    }

    #[test]
    fn test_phase_tracker_rejects_invalid_transition() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(RunPhase::Selecting).is_ok());
        let err = tracker.advance(RunPhase::Done).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidTransition { .. }));
        assert_eq!(tracker.phase, RunPhase::Selecting);
    }

    #[test]
    fn test_net_change_counts_both_directions() {
        use core_library::models::MetadataValue;

        let title = MetadataField::parse("dc.title").unwrap();
        let before = Item::new(ItemId::new())
            .with_value(MetadataValue::new(title.clone(), "Hello   World"));
        let mut after = before.clone();
        after.clear_field(&title);
        after.add_value(MetadataValue::new(title.clone(), "Hello World"));

        assert_eq!(net_change(&before, &after, false), DiffOutcome::new(1, 1));
        assert!(net_change(&before, &before, true).is_empty());
    }

    #[test]
    fn test_report_summary() {
        let report = EnhancementReport {
            job_id: "job".to_string(),
            stats: ChangeStats {
                items_processed: 4,
                items_changed: 2,
                fields_added: 3,
                fields_removed: 1,
                ..ChangeStats::default()
            },
            failures: Vec::new(),
            pages: 1,
            phase: RunPhase::Done,
            dry_run: true,
            abort_reason: None,
            duration: Duration::from_millis(5),
        };
        assert_eq!(
            report.summary(),
            "Dry run: 2 of 4 items would change (3 fields added, 1 removed, 0 failed)"
        );
    }
}
