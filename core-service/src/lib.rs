//! # Core Service
//!
//! Wires the curation crates into one façade.
//!
//! ## Overview
//!
//! [`CoreService`] owns the database pool, the repositories, the search index,
//! the enhancer registry and the event bus. Hosts (the `curation` binary,
//! tests, long-running workers) build one from a validated
//! [`CoreConfig`](core_runtime::config::CoreConfig) and drive:
//!
//! - batch enhancement runs ([`CoreService::enhance`]),
//! - checksum runs ([`CoreService::check_checksums`]),
//! - event-driven enhancement of modified items ([`CoreService::enhancement_consumer`]).
//!
//! Enabling the `desktop-shims` feature provides the filesystem assetstore as
//! the default bitstream store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_service::{CoreService, EnhanceRequest};
//!
//! let service = CoreService::bootstrap(config).await?;
//! let report = service
//!     .enhance(&EnhanceRequest::default().with_scope("123456789/42").with_dry_run(true))
//!     .await?;
//! println!("{}", report.summary());
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::search::SearchIndex;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use core_checksum::{
    parse_result_codes, ChecksumJob, ChecksumReport, DispatchSources, DispatchStrategy, LogReporter,
};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::{ContainerId, HandleTarget, MetadataField};
use core_library::repositories::{
    ContainerRepository, SqliteBitstreamRepository, SqliteChecksumHistoryRepository, SqliteContainerRepository,
    SqliteItemRepository,
};
use core_library::SqliteSearchIndex;
use core_metadata::enhancer::{ProfileCopyEnhancer, RelatedEntityEnhancer, WhitespaceNormalizeEnhancer};
use core_metadata::{
    BatchSelector, EnhancementConfig, EnhancementConsumer, EnhancementJob, EnhancementReport, EnhancerRegistry,
    SelectionFilters,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

const EVENT_BUS_CAPACITY: usize = 1024;

/// Fields cleaned by the whitespace enhancer in the default registry.
const NORMALIZED_FIELDS: &[&str] = &[
    "dc.title",
    "dc.title.alternative",
    "dc.contributor.author",
    "dc.contributor.editor",
    "dc.description.abstract",
    "dc.subject",
];

fn field(key: &str) -> Result<MetadataField> {
    Ok(MetadataField::parse(key)?)
}

/// The enhancers a stock installation runs, in order.
///
/// 1. Whitespace normalization of descriptive fields
/// 2. Department virtual metadata on publications, from their authors and editors
/// 3. ORCID copy from the owning researcher profile
pub fn default_registry() -> Result<EnhancerRegistry> {
    let normalized = NORMALIZED_FIELDS.iter().map(|key| field(key)).collect::<Result<Vec<_>>>()?;

    let departments = RelatedEntityEnhancer::new("Publication", "department", field("person.affiliation.name")?)
        .with_source_fields(vec![field("dc.contributor.author")?, field("dc.contributor.editor")?]);

    let orcid = ProfileCopyEnhancer::new(field("dspace.object.owner")?)
        .with_mapping(field("person.identifier.orcid")?, field("person.identifier.orcid")?);

    Ok(EnhancerRegistry::builder()
        .register(WhitespaceNormalizeEnhancer::new(normalized))
        .register(departments)
        .register(orcid)
        .build())
}

/// Parse a lower date bound given as RFC 3339 or as a plain `YYYY-MM-DD` day
/// (start of the day, UTC).
pub fn parse_date_bound(input: &str) -> Result<DateTime<Utc>> {
    parse_date(input, |day| day.and_hms_opt(0, 0, 0))
}

/// Parse an upper date bound. A plain day covers the whole day, up to its
/// last nanosecond.
pub fn parse_date_upper_bound(input: &str) -> Result<DateTime<Utc>> {
    parse_date(input, |day| day.and_hms_nano_opt(23, 59, 59, 999_999_999))
}

fn parse_date(input: &str, time_of_day: impl FnOnce(NaiveDate) -> Option<NaiveDateTime>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(time_of_day)
        .map(|at| at.and_utc())
        .ok_or_else(|| CoreError::Setup(format!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", input)))
}

// =============================================================================
// Requests
// =============================================================================

/// Parameters of a batch enhancement run. Unset values fall back to the
/// configured enhancement defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhanceRequest {
    /// Community or collection, by id or handle
    pub scope: Option<String>,
    pub entity_type: Option<String>,
    pub query: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub max_results: Option<usize>,
    pub page_size: Option<usize>,
    pub dry_run: bool,
    pub force: bool,
}

impl EnhanceRequest {
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
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

/// Parameters of a checksum run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumRequest {
    pub strategy: DispatchStrategy,
    /// Prune expired history first
    pub prune: bool,
    /// Report matches too
    pub verbose: bool,
}

// =============================================================================
// Service
// =============================================================================

/// Primary façade exposed to hosts.
pub struct CoreService {
    config: CoreConfig,
    pool: SqlitePool,
    event_bus: Arc<EventBus>,
    items: Arc<SqliteItemRepository>,
    containers: Arc<SqliteContainerRepository>,
    bitstreams: Arc<SqliteBitstreamRepository>,
    history: Arc<SqliteChecksumHistoryRepository>,
    search_index: Arc<dyn SearchIndex>,
    registry: Arc<EnhancerRegistry>,
}

impl CoreService {
    /// Open the configured database and build the service with the default
    /// enhancer registry.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        Self::with_pool(config, pool)
    }

    /// Build the service over an existing pool.
    pub fn with_pool(config: CoreConfig, pool: SqlitePool) -> Result<Self> {
        let items = Arc::new(
            SqliteItemRepository::new(pool.clone())
                .with_session_cache_capacity(config.enhancement.session_cache_capacity),
        );
        let search_index: Arc<dyn SearchIndex> = match &config.search_index {
            Some(index) => Arc::clone(index),
            None => Arc::new(SqliteSearchIndex::new(pool.clone())),
        };

        Ok(Self {
            items,
            containers: Arc::new(SqliteContainerRepository::new(pool.clone())),
            bitstreams: Arc::new(SqliteBitstreamRepository::new(pool.clone())),
            history: Arc::new(SqliteChecksumHistoryRepository::new(pool.clone())),
            search_index,
            registry: Arc::new(default_registry()?),
            event_bus: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
            config,
            pool,
        })
    }

    /// Replace the enhancer registry.
    pub fn with_registry(mut self, registry: EnhancerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn registry(&self) -> Arc<EnhancerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Resolve a community or collection given by id or handle.
    ///
    /// # Errors
    ///
    /// [`CoreError::Setup`] when the scope is unknown or names an item.
    pub async fn resolve_scope(&self, scope: &str) -> Result<ContainerId> {
        let scope = scope.trim();
        if let Ok(id) = uuid::Uuid::parse_str(scope) {
            let id = ContainerId(id);
            return match self.containers.find_by_id(&id).await? {
                Some(_) => Ok(id),
                None => Err(CoreError::Setup(format!("No community or collection with id {}", scope))),
            };
        }

        match self.containers.resolve_handle(scope).await? {
            Some(HandleTarget::Community(id)) | Some(HandleTarget::Collection(id)) => Ok(id),
            Some(HandleTarget::Item(_)) => Err(CoreError::Setup(format!(
                "Handle {} is an item, not a community or collection",
                scope
            ))),
            None => Err(CoreError::Setup(format!("Unknown handle {}", scope))),
        }
    }

    /// Run a batch enhancement.
    ///
    /// Per-item failures are part of the report. Errors are returned for
    /// setup problems and for an unusable index.
    #[instrument(skip(self, request))]
    pub async fn enhance(&self, request: &EnhanceRequest) -> Result<EnhancementReport> {
        let defaults = &self.config.enhancement;

        let mut filters = SelectionFilters::new();
        if let Some(scope) = &request.scope {
            filters = filters.with_scope(self.resolve_scope(scope).await?);
        }
        if let Some(entity_type) = &request.entity_type {
            filters = filters.with_entity_type(entity_type.clone());
        }
        if let Some(query) = &request.query {
            filters = filters.with_query(query.clone());
        }
        if let Some(from) = request.date_from {
            filters = filters.with_date_from(from);
        }
        if let Some(to) = request.date_to {
            filters = filters.with_date_to(to);
        }
        if let (Some(from), Some(to)) = (request.date_from, request.date_to) {
            if from > to {
                return Err(CoreError::Setup(format!("Date range is empty: {} is after {}", from, to)));
            }
        }
        if let Some(max) = request.max_results.or(defaults.max_results) {
            filters = filters.with_max_results(max);
        }

        let mut config = EnhancementConfig::from(defaults)
            .with_dry_run(request.dry_run || defaults.dry_run)
            .with_force(request.force || defaults.force);
        if let Some(size) = request.page_size {
            config.page_size = (size > 0).then_some(size);
        }

        info!(
            enhancers = ?self.registry.names(),
            dry_run = config.dry_run,
            force = config.force,
            page_size = ?config.page_size,
            "Starting enhancement"
        );
        let job = EnhancementJob::new(
            config,
            BatchSelector::new(self.search_index.clone()),
            self.registry.clone(),
            self.items.clone(),
        )
        .with_event_bus(self.event_bus.clone());

        Ok(job.run(&filters).await?)
    }

    /// Run the checksum checker until the strategy is exhausted or `cancel`
    /// fires.
    #[instrument(skip(self, cancel))]
    pub async fn check_checksums(&self, request: &ChecksumRequest, cancel: CancellationToken) -> Result<ChecksumReport> {
        let settings = &self.config.checksum;
        let sources = DispatchSources {
            history: self.history.clone(),
            bitstreams: self.bitstreams.clone(),
            containers: self.containers.clone(),
            clock: self.config.clock.clone(),
            terminal: parse_result_codes(settings.terminal_result_codes.as_slice())?,
            cancel,
        };

        let mut job = ChecksumJob::new(sources, self.config.bitstream_store.clone())
            .with_reporter(Arc::new(LogReporter::new(request.verbose || settings.verbose)))
            .with_event_bus(self.event_bus.clone());
        if request.prune {
            job = job.with_pruning(settings.clone());
        }

        Ok(job.run(&request.strategy).await?)
    }

    /// Consumer enhancing items as they are modified.
    pub fn enhancement_consumer(&self) -> EnhancementConsumer {
        EnhancementConsumer::new(self.registry.clone(), self.items.clone()).with_event_bus(self.event_bus.clone())
    }
}
