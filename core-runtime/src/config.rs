//! # Core Configuration Module
//!
//! Configuration for the curation engine.
//!
//! ## Overview
//!
//! A `CoreConfig` is assembled with [`CoreConfig::builder`] and validated on
//! `build()`, so a misconfigured run fails before it touches the database.
//! It carries:
//!
//! - the SQLite database path and the assetstore directory,
//! - defaults for batch enhancement runs ([`EnhancementSettings`]),
//! - checksum checker settings ([`ChecksumSettings`]),
//! - logging configuration,
//! - injected collaborators (bitstream store, search index, clock).
//!
//! When the `desktop-shims` feature is enabled and no bitstream store is
//! injected, a filesystem store rooted at the assetstore directory is used.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, EnhancementSettings};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/srv/curation/repository.db")
//!     .assetstore_dir("/srv/curation/assetstore")
//!     .enhancement(EnhancementSettings::default().with_page_size(200))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::{BitstreamStore, Clock, SearchIndex, SystemClock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Result codes that are never re-dispatched by a looping checksum run.
pub const DEFAULT_TERMINAL_RESULT_CODES: &[&str] = &[
    "BITSTREAM_NOT_FOUND",
    "BITSTREAM_MARKED_DELETED",
    "CHECKSUM_ALGORITHM_INVALID",
];

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Default settings for batch enhancement runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementSettings {
    /// Items per commit. `None` commits once at the end.
    pub page_size: Option<usize>,
    /// Cap on the number of selected items.
    pub max_results: Option<usize>,
    /// Roll back every page and only report the changes.
    pub dry_run: bool,
    /// Re-derive enhanced values even when they look current.
    pub force: bool,
    /// Capacity of the per-session item cache.
    pub session_cache_capacity: usize,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            page_size: None,
            max_results: None,
            dry_run: false,
            force: false,
            session_cache_capacity: 512,
        }
    }
}

impl EnhancementSettings {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = if page_size == 0 {
            None
        } else {
            Some(page_size)
        };
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
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

    pub fn with_session_cache_capacity(mut self, capacity: usize) -> Self {
        self.session_cache_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_cache_capacity == 0 {
            return Err(Error::Config(
                "Session cache capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_results == Some(0) {
            return Err(Error::Config(
                "Max results must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Checksum checker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSettings {
    /// Retention for history entries without a per-code override.
    pub default_retention: Duration,
    /// Per result code retention, keyed by code name (e.g. `CHECKSUM_MATCH`).
    pub retention: BTreeMap<String, Duration>,
    /// Result codes excluded from looping runs.
    pub terminal_result_codes: Vec<String>,
    /// Report every result instead of only the failures.
    pub verbose: bool,
}

impl Default for ChecksumSettings {
    fn default() -> Self {
        let mut retention = BTreeMap::new();
        retention.insert(
            "CHECKSUM_MATCH".to_string(),
            Duration::from_secs(8 * 7 * SECONDS_PER_DAY),
        );

        Self {
            default_retention: Duration::from_secs(10 * 365 * SECONDS_PER_DAY),
            retention,
            terminal_result_codes: DEFAULT_TERMINAL_RESULT_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            verbose: false,
        }
    }
}

impl ChecksumSettings {
    pub fn with_default_retention(mut self, retention: Duration) -> Self {
        self.default_retention = retention;
        self
    }

    pub fn with_retention(mut self, result_code: impl Into<String>, retention: Duration) -> Self {
        self.retention.insert(result_code.into(), retention);
        self
    }

    pub fn with_terminal_result_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_result_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Retention that applies to `result_code`.
    pub fn retention_for(&self, result_code: &str) -> Duration {
        self.retention
            .get(result_code)
            .copied()
            .unwrap_or(self.default_retention)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_retention.is_zero() {
            return Err(Error::Config(
                "Default checksum history retention must be greater than 0".to_string(),
            ));
        }
        for (code, retention) in &self.retention {
            if code.trim().is_empty() {
                return Err(Error::Config(
                    "Checksum retention override has an empty result code".to_string(),
                ));
            }
            if retention.is_zero() {
                return Err(Error::Config(format!(
                    "Checksum retention for {} must be greater than 0",
                    code
                )));
            }
        }
        Ok(())
    }
}

/// Parse a duration such as `30s`, `15m`, `2h`, `7d`, `4w` or `1y`.
///
/// A bare number is read as seconds. Years are 365 days.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Config("Duration cannot be empty".to_string()));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration: {}", input)))?;

    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => SECONDS_PER_DAY,
        "w" => 7 * SECONDS_PER_DAY,
        "y" => 365 * SECONDS_PER_DAY,
        other => {
            return Err(Error::Config(format!(
                "Unknown duration unit '{}' in {}",
                other, input
            )))
        }
    };

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("Duration out of range: {}", input)))
}

/// Core configuration for the curation engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Root of the bitstream assetstore
    pub assetstore_dir: PathBuf,

    /// Defaults for enhancement runs
    pub enhancement: EnhancementSettings,

    /// Checksum checker settings
    pub checksum: ChecksumSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Bitstream content store
    pub bitstream_store: Arc<dyn BitstreamStore>,

    /// Search index override (the service falls back to the SQLite index)
    pub search_index: Option<Arc<dyn SearchIndex>>,

    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("assetstore_dir", &self.assetstore_dir)
            .field("enhancement", &self.enhancement)
            .field("checksum", &self.checksum)
            .field("logging", &self.logging)
            .field("bitstream_store", &"BitstreamStore { ... }")
            .field(
                "search_index",
                &self.search_index.as_ref().map(|_| "SearchIndex { ... }"),
            )
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Database path and assetstore directory are not empty
    /// - Enhancement and checksum settings are consistent
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.assetstore_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Assetstore directory cannot be empty".to_string(),
            ));
        }

        self.enhancement.validate()?;
        self.checksum.validate()?;

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_bitstream_store(assetstore_dir: &std::path::Path) -> Result<Arc<dyn BitstreamStore>> {
    Ok(Arc::new(bridge_desktop::FsBitstreamStore::with_root(
        assetstore_dir,
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_bitstream_store(_assetstore_dir: &std::path::Path) -> Result<Arc<dyn BitstreamStore>> {
    Err(Error::CapabilityMissing {
        capability: "BitstreamStore",
        hint: "enable the 'desktop-shims' feature for the filesystem assetstore \
               or inject a store with .bitstream_store()"
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    assetstore_dir: Option<PathBuf>,
    enhancement: Option<EnhancementSettings>,
    checksum: Option<ChecksumSettings>,
    logging: Option<LoggingConfig>,
    bitstream_store: Option<Arc<dyn BitstreamStore>>,
    search_index: Option<Arc<dyn SearchIndex>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the assetstore directory.
    pub fn assetstore_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.assetstore_dir = Some(path.into());
        self
    }

    pub fn enhancement(mut self, settings: EnhancementSettings) -> Self {
        self.enhancement = Some(settings);
        self
    }

    pub fn checksum(mut self, settings: ChecksumSettings) -> Self {
        self.checksum = Some(settings);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Injects a bitstream store instead of the filesystem default.
    pub fn bitstream_store(mut self, store: Arc<dyn BitstreamStore>) -> Self {
        self.bitstream_store = Some(store);
        self
    }

    pub fn search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when a required path is missing or a setting is invalid
    /// - `Error::CapabilityMissing` when no bitstream store is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let assetstore_dir = self.assetstore_dir.ok_or_else(|| {
            Error::Config(
                "Assetstore directory is required. Use .assetstore_dir() to set it.".to_string(),
            )
        })?;

        let bitstream_store = match self.bitstream_store {
            Some(store) => store,
            None => provide_default_bitstream_store(&assetstore_dir)?,
        };

        let config = CoreConfig {
            database_path,
            assetstore_dir,
            enhancement: self.enhancement.unwrap_or_default(),
            checksum: self.checksum.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            bitstream_store,
            search_index: self.search_index,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
