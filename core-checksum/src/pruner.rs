//! Checksum history retention.
//!
//! Each result code with a retention override is pruned with its own cutoff;
//! every other code uses the default retention.

use crate::dispatcher::parse_result_codes;
use crate::error::Result;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::repositories::ChecksumHistoryRepository;
use core_runtime::config::ChecksumSettings;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct HistoryPruner {
    history: Arc<dyn ChecksumHistoryRepository>,
    clock: Arc<dyn Clock>,
    settings: ChecksumSettings,
}

impl HistoryPruner {
    pub fn new(history: Arc<dyn ChecksumHistoryRepository>, clock: Arc<dyn Clock>, settings: ChecksumSettings) -> Self {
        Self {
            history,
            clock,
            settings,
        }
    }

    fn cutoff(&self, retention: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| self.clock.now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Delete expired history entries. Returns the number deleted.
    pub async fn prune(&self) -> Result<u64> {
        let overrides: Vec<&String> = self.settings.retention.keys().collect();
        let codes = parse_result_codes(overrides.as_slice())?;

        let mut deleted = 0;
        for code in &codes {
            let retention = self.settings.retention_for(code.as_str());
            let removed = self.history.prune(*code, self.cutoff(retention)).await?;
            debug!(result = %code, removed, "Pruned checksum history");
            deleted += removed;
        }
        deleted += self
            .history
            .prune_excluding(&codes, self.cutoff(self.settings.default_retention))
            .await?;

        info!(deleted, "Checksum history pruned");
        Ok(deleted)
    }
}
