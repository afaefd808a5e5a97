//! # Batch Selector
//!
//! Resolves the work set of an enhancement run through the search index.
//!
//! Results are always restricted to archived items and ordered ascending by
//! last modification time, ties kept in index order. The ordering is what
//! lets a paginated or resumed run make monotonic progress, and what lets a
//! "since last run" lower date bound compose with it.
//!
//! An unreachable index is an error, never an empty work set.

use crate::error::{MetadataError, Result};
use bridge_traits::error::BridgeError;
use bridge_traits::search::{FilterQuery, ObjectKind, SearchIndex, SearchRequest, SortOrder, MATCH_ALL};
use chrono::{DateTime, Utc};
use core_library::models::{ContainerId, ItemId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One item to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub item_id: ItemId,
    pub last_modified: DateTime<Utc>,
}

/// Filters narrowing the work set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionFilters {
    /// Free-text query; match-all when unset.
    pub query: Option<String>,
    pub entity_type: Option<String>,
    /// Community or collection the items must live under.
    pub scope: Option<ContainerId>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub max_results: Option<usize>,
}

impl SelectionFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_scope(mut self, scope: ContainerId) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_date_from(mut self, from: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self
    }

    pub fn with_date_to(mut self, to: DateTime<Utc>) -> Self {
        self.date_to = Some(to);
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Search request equivalent to these filters.
    pub fn to_request(&self) -> SearchRequest {
        let query = self
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(MATCH_ALL);

        let mut request = SearchRequest::new(query)
            .with_filter(FilterQuery::ObjectKind(ObjectKind::Item))
            .with_sort(SortOrder::Ascending);

        if let Some(entity_type) = &self.entity_type {
            request = request.with_filter(FilterQuery::EntityType(entity_type.clone()));
        }
        if let Some(scope) = self.scope {
            request = request.with_filter(FilterQuery::Scope(scope.0));
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            request = request.with_filter(FilterQuery::LastModified {
                from: self.date_from,
                to: self.date_to,
            });
        }
        if let Some(max) = self.max_results {
            request = request.with_limit(max);
        }
        request
    }
}

pub struct BatchSelector {
    index: Arc<dyn SearchIndex>,
}

impl BatchSelector {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// Check that the index answers.
    pub async fn ensure_index_available(&self) -> Result<()> {
        match self.index.ping().await {
            Ok(0) => Ok(()),
            Ok(status) => Err(MetadataError::IndexUnavailable(format!(
                "ping returned status {}",
                status
            ))),
            Err(e) => Err(MetadataError::IndexUnavailable(e.to_string())),
        }
    }

    #[instrument(skip(self, filters))]
    pub async fn select(&self, filters: &SelectionFilters) -> Result<Vec<WorkItem>> {
        self.ensure_index_available().await?;

        let request = filters.to_request();
        debug!(
            query = %request.query,
            filters = ?request
                .filter_queries
                .iter()
                .map(FilterQuery::to_query_string)
                .collect::<Vec<_>>(),
            "Querying search index"
        );

        let hits = self.index.query(&request).await.map_err(|e| match e {
            BridgeError::IndexUnavailable(message) => MetadataError::IndexUnavailable(message),
            other => MetadataError::Selection(other.to_string()),
        })?;

        let mut work: Vec<WorkItem> = hits
            .into_iter()
            .map(|hit| WorkItem {
                item_id: ItemId(hit.id),
                last_modified: hit.last_modified,
            })
            .collect();
        // Stable: ties keep the index order.
        work.sort_by_key(|w| w.last_modified);
        if let Some(max) = filters.max_results {
            work.truncate(max);
        }

        info!(selected = work.len(), "Selected items for enhancement");
        Ok(work)
    }
}
