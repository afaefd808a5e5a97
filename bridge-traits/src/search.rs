//! Search Index Abstraction
//!
//! The enhancement selector only needs two things from a discovery index: a
//! liveness check and a filtered query that returns object identifiers with
//! their last-modified timestamps. Filters are modelled as typed values and
//! rendered to Solr-style filter strings for backends that speak that syntax.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Query that matches every document.
pub const MATCH_ALL: &str = "*:*";

/// Kind of indexed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Item,
    Collection,
    Community,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Item => "Item",
            ObjectKind::Collection => "Collection",
            ObjectKind::Community => "Community",
        }
    }
}

/// A single filter clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterQuery {
    /// Restrict results to one object kind.
    ObjectKind(ObjectKind),
    /// Restrict items to an entity type (e.g. `Publication`).
    EntityType(String),
    /// Restrict to objects located under a container.
    Scope(Uuid),
    /// Last-modified range. A missing bound is open.
    LastModified {
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

impl FilterQuery {
    /// Render the clause in Solr filter syntax.
    pub fn to_query_string(&self) -> String {
        match self {
            FilterQuery::ObjectKind(kind) => format!("search.resourcetype:{}", kind.as_str()),
            FilterQuery::EntityType(entity_type) => {
                format!("dspace.entity.type:{}", entity_type)
            }
            FilterQuery::Scope(container) => format!("location:{}", container),
            FilterQuery::LastModified { from, to } => {
                let bound = |value: &Option<DateTime<Utc>>| {
                    value
                        .map(|v| v.to_rfc3339_opts(SecondsFormat::Millis, true))
                        .unwrap_or_else(|| "*".to_string())
                };
                format!("lastModified:[{} TO {}]", bound(from), bound(to))
            }
        }
    }
}

/// Sort direction on the last-modified timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Query sent to a [`SearchIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub filter_queries: Vec<FilterQuery>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: MATCH_ALL.to_string(),
            filter_queries: Vec::new(),
            sort: SortOrder::Ascending,
            limit: None,
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: FilterQuery) -> Self {
        self.filter_queries.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `true` when the free-text query matches everything.
    pub fn is_match_all(&self) -> bool {
        let trimmed = self.query.trim();
        trimmed.is_empty() || trimmed == MATCH_ALL
    }
}

/// A search result: the object id and when it last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub last_modified: DateTime<Utc>,
}

/// Discovery index used to select objects for batch processing.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::search::{SearchIndex, SearchRequest, FilterQuery, ObjectKind};
///
/// async fn items(index: &dyn SearchIndex) -> Result<usize> {
///     index.ping().await?;
///     let request = SearchRequest::default().with_filter(FilterQuery::ObjectKind(ObjectKind::Item));
///     Ok(index.query(&request).await?.len())
/// }
/// ```
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Check the index. Returns the backend status code (0 means healthy).
    async fn ping(&self) -> Result<u16>;

    /// Run a query and return the matching hits.
    async fn query(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}
