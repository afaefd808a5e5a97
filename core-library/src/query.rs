//! SQLite-backed search index.
//!
//! Answers [`SearchRequest`]s straight from the item tables so a standalone
//! deployment needs no external index. Supported query forms:
//!
//! - `*:*` or empty: every item
//! - `schema.element[.qualifier]:value`: items with that field value, `*`
//!   acting as a wildcard inside the value
//! - anything else: items with any metadata value containing the text
//!
//! Hits are ordered by last modification time, ties broken by id.

use crate::models::{from_millis, to_millis, ItemId, MetadataField, ENTITY_TYPE_FIELD};
use crate::repositories::container::DESCENDANTS_CTE;
use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::search::{FilterQuery, ObjectKind, SearchHit, SearchIndex, SearchRequest, SortOrder};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

/// Parsed free-text part of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TextQuery {
    All,
    Field { field: MetadataField, pattern: String },
    Anywhere(String),
}

impl TextQuery {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == bridge_traits::search::MATCH_ALL {
            return TextQuery::All;
        }

        if let Some((key, value)) = raw.split_once(':') {
            if !key.contains(char::is_whitespace) {
                if let Ok(field) = MetadataField::parse(key) {
                    return TextQuery::Field {
                        field,
                        pattern: like_pattern(value.trim(), false),
                    };
                }
            }
        }
        TextQuery::Anywhere(like_pattern(raw, true))
    }
}

/// Build a LIKE pattern. `*` becomes `%`; `contains` wraps the text in `%`.
fn like_pattern(text: &str, contains: bool) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    if contains {
        pattern.push('%');
    }
    for c in text.chars() {
        match c {
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push('%'),
            other => pattern.push(other),
        }
    }
    if contains {
        pattern.push('%');
    }
    pattern
}

fn push_field_match(builder: &mut QueryBuilder<'_, Sqlite>, field: &MetadataField, pattern: String) {
    builder.push(
        " AND EXISTS (SELECT 1 FROM metadata_values v JOIN metadata_fields f ON f.id = v.field_id \
         WHERE v.item_id = i.id AND f.schema_name = ",
    );
    builder.push_bind(field.schema.clone());
    builder.push(" AND f.element = ");
    builder.push_bind(field.element.clone());
    builder.push(" AND f.qualifier = ");
    builder.push_bind(field.qualifier_or_empty().to_string());
    builder.push(" AND v.text_value LIKE ");
    builder.push_bind(pattern);
    builder.push(" ESCAPE '\\')");
}

/// [`SearchIndex`] over the repository database
pub struct SqliteSearchIndex {
    pool: SqlitePool,
}

impl SqliteSearchIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn build<'a>(request: &SearchRequest) -> Option<QueryBuilder<'a, Sqlite>> {
        let mut scope: Option<String> = None;
        for filter in &request.filter_queries {
            if let FilterQuery::Scope(container) = filter {
                scope = Some(container.to_string());
            }
        }

        let mut builder: QueryBuilder<'a, Sqlite> = QueryBuilder::new("");
        if let Some(container) = scope {
            // DESCENDANTS_CTE carries exactly one placeholder, the root id.
            let (head, tail) = DESCENDANTS_CTE.split_once('?').unwrap_or((DESCENDANTS_CTE, ""));
            builder.push(head);
            builder.push_bind(container);
            builder.push(tail);
        }
        builder.push("SELECT i.id, i.last_modified FROM items i WHERE 1 = 1");

        for filter in &request.filter_queries {
            match filter {
                FilterQuery::ObjectKind(ObjectKind::Item) => {
                    builder.push(" AND i.in_archive = 1 AND i.withdrawn = 0");
                }
                // Only items live in this index.
                FilterQuery::ObjectKind(_) => return None,
                FilterQuery::EntityType(entity_type) => {
                    let (schema, element, qualifier) = ENTITY_TYPE_FIELD;
                    let field = MetadataField::new(schema, element, Some(qualifier));
                    push_field_match(&mut builder, &field, like_pattern(entity_type, false));
                }
                FilterQuery::Scope(_) => {
                    builder.push(" AND i.owning_collection IN (SELECT id FROM subtree)");
                }
                FilterQuery::LastModified { from, to } => {
                    if let Some(from) = from {
                        builder.push(" AND i.last_modified >= ");
                        builder.push_bind(to_millis(*from));
                    }
                    if let Some(to) = to {
                        builder.push(" AND i.last_modified <= ");
                        builder.push_bind(to_millis(*to));
                    }
                }
            }
        }

        match TextQuery::parse(&request.query) {
            TextQuery::All => {}
            TextQuery::Field { field, pattern } => push_field_match(&mut builder, &field, pattern),
            TextQuery::Anywhere(pattern) => {
                builder.push(
                    " AND EXISTS (SELECT 1 FROM metadata_values v WHERE v.item_id = i.id \
                     AND v.text_value LIKE ",
                );
                builder.push_bind(pattern);
                builder.push(" ESCAPE '\\')");
            }
        }

        match request.sort {
            SortOrder::Ascending => builder.push(" ORDER BY i.last_modified ASC, i.id ASC"),
            SortOrder::Descending => builder.push(" ORDER BY i.last_modified DESC, i.id DESC"),
        };
        if let Some(limit) = request.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        Some(builder)
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn ping(&self) -> Result<u16> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::IndexUnavailable(e.to_string()))?;
        Ok(0)
    }

    #[instrument(skip(self, request), fields(query = %request.query, filters = request.filter_queries.len()))]
    async fn query(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let Some(mut builder) = Self::build(request) else {
            return Ok(Vec::new());
        };

        let rows: Vec<(String, i64)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::IndexUnavailable(e.to_string()))?;

        let hits = rows
            .into_iter()
            .map(|(id, last_modified)| {
                let id = ItemId::from_string(&id).map_err(|e| BridgeError::InvalidQuery(e.to_string()))?;
                Ok(SearchHit {
                    id: id.0,
                    last_modified: from_millis(last_modified),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(hits = hits.len(), "Search completed");
        Ok(hits)
    }
}
