//! Metadata field registry
//!
//! Maps `schema.element.qualifier` keys to their row ids. Lookups are cached
//! in the registry object itself; callers share it through an `Arc` and call
//! [`MetadataFieldRegistry::invalidate`] whenever the field table changes
//! behind their back.

use crate::error::Result;
use crate::models::MetadataField;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Cached view of the `metadata_fields` table.
#[derive(Debug, Default)]
pub struct MetadataFieldRegistry {
    ids: RwLock<HashMap<MetadataField, i64>>,
}

impl MetadataFieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached id for `field`, if known.
    pub fn cached_id(&self, field: &MetadataField) -> Option<i64> {
        self.ids
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(field)
            .copied()
    }

    /// Record a committed field id.
    pub fn remember(&self, field: MetadataField, id: i64) {
        self.ids
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(field, id);
    }

    /// Drop every cached id.
    pub fn invalidate(&self) {
        let mut ids = self.ids.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(cached = ids.len(), "Invalidating metadata field registry");
        ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look `field` up in the database without touching the cache.
    pub async fn lookup(conn: &mut SqliteConnection, field: &MetadataField) -> Result<Option<i64>> {
        let id: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM metadata_fields WHERE schema_name = ? AND element = ? AND qualifier = ?",
        )
        .bind(&field.schema)
        .bind(&field.element)
        .bind(field.qualifier_or_empty())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(id.map(|(id,)| id))
    }

    /// Insert `field` and return its new id.
    pub async fn create(conn: &mut SqliteConnection, field: &MetadataField) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO metadata_fields (schema_name, element, qualifier) VALUES (?, ?, ?)",
        )
        .bind(&field.schema)
        .bind(&field.element)
        .bind(field.qualifier_or_empty())
        .execute(&mut *conn)
        .await?;

        debug!(field = %field, "Registered metadata field");
        Ok(result.last_insert_rowid())
    }

    /// Resolve `field` on a connection outside any session, creating it if
    /// needed. The id is cached.
    pub async fn ensure(&self, conn: &mut SqliteConnection, field: &MetadataField) -> Result<i64> {
        if let Some(id) = self.cached_id(field) {
            return Ok(id);
        }

        let id = match Self::lookup(conn, field).await? {
            Some(id) => id,
            None => Self::create(conn, field).await?,
        };
        self.remember(field.clone(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_ensure_creates_and_caches() {
        let pool = create_test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let registry = MetadataFieldRegistry::new();
        let field = MetadataField::parse("cris.virtual.department").unwrap();

        assert!(registry.is_empty());
        let id = registry.ensure(&mut conn, &field).await.unwrap();
        assert_eq!(registry.cached_id(&field), Some(id));

        let again = registry.ensure(&mut conn, &field).await.unwrap();
        assert_eq!(id, again);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metadata_fields")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let pool = create_test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let registry = MetadataFieldRegistry::new();
        let title = MetadataField::parse("dc.title").unwrap();

        let id = registry.ensure(&mut conn, &title).await.unwrap();
        registry.invalidate();
        assert_eq!(registry.cached_id(&title), None);

        // The row is still there, so the same id comes back.
        assert_eq!(registry.ensure(&mut conn, &title).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_missing_qualifier_stored_as_empty() {
        let pool = create_test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let title = MetadataField::parse("dc.title").unwrap();

        MetadataFieldRegistry::create(&mut conn, &title).await.unwrap();
        let qualifier: (String,) =
            sqlx::query_as("SELECT qualifier FROM metadata_fields WHERE element = 'title'")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(qualifier.0, "");
    }
}
