//! Item repository and per-run persistence sessions
//!
//! [`ItemRepository`] covers plain reads and inserts against the pool.
//! Batch jobs open an [`ItemSession`] instead: every read and write inside a
//! session goes through one lazily opened transaction, so a page of work can
//! be committed or rolled back as a unit. The session also keeps a bounded
//! working-set cache of the items it has loaded.

use crate::error::{LibraryError, Result};
use crate::models::{from_millis, to_millis, ContainerId, Item, ItemId, MetadataField, MetadataValue};
use crate::repositories::field_registry::MetadataFieldRegistry;
use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Default capacity of a session's working-set cache.
pub const DEFAULT_SESSION_CACHE_CAPACITY: usize = 512;

/// Item repository interface for pool-level access
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Find an item with its metadata
    ///
    /// # Returns
    /// - `Ok(Some(item))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<Item>>;

    /// Insert a new item together with its metadata
    async fn insert(&self, item: &Item) -> Result<()>;

    /// Open a persistence session for a batch run
    async fn begin_session(&self) -> Result<Box<dyn ItemSession>>;
}

/// Unit-of-work over items.
///
/// Nothing written through a session is visible outside it until
/// [`commit`](ItemSession::commit). After `commit` or `rollback` the session
/// can be reused; the next access opens a new transaction.
#[async_trait]
pub trait ItemSession: Send {
    /// Resolve an item, serving it from the working set when cached.
    async fn find_by_id(&mut self, id: &ItemId) -> Result<Option<Item>>;

    /// Persisted values of `field` for an item, in place order.
    async fn get_metadata(&mut self, id: &ItemId, field: &MetadataField) -> Result<Vec<MetadataValue>>;

    /// Write the item's metadata.
    ///
    /// Returns `false` when the persisted metadata already equals the item's,
    /// in which case nothing is written and `last_modified` is untouched.
    async fn update(&mut self, item: &Item) -> Result<bool>;

    /// Drop an item from the working set.
    fn uncache(&mut self, id: &ItemId);

    /// Number of items in the working set.
    fn cached_len(&self) -> usize;

    /// Commit the open transaction, if any.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any, and clear the working set.
    async fn rollback(&mut self) -> Result<()>;
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    handle: Option<String>,
    owning_collection: Option<String>,
    in_archive: bool,
    withdrawn: bool,
    last_modified: i64,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    schema_name: String,
    element: String,
    qualifier: String,
    text_value: String,
    text_lang: Option<String>,
    authority: Option<String>,
    confidence: i32,
    place: i32,
}

impl From<MetadataRow> for MetadataValue {
    fn from(row: MetadataRow) -> Self {
        MetadataValue {
            field: MetadataField::new(row.schema_name, row.element, Some(row.qualifier.as_str())),
            value: row.text_value,
            language: row.text_lang,
            authority: row.authority,
            confidence: row.confidence,
            place: row.place,
        }
    }
}

fn parse_item_id(raw: &str) -> Result<ItemId> {
    ItemId::from_string(raw).map_err(|e| LibraryError::InvalidInput {
        field: "item_id".to_string(),
        message: e.to_string(),
    })
}

fn parse_container_id(raw: &str) -> Result<ContainerId> {
    ContainerId::from_string(raw).map_err(|e| LibraryError::InvalidInput {
        field: "owning_collection".to_string(),
        message: e.to_string(),
    })
}

const METADATA_SELECT: &str = r#"
    SELECT f.schema_name, f.element, f.qualifier,
           v.text_value, v.text_lang, v.authority, v.confidence, v.place
    FROM metadata_values v
    JOIN metadata_fields f ON f.id = v.field_id
"#;

pub(crate) async fn load_metadata(conn: &mut SqliteConnection, id: &ItemId) -> Result<Vec<MetadataValue>> {
    let sql = format!(
        "{} WHERE v.item_id = ? ORDER BY f.schema_name, f.element, f.qualifier, v.place, v.id",
        METADATA_SELECT
    );
    let rows: Vec<MetadataRow> = sqlx::query_as(&sql)
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(MetadataValue::from).collect())
}

pub(crate) async fn load_item(conn: &mut SqliteConnection, id: &ItemId) -> Result<Option<Item>> {
    let row: Option<ItemRow> = sqlx::query_as(
        "SELECT id, handle, owning_collection, in_archive, withdrawn, last_modified FROM items WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let metadata = load_metadata(conn, id).await?;

    Ok(Some(Item {
        id: parse_item_id(&row.id)?,
        handle: row.handle,
        owning_collection: row
            .owning_collection
            .as_deref()
            .map(parse_container_id)
            .transpose()?,
        in_archive: row.in_archive,
        withdrawn: row.withdrawn,
        last_modified: from_millis(row.last_modified),
        metadata,
    }))
}

/// Canonical form used to decide whether an update changes anything:
/// values grouped by field, renumbered by their place order.
fn canonical(values: &[MetadataValue]) -> Vec<MetadataValue> {
    let mut sorted: Vec<MetadataValue> = values.to_vec();
    sorted.sort_by(|a, b| a.field.cmp(&b.field).then(a.place.cmp(&b.place)));

    let mut counters: HashMap<MetadataField, i32> = HashMap::new();
    for value in &mut sorted {
        let counter = counters.entry(value.field.clone()).or_insert(0);
        value.place = *counter;
        *counter += 1;
    }
    sorted
}

async fn insert_values(
    conn: &mut SqliteConnection,
    item_id: &ItemId,
    values: &[MetadataValue],
    mut field_id: impl FnMut(&MetadataField) -> Option<i64>,
) -> Result<()> {
    for value in values {
        let id = field_id(&value.field).ok_or_else(|| LibraryError::Session(format!(
            "metadata field {} was not resolved",
            value.field
        )))?;

        sqlx::query(
            r#"
            INSERT INTO metadata_values (
                item_id, field_id, text_value, text_lang, authority, confidence, place
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item_id.to_string())
        .bind(id)
        .bind(&value.value)
        .bind(&value.language)
        .bind(&value.authority)
        .bind(value.confidence)
        .bind(value.place)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// SQLite repository
// =============================================================================

/// SQLite implementation of ItemRepository
pub struct SqliteItemRepository {
    pool: SqlitePool,
    registry: Arc<MetadataFieldRegistry>,
    session_cache_capacity: usize,
}

impl SqliteItemRepository {
    /// Create a new SQLite item repository with its own field registry
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_registry(pool, Arc::new(MetadataFieldRegistry::new()))
    }

    /// Create a repository sharing an existing field registry
    pub fn with_registry(pool: SqlitePool, registry: Arc<MetadataFieldRegistry>) -> Self {
        Self {
            pool,
            registry,
            session_cache_capacity: DEFAULT_SESSION_CACHE_CAPACITY,
        }
    }

    pub fn with_session_cache_capacity(mut self, capacity: usize) -> Self {
        self.session_cache_capacity = capacity.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<MetadataFieldRegistry> {
        &self.registry
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        load_item(&mut conn, id).await
    }

    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn insert(&self, item: &Item) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO items (id, handle, owning_collection, in_archive, withdrawn, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(&item.handle)
        .bind(item.owning_collection.map(|c| c.to_string()))
        .bind(item.in_archive)
        .bind(item.withdrawn)
        .bind(to_millis(item.last_modified))
        .execute(&mut *tx)
        .await?;

        let values = canonical(&item.metadata);
        let mut ids = HashMap::new();
        for value in &values {
            if !ids.contains_key(&value.field) {
                let id = match MetadataFieldRegistry::lookup(&mut tx, &value.field).await? {
                    Some(id) => id,
                    None => MetadataFieldRegistry::create(&mut tx, &value.field).await?,
                };
                ids.insert(value.field.clone(), id);
            }
        }
        insert_values(&mut tx, &item.id, &values, |field| ids.get(field).copied()).await?;

        tx.commit().await?;

        for (field, id) in ids {
            self.registry.remember(field, id);
        }
        debug!(values = values.len(), "Inserted item");
        Ok(())
    }

    async fn begin_session(&self) -> Result<Box<dyn ItemSession>> {
        Ok(Box::new(SqliteItemSession::new(
            self.pool.clone(),
            Arc::clone(&self.registry),
            self.session_cache_capacity,
        )))
    }
}

// =============================================================================
// SQLite session
// =============================================================================

/// Transaction-scoped session over the item tables.
pub struct SqliteItemSession {
    pool: SqlitePool,
    registry: Arc<MetadataFieldRegistry>,
    tx: Option<Transaction<'static, Sqlite>>,
    cache: LruCache<ItemId, Item>,
    /// Fields created inside the open transaction; published on commit.
    pending_fields: HashMap<MetadataField, i64>,
}

impl SqliteItemSession {
    pub fn new(pool: SqlitePool, registry: Arc<MetadataFieldRegistry>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pool,
            registry,
            tx: None,
            cache: LruCache::new(capacity),
            pending_fields: HashMap::new(),
        }
    }

    async fn transaction(&mut self) -> Result<&mut Transaction<'static, Sqlite>> {
        if self.tx.is_none() {
            trace!("Opening session transaction");
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| LibraryError::Session("transaction unavailable".to_string()))
    }

    async fn resolve_field(&mut self, field: &MetadataField) -> Result<i64> {
        if let Some(id) = self.registry.cached_id(field) {
            return Ok(id);
        }
        if let Some(id) = self.pending_fields.get(field) {
            return Ok(*id);
        }

        let tx = self.transaction().await?;
        match MetadataFieldRegistry::lookup(tx, field).await? {
            Some(id) => {
                self.registry.remember(field.clone(), id);
                Ok(id)
            }
            None => {
                let id = MetadataFieldRegistry::create(tx, field).await?;
                self.pending_fields.insert(field.clone(), id);
                Ok(id)
            }
        }
    }
}

#[async_trait]
impl ItemSession for SqliteItemSession {
    async fn find_by_id(&mut self, id: &ItemId) -> Result<Option<Item>> {
        if let Some(item) = self.cache.get(id) {
            return Ok(Some(item.clone()));
        }

        let tx = self.transaction().await?;
        let item = load_item(tx, id).await?;
        if let Some(item) = &item {
            self.cache.put(item.id, item.clone());
        }
        Ok(item)
    }

    async fn get_metadata(&mut self, id: &ItemId, field: &MetadataField) -> Result<Vec<MetadataValue>> {
        let tx = self.transaction().await?;
        let values = load_metadata(tx, id).await?;
        Ok(values.into_iter().filter(|v| &v.field == field).collect())
    }

    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn update(&mut self, item: &Item) -> Result<bool> {
        let desired = canonical(&item.metadata);

        let tx = self.transaction().await?;
        let persisted = canonical(&load_metadata(tx, &item.id).await?);
        if persisted == desired {
            trace!("Metadata unchanged, skipping write");
            let mut cached = item.clone();
            cached.metadata = desired;
            self.cache.put(item.id, cached);
            return Ok(false);
        }

        let mut field_ids = HashMap::new();
        for value in &desired {
            if !field_ids.contains_key(&value.field) {
                let id = self.resolve_field(&value.field).await?;
                field_ids.insert(value.field.clone(), id);
            }
        }

        let now = Utc::now();
        let tx = self.transaction().await?;

        // Savepoint: a failure leaves this item's rows as they were.
        let mut savepoint = Connection::begin(&mut **tx).await?;

        let updated = sqlx::query("UPDATE items SET last_modified = ? WHERE id = ?")
            .bind(to_millis(now))
            .bind(item.id.to_string())
            .execute(&mut *savepoint)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Item".to_string(),
                id: item.id.to_string(),
            });
        }

        sqlx::query("DELETE FROM metadata_values WHERE item_id = ?")
            .bind(item.id.to_string())
            .execute(&mut *savepoint)
            .await?;

        insert_values(&mut savepoint, &item.id, &desired, |field| {
            field_ids.get(field).copied()
        })
        .await?;

        savepoint.commit().await?;

        let mut cached = item.clone();
        cached.metadata = desired;
        cached.last_modified = now;
        self.cache.put(item.id, cached);

        debug!("Item metadata written");
        Ok(true)
    }

    fn uncache(&mut self, id: &ItemId) {
        self.cache.pop(id);
    }

    fn cached_len(&self) -> usize {
        self.cache.len()
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            trace!("Session transaction committed");
        }
        for (field, id) in self.pending_fields.drain() {
            self.registry.remember(field, id);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.cache.clear();
        self.pending_fields.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            trace!("Session transaction rolled back");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn field(key: &str) -> MetadataField {
        MetadataField::parse(key).unwrap()
    }

    async fn repository_with_item() -> (SqliteItemRepository, Item) {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool);
        let item = Item::new(ItemId::new())
            .with_handle("123456789/1")
            .with_value(MetadataValue::new(field("dc.title"), "A study of things"))
            .with_value(MetadataValue::new(field("dc.contributor.author"), "Smith, J."))
            .with_value(
                MetadataValue::new(field("dc.contributor.author"), "Doe, A.")
                    .with_authority("0f6c0a55-1111-4000-8000-000000000001"),
            );
        repo.insert(&item).await.unwrap();
        (repo, item)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (repo, item) = repository_with_item().await;

        let found = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(found.handle.as_deref(), Some("123456789/1"));
        assert_eq!(
            found.value_strings(&field("dc.contributor.author")),
            vec!["Smith, J.", "Doe, A."]
        );
        let author_field = field("dc.contributor.author");
        let authored: Vec<_> = found.values(&author_field).collect();
        assert_eq!(
            authored[1].authority.as_deref(),
            Some("0f6c0a55-1111-4000-8000-000000000001")
        );
        assert!(repo.find_by_id(&ItemId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_update_commit() {
        let (repo, item) = repository_with_item().await;
        let mut session = repo.begin_session().await.unwrap();

        let mut loaded = session.find_by_id(&item.id).await.unwrap().unwrap();
        loaded.add_value(MetadataValue::new(field("dc.subject"), "Rust"));
        assert!(session.update(&loaded).await.unwrap());
        session.commit().await.unwrap();
        drop(session);

        let reloaded = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.value_strings(&field("dc.subject")), vec!["Rust"]);
        assert!(reloaded.last_modified >= item.last_modified);
    }

    #[tokio::test]
    async fn test_session_update_without_changes_is_noop() {
        let (repo, item) = repository_with_item().await;
        let before = repo.find_by_id(&item.id).await.unwrap().unwrap();

        let mut session = repo.begin_session().await.unwrap();
        let loaded = session.find_by_id(&item.id).await.unwrap().unwrap();
        assert!(!session.update(&loaded).await.unwrap());
        session.commit().await.unwrap();
        drop(session);

        let after = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(after.last_modified, before.last_modified);
    }

    #[tokio::test]
    async fn test_session_rollback_discards_writes_and_cache() {
        let (repo, item) = repository_with_item().await;
        let mut session = repo.begin_session().await.unwrap();

        let mut loaded = session.find_by_id(&item.id).await.unwrap().unwrap();
        loaded.clear_field(&field("dc.title"));
        loaded.add_value(MetadataValue::new(field("cris.virtual.department"), "Physics"));
        session.update(&loaded).await.unwrap();

        let inside = session
            .get_metadata(&item.id, &field("cris.virtual.department"))
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(session.cached_len(), 1);

        session.rollback().await.unwrap();
        assert_eq!(session.cached_len(), 0);

        let title = session.get_metadata(&item.id, &field("dc.title")).await.unwrap();
        assert_eq!(title.len(), 1);
        session.rollback().await.unwrap();
        drop(session);

        // The field created inside the rolled back transaction is gone and not cached.
        assert_eq!(
            repo.registry().cached_id(&field("cris.virtual.department")),
            None
        );
        let reloaded = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.value_strings(&field("dc.title")), vec!["A study of things"]);
    }

    #[tokio::test]
    async fn test_session_uncache() {
        let (repo, item) = repository_with_item().await;
        let mut session = repo.begin_session().await.unwrap();

        session.find_by_id(&item.id).await.unwrap();
        assert_eq!(session.cached_len(), 1);
        session.uncache(&item.id);
        assert_eq!(session.cached_len(), 0);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_item_fails() {
        let (repo, _) = repository_with_item().await;
        let mut session = repo.begin_session().await.unwrap();

        let ghost = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("dc.title"), "Ghost"));
        let result = session.update(&ghost).await;
        assert!(matches!(result, Err(LibraryError::NotFound { .. })));
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_metadata() {
        let pool = create_test_pool().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_value BEFORE INSERT ON metadata_values \
             WHEN NEW.text_value = 'rejected' BEGIN SELECT RAISE(ABORT, 'rejected value'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = SqliteItemRepository::new(pool);
        let item = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("dc.title"), "Original"))
            .with_value(MetadataValue::new(field("dc.subject"), "Kept"));
        repo.insert(&item).await.unwrap();

        let mut session = repo.begin_session().await.unwrap();
        let mut edited = session.find_by_id(&item.id).await.unwrap().unwrap();
        edited.clear_field(&field("dc.subject"));
        edited.add_value(MetadataValue::new(field("dc.title"), "rejected"));
        assert!(session.update(&edited).await.is_err());

        // Neither the deletions nor the insertions of the failed write remain.
        let subject = session.get_metadata(&item.id, &field("dc.subject")).await.unwrap();
        let title = session.get_metadata(&item.id, &field("dc.title")).await.unwrap();
        assert_eq!(subject.len(), 1);
        assert_eq!(title.len(), 1);
        assert_eq!(title[0].value, "Original");

        session.commit().await.unwrap();
    }

    #[test]
    fn test_canonical_renumbers_places() {
        let author = field("dc.contributor.author");
        let values = vec![
            MetadataValue::new(author.clone(), "B").with_place(4),
            MetadataValue::new(field("dc.title"), "T").with_place(2),
            MetadataValue::new(author.clone(), "A").with_place(1),
        ];
        let canonical = canonical(&values);
        let authors: Vec<(&str, i32)> = canonical
            .iter()
            .filter(|v| v.field == author)
            .map(|v| (v.value.as_str(), v.place))
            .collect();
        assert_eq!(authors, vec![("A", 0), ("B", 1)]);
    }
}
