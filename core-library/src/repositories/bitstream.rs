//! Bitstream repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Bitstream, BitstreamId, HandleTarget, ItemId};
use crate::repositories::container::DESCENDANTS_CTE;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Bitstream repository interface
#[async_trait]
pub trait BitstreamRepository: Send + Sync {
    async fn insert(&self, bitstream: &Bitstream) -> Result<()>;

    /// Find a bitstream by its ID
    ///
    /// # Returns
    /// - `Ok(Some(bitstream))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: &BitstreamId) -> Result<Option<Bitstream>>;

    /// Ids of the bitstreams owned by what a handle identifies, in id order.
    ///
    /// Communities include every collection beneath them, at any depth.
    async fn find_ids_under(&self, target: HandleTarget) -> Result<Vec<BitstreamId>>;

    /// Flag a bitstream as deleted
    ///
    /// # Returns
    /// - `Ok(true)` if the bitstream was flagged
    /// - `Ok(false)` if it was not found
    async fn mark_deleted(&self, id: &BitstreamId) -> Result<bool>;
}

#[derive(sqlx::FromRow)]
struct BitstreamRow {
    id: String,
    item_id: Option<String>,
    internal_id: String,
    name: Option<String>,
    checksum: Option<String>,
    checksum_algorithm: Option<String>,
    size_bytes: i64,
    deleted: bool,
}

pub(crate) fn parse_bitstream_id(raw: &str) -> Result<BitstreamId> {
    BitstreamId::from_string(raw).map_err(|e| LibraryError::InvalidInput {
        field: "bitstream_id".to_string(),
        message: e.to_string(),
    })
}

impl TryFrom<BitstreamRow> for Bitstream {
    type Error = LibraryError;

    fn try_from(row: BitstreamRow) -> Result<Self> {
        let item_id = row
            .item_id
            .as_deref()
            .map(ItemId::from_string)
            .transpose()
            .map_err(|e| LibraryError::InvalidInput {
                field: "item_id".to_string(),
                message: e.to_string(),
            })?;

        Ok(Bitstream {
            id: parse_bitstream_id(&row.id)?,
            item_id,
            internal_id: row.internal_id,
            name: row.name,
            checksum: row.checksum,
            checksum_algorithm: row.checksum_algorithm,
            size_bytes: row.size_bytes,
            deleted: row.deleted,
        })
    }
}

/// SQLite implementation of BitstreamRepository
pub struct SqliteBitstreamRepository {
    pool: SqlitePool,
}

impl SqliteBitstreamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BitstreamRepository for SqliteBitstreamRepository {
    async fn insert(&self, bitstream: &Bitstream) -> Result<()> {
        if bitstream.internal_id.is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "internal_id".to_string(),
                message: "internal id cannot be empty".to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO bitstreams (
                id, item_id, internal_id, name, checksum, checksum_algorithm, size_bytes, deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bitstream.id.to_string())
        .bind(bitstream.item_id.map(|id| id.to_string()))
        .bind(&bitstream.internal_id)
        .bind(&bitstream.name)
        .bind(&bitstream.checksum)
        .bind(&bitstream.checksum_algorithm)
        .bind(bitstream.size_bytes)
        .bind(bitstream.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &BitstreamId) -> Result<Option<Bitstream>> {
        let row: Option<BitstreamRow> = sqlx::query_as(
            r#"
            SELECT id, item_id, internal_id, name, checksum, checksum_algorithm, size_bytes, deleted
            FROM bitstreams WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Bitstream::try_from).transpose()
    }

    async fn find_ids_under(&self, target: HandleTarget) -> Result<Vec<BitstreamId>> {
        let rows: Vec<(String,)> = match target {
            HandleTarget::Item(item_id) => {
                sqlx::query_as("SELECT id FROM bitstreams WHERE item_id = ? ORDER BY id")
                    .bind(item_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            HandleTarget::Collection(container_id) | HandleTarget::Community(container_id) => {
                let sql = format!(
                    r#"{}
                    SELECT b.id FROM bitstreams b
                    JOIN items i ON i.id = b.item_id
                    WHERE i.owning_collection IN (SELECT id FROM subtree)
                    ORDER BY b.id
                    "#,
                    DESCENDANTS_CTE
                );
                sqlx::query_as(&sql)
                    .bind(container_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(|(id,)| parse_bitstream_id(id)).collect()
    }

    async fn mark_deleted(&self, id: &BitstreamId) -> Result<bool> {
        let result = sqlx::query("UPDATE bitstreams SET deleted = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Container, Item};
    use crate::repositories::{
        ContainerRepository, ItemRepository, SqliteContainerRepository, SqliteItemRepository,
    };

    #[tokio::test]
    async fn test_insert_find_and_delete() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteBitstreamRepository::new(pool);

        let bitstream = Bitstream::new("1234567890abcdef")
            .with_checksum("MD5", "9e107d9d372bb6826bd81d3542a419d6")
            .with_size(43);
        repo.insert(&bitstream).await.unwrap();

        let found = repo.find_by_id(&bitstream.id).await.unwrap().unwrap();
        assert_eq!(found, bitstream);

        assert!(repo.mark_deleted(&bitstream.id).await.unwrap());
        assert!(repo.find_by_id(&bitstream.id).await.unwrap().unwrap().deleted);
        assert!(!repo.mark_deleted(&BitstreamId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_ids_under_community_includes_nested_collections() {
        let pool = create_test_pool().await.unwrap();
        let containers = SqliteContainerRepository::new(pool.clone());
        let items = SqliteItemRepository::new(pool.clone());
        let repo = SqliteBitstreamRepository::new(pool);

        let community = Container::community("Top");
        let collection = Container::collection("Datasets", community.id);
        let other = Container::community("Other");
        let other_collection = Container::collection("Misc", other.id);
        for container in [&community, &collection, &other, &other_collection] {
            containers.insert(container).await.unwrap();
        }

        let inside = Item::new(ItemId::new()).with_collection(collection.id);
        let outside = Item::new(ItemId::new()).with_collection(other_collection.id);
        items.insert(&inside).await.unwrap();
        items.insert(&outside).await.unwrap();

        let a = Bitstream::new("aaaa1111").with_item(inside.id);
        let b = Bitstream::new("bbbb2222").with_item(inside.id);
        let c = Bitstream::new("cccc3333").with_item(outside.id);
        for bitstream in [&a, &b, &c] {
            repo.insert(bitstream).await.unwrap();
        }

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(
            repo.find_ids_under(HandleTarget::Community(community.id)).await.unwrap(),
            expected
        );
        assert_eq!(
            repo.find_ids_under(HandleTarget::Collection(collection.id)).await.unwrap(),
            expected
        );
        assert_eq!(
            repo.find_ids_under(HandleTarget::Item(outside.id)).await.unwrap(),
            vec![c.id]
        );
    }
}
