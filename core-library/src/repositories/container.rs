//! Container repository trait and implementation
//!
//! Communities and collections form a tree. Handles resolve to either a
//! container or an item.

use crate::error::{LibraryError, Result};
use crate::models::{Container, ContainerId, ContainerKind, HandleTarget, ItemId};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::str::FromStr;

/// Recursive walk of the container tree rooted at `?`, root included.
pub(crate) const DESCENDANTS_CTE: &str = r#"
    WITH RECURSIVE subtree(id) AS (
        SELECT id FROM containers WHERE id = ?
        UNION
        SELECT c.id FROM containers c JOIN subtree s ON c.parent_id = s.id
    )
"#;

/// Container repository interface
#[async_trait]
pub trait ContainerRepository: Send + Sync {
    /// Insert a community or collection
    async fn insert(&self, container: &Container) -> Result<()>;

    /// Find a container by its ID
    ///
    /// # Returns
    /// - `Ok(Some(container))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: &ContainerId) -> Result<Option<Container>>;

    /// Resolve a handle to what it identifies, or `None` when unknown
    async fn resolve_handle(&self, handle: &str) -> Result<Option<HandleTarget>>;

    /// Every container below `id`, `id` itself included
    async fn descendants(&self, id: &ContainerId) -> Result<Vec<ContainerId>>;
}

#[derive(sqlx::FromRow)]
struct ContainerRow {
    id: String,
    kind: String,
    handle: Option<String>,
    parent_id: Option<String>,
    name: String,
}

fn parse_id(raw: &str) -> Result<ContainerId> {
    ContainerId::from_string(raw).map_err(|e| LibraryError::InvalidInput {
        field: "container_id".to_string(),
        message: e.to_string(),
    })
}

impl TryFrom<ContainerRow> for Container {
    type Error = LibraryError;

    fn try_from(row: ContainerRow) -> Result<Self> {
        Ok(Container {
            id: parse_id(&row.id)?,
            kind: ContainerKind::from_str(&row.kind)?,
            handle: row.handle,
            parent_id: row.parent_id.as_deref().map(parse_id).transpose()?,
            name: row.name,
        })
    }
}

/// SQLite implementation of ContainerRepository
pub struct SqliteContainerRepository {
    pool: SqlitePool,
}

impl SqliteContainerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerRepository for SqliteContainerRepository {
    async fn insert(&self, container: &Container) -> Result<()> {
        if container.kind == ContainerKind::Collection && container.parent_id.is_none() {
            return Err(LibraryError::InvalidInput {
                field: "parent_id".to_string(),
                message: "a collection must belong to a community".to_string(),
            });
        }

        sqlx::query("INSERT INTO containers (id, kind, handle, parent_id, name) VALUES (?, ?, ?, ?, ?)")
            .bind(container.id.to_string())
            .bind(container.kind.as_str())
            .bind(&container.handle)
            .bind(container.parent_id.map(|p| p.to_string()))
            .bind(&container.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ContainerId) -> Result<Option<Container>> {
        let row: Option<ContainerRow> =
            sqlx::query_as("SELECT id, kind, handle, parent_id, name FROM containers WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Container::try_from).transpose()
    }

    async fn resolve_handle(&self, handle: &str) -> Result<Option<HandleTarget>> {
        let container: Option<(String, String)> =
            sqlx::query_as("SELECT id, kind FROM containers WHERE handle = ?")
                .bind(handle)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((id, kind)) = container {
            let id = parse_id(&id)?;
            return Ok(Some(match ContainerKind::from_str(&kind)? {
                ContainerKind::Community => HandleTarget::Community(id),
                ContainerKind::Collection => HandleTarget::Collection(id),
            }));
        }

        let item: Option<(String,)> = sqlx::query_as("SELECT id FROM items WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;

        item.map(|(id,)| {
            ItemId::from_string(&id)
                .map(HandleTarget::Item)
                .map_err(|e| LibraryError::InvalidInput {
                    field: "item_id".to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()
    }

    async fn descendants(&self, id: &ContainerId) -> Result<Vec<ContainerId>> {
        let sql = format!("{} SELECT id FROM subtree ORDER BY id", DESCENDANTS_CTE);
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|(id,)| parse_id(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::Item;
    use crate::repositories::{ItemRepository, SqliteItemRepository};

    #[tokio::test]
    async fn test_resolve_handles() {
        let pool = create_test_pool().await.unwrap();
        let containers = SqliteContainerRepository::new(pool.clone());
        let items = SqliteItemRepository::new(pool);

        let community = Container::community("Research").with_handle("123456789/1");
        let collection = Container::collection("Theses", community.id).with_handle("123456789/2");
        containers.insert(&community).await.unwrap();
        containers.insert(&collection).await.unwrap();

        let item = Item::new(ItemId::new()).with_handle("123456789/3");
        items.insert(&item).await.unwrap();

        assert_eq!(
            containers.resolve_handle("123456789/1").await.unwrap(),
            Some(HandleTarget::Community(community.id))
        );
        assert_eq!(
            containers.resolve_handle("123456789/2").await.unwrap(),
            Some(HandleTarget::Collection(collection.id))
        );
        assert_eq!(
            containers.resolve_handle("123456789/3").await.unwrap(),
            Some(HandleTarget::Item(item.id))
        );
        assert_eq!(containers.resolve_handle("123456789/404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_descendants_walk_subcommunities() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteContainerRepository::new(pool);

        let top = Container::community("Top");
        let mut sub = Container::community("Sub");
        sub.parent_id = Some(top.id);
        let collection = Container::collection("Articles", sub.id);
        let unrelated = Container::community("Elsewhere");
        for container in [&top, &sub, &collection, &unrelated] {
            repo.insert(container).await.unwrap();
        }

        let mut expected = vec![top.id, sub.id, collection.id];
        expected.sort();
        assert_eq!(repo.descendants(&top.id).await.unwrap(), expected);
        assert_eq!(repo.descendants(&collection.id).await.unwrap(), vec![collection.id]);

        let found = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(found.parent_id, Some(top.id));
        assert_eq!(found.kind, ContainerKind::Community);
    }

    #[tokio::test]
    async fn test_collection_requires_parent() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteContainerRepository::new(pool);

        let mut orphan = Container::collection("Orphan", ContainerId::new());
        orphan.parent_id = None;
        assert!(matches!(
            repo.insert(&orphan).await,
            Err(LibraryError::InvalidInput { .. })
        ));
    }
}
