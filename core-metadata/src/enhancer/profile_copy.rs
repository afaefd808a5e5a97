//! Copies fields from a linked profile item.

use super::{EnhancementContext, ItemEnhancer};
use crate::diff::{DesiredValues, DiffOutcome, MetadataDiffEngine};
use crate::Result;
use async_trait::async_trait;
use core_library::models::{Item, ItemId, MetadataField};
use tracing::debug;

/// Overwrites target fields with the values of a linked owner item.
///
/// The item points at its owner through `link_field`, whose authority is the
/// owner's id. For each `(source, target)` mapping the target is replaced
/// by the owner's source values; a mapping whose source is empty on the
/// owner is skipped and its target left as is.
pub struct ProfileCopyEnhancer {
    link_field: MetadataField,
    mappings: Vec<(MetadataField, MetadataField)>,
}

impl ProfileCopyEnhancer {
    pub fn new(link_field: MetadataField) -> Self {
        Self {
            link_field,
            mappings: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, source: MetadataField, target: MetadataField) -> Self {
        self.mappings.push((source, target));
        self
    }

    fn owner_id(&self, item: &Item) -> Option<ItemId> {
        item.values(&self.link_field)
            .filter_map(|v| v.authority.as_deref())
            .find_map(|authority| ItemId::from_string(authority).ok())
    }
}

#[async_trait]
impl ItemEnhancer for ProfileCopyEnhancer {
    fn name(&self) -> &str {
        "profile-copy"
    }

    fn can_enhance(&self, item: &Item) -> bool {
        self.owner_id(item).is_some()
    }

    async fn enhance(&self, ctx: &mut EnhancementContext<'_>, item: &mut Item) -> Result<DiffOutcome> {
        let Some(owner_id) = self.owner_id(item) else {
            return Ok(DiffOutcome::default());
        };
        let Some(owner) = ctx.session.find_by_id(&owner_id).await? else {
            debug!(item_id = %item.id, owner_id = %owner_id, "Linked profile not found");
            return Ok(DiffOutcome::default());
        };

        let mut desired = DesiredValues::new();
        for (source, target) in &self.mappings {
            let values = owner.value_strings(source);
            if values.is_empty() {
                continue;
            }
            desired.insert(target.clone(), values);
        }
        Ok(MetadataDiffEngine::apply(item, &desired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use core_library::models::MetadataValue;
    use core_library::repositories::{ItemRepository, SqliteItemRepository};

    fn field(key: &str) -> MetadataField {
        MetadataField::parse(key).unwrap()
    }

    #[tokio::test]
    async fn test_copies_owner_values_and_skips_empty_sources() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let owner = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("person.identifier.orcid"), "0000-0002-1825-0097"))
            .with_value(MetadataValue::new(field("crisrp.name"), "Jane Smith"));
        repo.insert(&owner).await.unwrap();

        let enhancer = ProfileCopyEnhancer::new(field("dspace.object.owner"))
            .with_mapping(field("person.identifier.orcid"), field("cris.orcid.identifier"))
            .with_mapping(field("person.email"), field("cris.orcid.email"));

        let mut item = Item::new(ItemId::new())
            .with_value(
                MetadataValue::new(field("dspace.object.owner"), "Jane Smith")
                    .with_authority(owner.id.to_string()),
            )
            .with_value(MetadataValue::new(field("cris.orcid.identifier"), "stale"))
            .with_value(MetadataValue::new(field("cris.orcid.email"), "kept@example.org"));
        assert!(enhancer.can_enhance(&item));

        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);

        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(1, 1));
        assert_eq!(
            item.value_strings(&field("cris.orcid.identifier")),
            vec!["0000-0002-1825-0097"]
        );
        assert_eq!(item.value_strings(&field("cris.orcid.email")), vec!["kept@example.org"]);

        assert!(enhancer.enhance(&mut ctx, &mut item).await.unwrap().is_empty());
    }

    #[test]
    fn test_requires_owner_authority() {
        let enhancer = ProfileCopyEnhancer::new(field("dspace.object.owner"));
        let item = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("dspace.object.owner"), "No authority"));
        assert!(!enhancer.can_enhance(&item));
    }
}
