//! Virtual metadata derived from related entities.
//!
//! For an item of the configured entity type, every source value whose
//! authority is an item id points at a related item. Each related item is
//! visited once, however many source values name it. Each value of its
//! configured field becomes a `cris.virtual.<qualifier>` value on the item,
//! paired by position with a `cris.virtualsource.<qualifier>` value holding
//! the related item's id. A related item without the field, or an id that
//! does not resolve, contributes [`PLACEHOLDER_PARENT_METADATA_VALUE`] so
//! that the pairs stay aligned with the related ids. Authorities that are not
//! item ids (external authority keys) contribute nothing.
//!
//! Without `force` the pairs are maintained incrementally: pairs whose source
//! is no longer referenced are dropped, related items referenced for the
//! first time are appended, and pairs of sources still referenced keep their
//! text even if the related item changed since. With `force` every pair is
//! derived again from the related items.

use super::{EnhancementContext, ItemEnhancer};
use crate::diff::{DesiredValues, DiffOutcome, MetadataDiffEngine};
use crate::Result;
use async_trait::async_trait;
use core_library::models::{Item, ItemId, MetadataField};
use std::collections::BTreeSet;
use tracing::trace;

/// Stand-in value for a related item that has nothing to contribute.
pub const PLACEHOLDER_PARENT_METADATA_VALUE: &str = "#PLACEHOLDER_PARENT_METADATA_VALUE#";

const VIRTUAL_SCHEMA: &str = "cris";

pub struct RelatedEntityEnhancer {
    entity_type: String,
    source_fields: Vec<MetadataField>,
    related_field: MetadataField,
    virtual_field: MetadataField,
    virtual_source_field: MetadataField,
}

impl RelatedEntityEnhancer {
    /// Enhancer for items of `entity_type`, reading `related_field` from the
    /// items referenced by `dc.contributor.author`.
    pub fn new(entity_type: impl Into<String>, virtual_qualifier: &str, related_field: MetadataField) -> Self {
        Self {
            entity_type: entity_type.into(),
            source_fields: vec![MetadataField::new("dc", "contributor", Some("author"))],
            related_field,
            virtual_field: MetadataField::new(VIRTUAL_SCHEMA, "virtual", Some(virtual_qualifier)),
            virtual_source_field: MetadataField::new(VIRTUAL_SCHEMA, "virtualsource", Some(virtual_qualifier)),
        }
    }

    /// Replace the fields whose authorities point at related items.
    pub fn with_source_fields(mut self, fields: Vec<MetadataField>) -> Self {
        self.source_fields = fields;
        self
    }

    pub fn virtual_field(&self) -> &MetadataField {
        &self.virtual_field
    }

    pub fn virtual_source_field(&self) -> &MetadataField {
        &self.virtual_source_field
    }

    /// Distinct related item ids, in source field then place order.
    fn related_ids(&self, item: &Item) -> Vec<ItemId> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for field in &self.source_fields {
            let mut values: Vec<_> = item.values(field).collect();
            values.sort_by_key(|v| v.place);
            for authority in values.into_iter().filter_map(|v| v.authority.as_deref()) {
                if let Ok(id) = ItemId::from_string(authority) {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }

    /// Recorded `(virtual, source)` pairs in place order, or `None` when the
    /// two fields are out of step and cannot be paired.
    fn recorded_pairs(&self, item: &Item) -> Option<Vec<(String, String)>> {
        let virtual_values = item.value_strings(&self.virtual_field);
        let sources = item.value_strings(&self.virtual_source_field);
        (virtual_values.len() == sources.len()).then(|| virtual_values.into_iter().zip(sources).collect())
    }

    /// Pairs contributed by one related item.
    async fn derive(&self, ctx: &mut EnhancementContext<'_>, id: &ItemId) -> Result<Vec<(String, String)>> {
        let values = ctx
            .session
            .find_by_id(id)
            .await?
            .map(|related| related.value_strings(&self.related_field))
            .unwrap_or_default();

        if values.is_empty() {
            return Ok(vec![(PLACEHOLDER_PARENT_METADATA_VALUE.to_string(), id.to_string())]);
        }
        Ok(values.into_iter().map(|value| (value, id.to_string())).collect())
    }
}

#[async_trait]
impl ItemEnhancer for RelatedEntityEnhancer {
    fn name(&self) -> &str {
        "related-entity"
    }

    fn can_enhance(&self, item: &Item) -> bool {
        item.entity_type() == Some(self.entity_type.as_str())
    }

    async fn enhance(&self, ctx: &mut EnhancementContext<'_>, item: &mut Item) -> Result<DiffOutcome> {
        let related_ids = self.related_ids(item);
        let recorded = if ctx.force { None } else { self.recorded_pairs(item) };

        let mut pairs = Vec::new();
        match recorded {
            Some(recorded) => {
                let wanted: BTreeSet<String> = related_ids.iter().map(ItemId::to_string).collect();
                let known: BTreeSet<String> = recorded.iter().map(|(_, source)| source.clone()).collect();
                pairs.extend(recorded.into_iter().filter(|(_, source)| wanted.contains(source)));
                for id in related_ids.iter().filter(|id| !known.contains(&id.to_string())) {
                    pairs.extend(self.derive(ctx, id).await?);
                }
            }
            None => {
                for id in &related_ids {
                    pairs.extend(self.derive(ctx, id).await?);
                }
            }
        }

        let (virtual_values, source_values): (Vec<String>, Vec<String>) = pairs.into_iter().unzip();
        let mut desired = DesiredValues::new();
        desired.insert(self.virtual_field.clone(), virtual_values);
        desired.insert(self.virtual_source_field.clone(), source_values);

        let outcome = MetadataDiffEngine::apply(item, &desired);
        if outcome.is_empty() {
            trace!(item_id = %item.id, "Virtual metadata already current");
        }
        Ok(outcome)
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

    fn person(affiliations: &[&str]) -> Item {
        let mut item = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("dspace.entity.type"), "Person"));
        for affiliation in affiliations {
            item.add_value(MetadataValue::new(field("person.affiliation.name"), *affiliation));
        }
        item
    }

    fn publication(authors: &[(&str, Option<String>)]) -> Item {
        let mut item = Item::new(ItemId::new())
            .with_value(MetadataValue::new(field("dspace.entity.type"), "Publication"));
        for (name, authority) in authors {
            let mut value = MetadataValue::new(field("dc.contributor.author"), *name);
            if let Some(authority) = authority {
                value = value.with_authority(authority.clone());
            }
            item.add_value(value);
        }
        item
    }

    fn enhancer() -> RelatedEntityEnhancer {
        RelatedEntityEnhancer::new("Publication", "department", field("person.affiliation.name"))
    }

    #[tokio::test]
    async fn test_virtual_pairs_with_placeholder() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let jane = person(&["Physics", "Mathematics"]);
        let john = person(&[]);
        repo.insert(&jane).await.unwrap();
        repo.insert(&john).await.unwrap();

        let mut item = publication(&[
            ("Smith, Jane", Some(jane.id.to_string())),
            ("Unlinked, Author", None),
            ("External, Author", Some("orcid-0000-0001".to_string())),
            ("Doe, John", Some(john.id.to_string())),
            ("Smith, Jane", Some(jane.id.to_string())),
        ]);
        let enhancer = enhancer();
        assert!(enhancer.can_enhance(&item));
        assert!(!enhancer.can_enhance(&jane));

        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();

        assert_eq!(outcome, DiffOutcome::new(6, 0));
        assert_eq!(
            item.value_strings(enhancer.virtual_field()),
            vec!["Physics", "Mathematics", PLACEHOLDER_PARENT_METADATA_VALUE]
        );
        assert_eq!(
            item.value_strings(enhancer.virtual_source_field()),
            vec![jane.id.to_string(), jane.id.to_string(), john.id.to_string()]
        );

        assert!(enhancer.enhance(&mut ctx, &mut item).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_picks_up_related_changes() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let jane = person(&["Physics"]);
        repo.insert(&jane).await.unwrap();

        let enhancer = enhancer();
        let mut item = publication(&[("Smith, Jane", Some(jane.id.to_string()))]);
        {
            let mut session = repo.begin_session().await.unwrap();
            let mut ctx = EnhancementContext::new(session.as_mut(), false);
            enhancer.enhance(&mut ctx, &mut item).await.unwrap();
            session.rollback().await.unwrap();
        }

        // Jane changes department; the sources still match so only force notices.
        let mut session = repo.begin_session().await.unwrap();
        let mut moved = session.find_by_id(&jane.id).await.unwrap().unwrap();
        moved.clear_field(&field("person.affiliation.name"));
        moved.add_value(MetadataValue::new(field("person.affiliation.name"), "Chemistry"));
        session.update(&moved).await.unwrap();

        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        assert!(enhancer.enhance(&mut ctx, &mut item).await.unwrap().is_empty());

        let mut ctx = EnhancementContext::new(session.as_mut(), true);
        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(1, 1));
        assert_eq!(item.value_strings(enhancer.virtual_field()), vec!["Chemistry"]);
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_authors_clear_virtual_values() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let enhancer = enhancer();
        let mut item = publication(&[("Ghost, A.", Some(ItemId::new().to_string()))]);

        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(
            item.value_strings(enhancer.virtual_field()),
            vec![PLACEHOLDER_PARENT_METADATA_VALUE]
        );

        item.clear_field(&field("dc.contributor.author"));
        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(0, 2));
        assert!(item.value_strings(enhancer.virtual_source_field()).is_empty());
    }

    #[tokio::test]
    async fn test_without_force_only_drops_and_adds_sources() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let walter = person(&["4Science"]);
        let jesse = person(&["Company"]);
        repo.insert(&walter).await.unwrap();
        repo.insert(&jesse).await.unwrap();

        let enhancer = enhancer();
        let mut item = publication(&[
            ("White, Walter", Some(walter.id.to_string())),
            ("Pinkman, Jesse", Some(jesse.id.to_string())),
        ]);

        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(item.value_strings(enhancer.virtual_field()), vec!["4Science", "Company"]);

        // Jesse leaves the author list and Walter moves to another affiliation.
        item.metadata
            .retain(|v| v.authority.as_deref() != Some(jesse.id.to_string().as_str()));
        let mut moved = ctx.session.find_by_id(&walter.id).await.unwrap().unwrap();
        moved.clear_field(&field("person.affiliation.name"));
        moved.add_value(MetadataValue::new(field("person.affiliation.name"), "University"));
        ctx.session.update(&moved).await.unwrap();

        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(0, 2));
        assert_eq!(item.value_strings(enhancer.virtual_field()), vec!["4Science"]);
        assert_eq!(item.value_strings(enhancer.virtual_source_field()), vec![walter.id.to_string()]);

        let mut ctx = EnhancementContext::new(session.as_mut(), true);
        enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(item.value_strings(enhancer.virtual_field()), vec!["University"]);
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_without_force_appends_new_sources() {
        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let walter = person(&["4Science"]);
        let skyler = person(&["Accounting"]);
        repo.insert(&walter).await.unwrap();
        repo.insert(&skyler).await.unwrap();

        let enhancer = enhancer();
        let mut item = publication(&[("White, Walter", Some(walter.id.to_string()))]);
        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        enhancer.enhance(&mut ctx, &mut item).await.unwrap();

        item.add_value(
            MetadataValue::new(field("dc.contributor.author"), "White, Skyler").with_authority(skyler.id.to_string()),
        );
        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(2, 0));
        assert_eq!(item.value_strings(enhancer.virtual_field()), vec!["4Science", "Accounting"]);
        assert_eq!(
            item.value_strings(enhancer.virtual_source_field()),
            vec![walter.id.to_string(), skyler.id.to_string()]
        );
    }
}
