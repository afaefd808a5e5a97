//! Unicode whitespace normalization.
//!
//! Rules, applied in this order, each one to a fixed point:
//!
//! 1. runs of space-like characters become one ASCII space
//! 2. exotic line breaks become `\n`
//! 3. a `\n` not preceded by `\r` becomes `\r\n`
//! 4. spaces before `\r\n` and at the end of the value are stripped
//! 5. zero-width characters are removed
//! 6. Unicode NFC
//!
//! Later rules can expose work for earlier ones (removing a zero-width
//! character between two spaces, say), so the whole sequence repeats until
//! the value stops changing.
//!
//! The enhancer rewrites statements in place: only the text changes, so
//! place, language, authority and confidence survive. An author linked to a
//! person item stays linked after its name is cleaned.

use super::{EnhancementContext, ItemEnhancer};
use crate::diff::DiffOutcome;
use crate::Result;
use async_trait::async_trait;
use core_library::models::{Item, MetadataField};
use unicode_normalization::UnicodeNormalization;

fn is_space_like(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t'
            | '\u{00A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
    )
}

fn is_exotic_newline(c: char) -> bool {
    matches!(c, '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}')
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

fn collapse_spaces(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.chars() {
        if is_space_like(c) {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

fn unify_newlines(input: &str) -> String {
    input
        .chars()
        .map(|c| if is_exotic_newline(c) { '\n' } else { c })
        .collect()
}

fn crlf_newlines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous = None;
    for c in input.chars() {
        if c == '\n' && previous != Some('\r') {
            out.push('\r');
        }
        out.push(c);
        previous = Some(c);
    }
    out
}

fn strip_trailing_spaces(input: &str) -> String {
    let lines: Vec<&str> = input.split("\r\n").map(|line| line.trim_end_matches(' ')).collect();
    lines.join("\r\n")
}

fn remove_zero_width(input: &str) -> String {
    input.chars().filter(|c| !is_zero_width(*c)).collect()
}

fn nfc(input: &str) -> String {
    input.nfc().collect()
}

fn to_fixed_point(input: String, rule: fn(&str) -> String) -> String {
    let mut current = input;
    loop {
        let next = rule(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

const RULES: [fn(&str) -> String; 6] = [
    collapse_spaces,
    unify_newlines,
    crlf_newlines,
    strip_trailing_spaces,
    remove_zero_width,
    nfc,
];

/// Normalize one value to its stable form.
pub fn normalize_whitespace(value: &str) -> String {
    let mut current = value.to_string();
    loop {
        let next = RULES
            .iter()
            .fold(current.clone(), |acc, rule| to_fixed_point(acc, *rule));
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Normalizes whitespace in a fixed set of fields.
pub struct WhitespaceNormalizeEnhancer {
    fields: Vec<MetadataField>,
}

impl WhitespaceNormalizeEnhancer {
    pub fn new(fields: Vec<MetadataField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[MetadataField] {
        &self.fields
    }
}

#[async_trait]
impl ItemEnhancer for WhitespaceNormalizeEnhancer {
    fn name(&self) -> &str {
        "whitespace-normalize"
    }

    fn can_enhance(&self, item: &Item) -> bool {
        self.fields.iter().any(|field| item.values(field).next().is_some())
    }

    async fn enhance(&self, _ctx: &mut EnhancementContext<'_>, item: &mut Item) -> Result<DiffOutcome> {
        let mut rewritten = 0;
        for statement in item.metadata.iter_mut().filter(|v| self.fields.contains(&v.field)) {
            let normalized = normalize_whitespace(&statement.value);
            if normalized != statement.value {
                statement.value = normalized;
                rewritten += 1;
            }
        }
        // A rewrite counts as one removal plus one addition.
        Ok(DiffOutcome::new(rewritten, rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use crate::enhancer::{EnhancerRegistry, RelatedEntityEnhancer};
    use core_library::models::{ItemId, MetadataValue};
    use core_library::repositories::{ItemRepository, SqliteItemRepository};

    #[test]
    fn test_collapse_and_strip() {
        assert_eq!(normalize_whitespace("Hello   World\t"), "Hello World");
        assert_eq!(normalize_whitespace("a\u{00A0}\u{2003} b"), "a b");
    }

    #[test]
    fn test_newlines_become_crlf_without_trailing_spaces() {
        assert_eq!(normalize_whitespace("line one  \nline two"), "line one\r\nline two");
        assert_eq!(normalize_whitespace("a\u{2028}b"), "a\r\nb");
        assert_eq!(normalize_whitespace("a\r\nb"), "a\r\nb");
    }

    #[test]
    fn test_zero_width_removal_reruns_collapse() {
        assert_eq!(normalize_whitespace("a \u{200B} b"), "a b");
        assert_eq!(normalize_whitespace("\u{FEFF}title"), "title");
    }

    #[test]
    fn test_nfc() {
        assert_eq!(normalize_whitespace("e\u{0301}"), "\u{00E9}");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for input in ["  x  \n y\u{200B} ", "\u{3000}tab\tand\u{0085}line", "plain"] {
            let once = normalize_whitespace(input);
            assert_eq!(normalize_whitespace(&once), once);
        }
    }

    #[tokio::test]
    async fn test_enhancer_rewrites_configured_fields_only() {
        let title = MetadataField::parse("dc.title").unwrap();
        let subject = MetadataField::parse("dc.subject").unwrap();
        let enhancer = WhitespaceNormalizeEnhancer::new(vec![title.clone()]);

        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);

        let mut item = Item::new(ItemId::new())
            .with_value(MetadataValue::new(title.clone(), "Hello   World\t"))
            .with_value(MetadataValue::new(subject.clone(), "left   alone"));
        assert!(enhancer.can_enhance(&item));

        let outcome = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert_eq!(outcome, DiffOutcome::new(1, 1));
        assert_eq!(item.value_strings(&title), vec!["Hello World"]);
        assert_eq!(item.value_strings(&subject), vec!["left   alone"]);

        let again = enhancer.enhance(&mut ctx, &mut item).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_cleaned_author_keeps_link_for_related_entities() {
        let author = MetadataField::parse("dc.contributor.author").unwrap();
        let affiliation = MetadataField::parse("person.affiliation.name").unwrap();
        let entity_type = MetadataField::parse("dspace.entity.type").unwrap();

        let repo = SqliteItemRepository::new(create_test_pool().await.unwrap());
        let jane = Item::new(ItemId::new())
            .with_value(MetadataValue::new(entity_type.clone(), "Person"))
            .with_value(MetadataValue::new(affiliation.clone(), "Physics"));
        repo.insert(&jane).await.unwrap();

        let mut publication = Item::new(ItemId::new())
            .with_value(MetadataValue::new(entity_type, "Publication"))
            .with_value(
                MetadataValue::new(author.clone(), "Smith,  Jane")
                    .with_language("en")
                    .with_authority(jane.id.to_string()),
            );
        let confidence = publication.values(&author).next().unwrap().confidence;

        let departments = RelatedEntityEnhancer::new("Publication", "department", affiliation);
        let virtual_field = departments.virtual_field().clone();
        let registry = EnhancerRegistry::builder()
            .register(WhitespaceNormalizeEnhancer::new(vec![author.clone()]))
            .register(departments)
            .build();

        let mut session = repo.begin_session().await.unwrap();
        let mut ctx = EnhancementContext::new(session.as_mut(), false);
        let outcome = registry.enhance_item(&mut ctx, &mut publication).await;
        assert!(outcome.failure.is_none());

        let cleaned = publication.values(&author).next().unwrap();
        assert_eq!(cleaned.value, "Smith, Jane");
        assert_eq!(cleaned.language.as_deref(), Some("en"));
        assert_eq!(cleaned.authority, Some(jane.id.to_string()));
        assert_eq!(cleaned.confidence, confidence);
        assert_eq!(publication.value_strings(&virtual_field), vec!["Physics"]);
    }
}
