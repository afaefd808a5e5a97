//! # Metadata Diff Engine
//!
//! Reconciles an item's metadata with a desired `field -> values` mapping
//! using the smallest set of edits.
//!
//! ## Overview
//!
//! Values are compared as a multiset keyed by exact string equality. Each
//! current value that also appears in the desired list is retained (matching
//! removes the first equal entry, so duplicates are counted correctly); the
//! current values left over are removed and the desired values left over are
//! added.
//!
//! - A field mapped to an empty list is cleared.
//! - Fields not present in the mapping are untouched.
//! - A field whose values already match is left exactly as it is.
//!
//! When a field does change, its values end up in the desired order. Retained
//! statements keep their language, authority and confidence.
//!
//! ## Usage
//!
//! ```ignore
//! let mut desired = DesiredValues::new();
//! desired.insert(title, vec!["Hello World".to_string()]);
//!
//! let delta = MetadataDiffEngine::compute(&item, &desired);
//! let outcome = MetadataDiffEngine::apply(&mut item, &desired);
//! assert_eq!(outcome, delta.outcome());
//! ```

use core_library::models::{Item, MetadataField, MetadataValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Desired values per field, in order.
pub type DesiredValues = BTreeMap<MetadataField, Vec<String>>;

/// Number of statements added and removed by an edit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOutcome {
    pub added: usize,
    pub removed: usize,
}

impl DiffOutcome {
    pub fn new(added: usize, removed: usize) -> Self {
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

impl AddAssign for DiffOutcome {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.removed += other.removed;
    }
}

/// Edits computed without touching the item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDelta {
    pub removals: Vec<(MetadataField, String)>,
    pub additions: Vec<(MetadataField, String)>,
}

impl MetadataDelta {
    pub fn outcome(&self) -> DiffOutcome {
        DiffOutcome::new(self.additions.len(), self.removals.len())
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }
}

/// Multiset difference between two ordered value lists.
///
/// Returns `(removed, added)`: values only in `current`, values only in
/// `desired`, each in their original order.
pub fn multiset_difference<'a>(current: &[&'a str], desired: &[&'a str]) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut to_add: Vec<&str> = desired.to_vec();
    let mut removed = Vec::new();

    for value in current {
        match to_add.iter().position(|candidate| candidate == value) {
            Some(index) => {
                to_add.remove(index);
            }
            None => removed.push(*value),
        }
    }
    (removed, to_add)
}

fn current_values<'a>(item: &'a Item, field: &'a MetadataField) -> Vec<&'a MetadataValue> {
    let mut values: Vec<&MetadataValue> = item.values(field).collect();
    values.sort_by_key(|v| v.place);
    values
}

/// Stateless diff engine over [`Item`] metadata.
pub struct MetadataDiffEngine;

impl MetadataDiffEngine {
    /// The edits [`apply`](Self::apply) would make.
    pub fn compute(item: &Item, desired: &DesiredValues) -> MetadataDelta {
        let mut delta = MetadataDelta::default();

        for (field, wanted) in desired {
            let current = current_values(item, field);
            let current: Vec<&str> = current.iter().map(|v| v.value.as_str()).collect();
            let wanted: Vec<&str> = wanted.iter().map(String::as_str).collect();

            let (removed, added) = multiset_difference(&current, &wanted);
            delta
                .removals
                .extend(removed.into_iter().map(|v| (field.clone(), v.to_string())));
            delta
                .additions
                .extend(added.into_iter().map(|v| (field.clone(), v.to_string())));
        }
        delta
    }

    /// Rewrite the item's metadata so every field in `desired` holds exactly
    /// the desired values.
    pub fn apply(item: &mut Item, desired: &DesiredValues) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();

        for (field, wanted) in desired {
            let current: Vec<MetadataValue> = current_values(item, field).into_iter().cloned().collect();
            let current_strs: Vec<&str> = current.iter().map(|v| v.value.as_str()).collect();
            let wanted_strs: Vec<&str> = wanted.iter().map(String::as_str).collect();

            let (removed, added) = multiset_difference(&current_strs, &wanted_strs);
            if removed.is_empty() && added.is_empty() {
                continue;
            }
            outcome += DiffOutcome::new(added.len(), removed.len());

            let mut unused: Vec<Option<MetadataValue>> = current.iter().cloned().map(Some).collect();
            let mut rebuilt = Vec::with_capacity(wanted.len());
            for value in wanted {
                let reused = unused
                    .iter_mut()
                    .find(|slot| slot.as_ref().is_some_and(|v| &v.value == value))
                    .and_then(Option::take);
                rebuilt.push(reused.unwrap_or_else(|| MetadataValue::new(field.clone(), value.clone())));
            }

            item.clear_field(field);
            for value in rebuilt {
                item.add_value(value);
            }
        }
        outcome
    }
}
