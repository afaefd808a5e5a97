//! Domain models for the repository
//!
//! Items, their metadata statements, containers, bitstreams and the checksum
//! audit trail. Timestamps are persisted as Unix milliseconds and exposed as
//! `DateTime<Utc>`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an item
    ItemId
);
uuid_id!(
    /// Unique identifier for a bitstream
    BitstreamId
);
uuid_id!(
    /// Unique identifier for a community or collection
    ContainerId
);

// =============================================================================
// Timestamps
// =============================================================================

/// Convert a timestamp to the persisted millisecond form.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert persisted milliseconds back to a timestamp.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// =============================================================================
// Metadata
// =============================================================================

/// Authority confidence: nothing recorded.
pub const CONFIDENCE_UNSET: i32 = -1;
/// Authority confidence: value accepted.
pub const CONFIDENCE_ACCEPTED: i32 = 600;

/// A metadata field key such as `dc.contributor.author`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataField {
    pub schema: String,
    pub element: String,
    pub qualifier: Option<String>,
}

impl MetadataField {
    pub fn new(
        schema: impl Into<String>,
        element: impl Into<String>,
        qualifier: Option<&str>,
    ) -> Self {
        Self {
            schema: schema.into(),
            element: element.into(),
            qualifier: qualifier
                .filter(|q| !q.is_empty())
                .map(|q| q.to_string()),
        }
    }

    /// Parse `schema.element` or `schema.element.qualifier`.
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || LibraryError::InvalidInput {
            field: "metadata_field".to_string(),
            message: format!("'{}' is not schema.element[.qualifier]", key),
        };

        let mut parts = key.splitn(3, '.');
        let schema = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let element = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let qualifier = parts.next();
        if qualifier == Some("") {
            return Err(invalid());
        }

        Ok(Self::new(schema, element, qualifier))
    }

    /// Qualifier as stored (empty string when absent).
    pub fn qualifier_or_empty(&self) -> &str {
        self.qualifier.as_deref().unwrap_or("")
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}.{}", self.schema, self.element, q),
            None => write!(f, "{}.{}", self.schema, self.element),
        }
    }
}

impl FromStr for MetadataField {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialOrd for MetadataField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataField {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.schema, &self.element, self.qualifier_or_empty()).cmp(&(
            &other.schema,
            &other.element,
            other.qualifier_or_empty(),
        ))
    }
}

/// One metadata statement on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub field: MetadataField,
    pub value: String,
    pub language: Option<String>,
    /// Authority key, typically the id of a related item.
    pub authority: Option<String>,
    pub confidence: i32,
    /// Position among the values of the same field.
    pub place: i32,
}

impl MetadataValue {
    pub fn new(field: MetadataField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            language: None,
            authority: None,
            confidence: CONFIDENCE_UNSET,
            place: 0,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self.confidence = CONFIDENCE_ACCEPTED;
        self
    }

    pub fn with_place(mut self, place: i32) -> Self {
        self.place = place;
        self
    }
}

// =============================================================================
// Items and Containers
// =============================================================================

/// Field carrying the entity type of an item.
pub const ENTITY_TYPE_FIELD: (&str, &str, &str) = ("dspace", "entity", "type");

/// Repository item with its metadata statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub handle: Option<String>,
    pub owning_collection: Option<ContainerId>,
    /// `false` while the item is still a workspace/workflow submission.
    pub in_archive: bool,
    pub withdrawn: bool,
    pub last_modified: DateTime<Utc>,
    pub metadata: Vec<MetadataValue>,
}

impl Item {
    /// New archived item with no metadata.
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            handle: None,
            owning_collection: None,
            in_archive: true,
            withdrawn: false,
            last_modified: Utc::now(),
            metadata: Vec::new(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_collection(mut self, collection: ContainerId) -> Self {
        self.owning_collection = Some(collection);
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = at;
        self
    }

    pub fn in_workspace(mut self) -> Self {
        self.in_archive = false;
        self
    }

    /// Append a value, placing it after the existing values of its field.
    pub fn add_value(&mut self, mut value: MetadataValue) {
        value.place = self.values(&value.field).count() as i32;
        self.metadata.push(value);
    }

    /// Builder form of [`add_value`](Self::add_value).
    pub fn with_value(mut self, value: MetadataValue) -> Self {
        self.add_value(value);
        self
    }

    /// Values of `field`, in place order.
    pub fn values<'a>(&'a self, field: &'a MetadataField) -> impl Iterator<Item = &'a MetadataValue> + 'a {
        self.metadata.iter().filter(move |v| &v.field == field)
    }

    /// String values of `field`, in place order.
    pub fn value_strings(&self, field: &MetadataField) -> Vec<String> {
        let mut values: Vec<&MetadataValue> = self.values(field).collect();
        values.sort_by_key(|v| v.place);
        values.into_iter().map(|v| v.value.clone()).collect()
    }

    pub fn first_value(&self, field: &MetadataField) -> Option<&str> {
        self.metadata
            .iter()
            .filter(|v| &v.field == field)
            .min_by_key(|v| v.place)
            .map(|v| v.value.as_str())
    }

    /// Remove every value of `field`; returns how many were removed.
    pub fn clear_field(&mut self, field: &MetadataField) -> usize {
        let before = self.metadata.len();
        self.metadata.retain(|v| &v.field != field);
        before - self.metadata.len()
    }

    /// Renumber places so each field's values are contiguous from 0.
    pub fn renumber_places(&mut self) {
        let mut counters: std::collections::HashMap<MetadataField, i32> =
            std::collections::HashMap::new();
        for value in &mut self.metadata {
            let counter = counters.entry(value.field.clone()).or_insert(0);
            value.place = *counter;
            *counter += 1;
        }
    }

    /// Entity type from `dspace.entity.type`, if any.
    pub fn entity_type(&self) -> Option<&str> {
        let (schema, element, qualifier) = ENTITY_TYPE_FIELD;
        let field = MetadataField::new(schema, element, Some(qualifier));
        self.metadata
            .iter()
            .find(|v| v.field == field)
            .map(|v| v.value.as_str())
    }

    /// Only archived, non-withdrawn items take part in enhancement.
    pub fn is_enhanceable(&self) -> bool {
        self.in_archive && !self.withdrawn
    }
}

/// Kind of container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Community,
    Collection,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Community => "community",
            ContainerKind::Collection => "collection",
        }
    }
}

impl FromStr for ContainerKind {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "community" => Ok(ContainerKind::Community),
            "collection" => Ok(ContainerKind::Collection),
            other => Err(LibraryError::InvalidInput {
                field: "container_kind".to_string(),
                message: format!("unknown container kind '{}'", other),
            }),
        }
    }
}

/// A community or collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub handle: Option<String>,
    pub parent_id: Option<ContainerId>,
    pub name: String,
}

impl Container {
    pub fn community(name: impl Into<String>) -> Self {
        Self {
            id: ContainerId::new(),
            kind: ContainerKind::Community,
            handle: None,
            parent_id: None,
            name: name.into(),
        }
    }

    pub fn collection(name: impl Into<String>, parent: ContainerId) -> Self {
        Self {
            id: ContainerId::new(),
            kind: ContainerKind::Collection,
            handle: None,
            parent_id: Some(parent),
            name: name.into(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// What a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleTarget {
    Community(ContainerId),
    Collection(ContainerId),
    Item(ItemId),
}

// =============================================================================
// Bitstreams and Checksums
// =============================================================================

/// A stored file belonging to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitstream {
    pub id: BitstreamId,
    pub item_id: Option<ItemId>,
    /// Key of the content in the bitstream store.
    pub internal_id: String,
    pub name: Option<String>,
    /// Checksum recorded at ingest.
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<String>,
    pub size_bytes: i64,
    pub deleted: bool,
}

impl Bitstream {
    pub fn new(internal_id: impl Into<String>) -> Self {
        Self {
            id: BitstreamId::new(),
            item_id: None,
            internal_id: internal_id.into(),
            name: None,
            checksum: None,
            checksum_algorithm: None,
            size_bytes: 0,
            deleted: false,
        }
    }

    pub fn with_item(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn with_checksum(mut self, algorithm: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.checksum_algorithm = Some(algorithm.into());
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size_bytes: i64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn mark_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Outcome of verifying one bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumResultCode {
    BitstreamNotFound,
    BitstreamInfoNotFound,
    BitstreamNotProcessed,
    BitstreamMarkedDeleted,
    ChecksumMatch,
    ChecksumNoMatch,
    ChecksumPrevNotFound,
    ChecksumAlgorithmInvalid,
}

impl ChecksumResultCode {
    pub const ALL: [ChecksumResultCode; 8] = [
        ChecksumResultCode::BitstreamNotFound,
        ChecksumResultCode::BitstreamInfoNotFound,
        ChecksumResultCode::BitstreamNotProcessed,
        ChecksumResultCode::BitstreamMarkedDeleted,
        ChecksumResultCode::ChecksumMatch,
        ChecksumResultCode::ChecksumNoMatch,
        ChecksumResultCode::ChecksumPrevNotFound,
        ChecksumResultCode::ChecksumAlgorithmInvalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumResultCode::BitstreamNotFound => "BITSTREAM_NOT_FOUND",
            ChecksumResultCode::BitstreamInfoNotFound => "BITSTREAM_INFO_NOT_FOUND",
            ChecksumResultCode::BitstreamNotProcessed => "BITSTREAM_NOT_PROCESSED",
            ChecksumResultCode::BitstreamMarkedDeleted => "BITSTREAM_MARKED_DELETED",
            ChecksumResultCode::ChecksumMatch => "CHECKSUM_MATCH",
            ChecksumResultCode::ChecksumNoMatch => "CHECKSUM_NO_MATCH",
            ChecksumResultCode::ChecksumPrevNotFound => "CHECKSUM_PREV_NOT_FOUND",
            ChecksumResultCode::ChecksumAlgorithmInvalid => "CHECKSUM_ALGORITHM_INVALID",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ChecksumResultCode::BitstreamNotFound => "Bitstream content could not be found",
            ChecksumResultCode::BitstreamInfoNotFound => "Bitstream info not found",
            ChecksumResultCode::BitstreamNotProcessed => "Bitstream not yet processed",
            ChecksumResultCode::BitstreamMarkedDeleted => "Bitstream marked deleted",
            ChecksumResultCode::ChecksumMatch => "Checksum matched",
            ChecksumResultCode::ChecksumNoMatch => "Checksum did not match",
            ChecksumResultCode::ChecksumPrevNotFound => "Previous checksum was not found",
            ChecksumResultCode::ChecksumAlgorithmInvalid => "Invalid checksum algorithm",
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, ChecksumResultCode::ChecksumMatch)
    }
}

impl fmt::Display for ChecksumResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumResultCode {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| LibraryError::InvalidInput {
                field: "result".to_string(),
                message: format!("unknown checksum result code '{}'", s),
            })
    }
}

/// One row of the checksum audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumHistoryEntry {
    /// Row id, `None` until persisted.
    pub id: Option<i64>,
    pub bitstream_id: BitstreamId,
    pub expected_checksum: Option<String>,
    pub calculated_checksum: Option<String>,
    pub result: ChecksumResultCode,
    pub process_start: DateTime<Utc>,
    pub process_end: DateTime<Utc>,
}

/// Latest verification state of a bitstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MostRecentChecksum {
    pub bitstream_id: BitstreamId,
    /// `false` once the bitstream should never be dispatched again.
    pub to_be_processed: bool,
    pub expected_checksum: Option<String>,
    pub current_checksum: Option<String>,
    pub checksum_algorithm: Option<String>,
    pub last_process_start: DateTime<Utc>,
    pub last_process_end: DateTime<Utc>,
    pub matched_prev_checksum: bool,
    pub result: Option<ChecksumResultCode>,
}
