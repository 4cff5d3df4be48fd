//! Raw design records as read from the record store.
//!
//! - `schema`: Per-record-type field schemas (the single source of truth for
//!   validation, domain building and the localization policy)
//! - `store`: Record store adapters that resolve a branch reference to a snapshot
//! - `validator`: Structural and referential checks over a whole snapshot

pub mod schema;
pub mod store;
pub mod validator;

pub use schema::{FieldKind, FieldSpec, RecordSchema, SchemaRegistry};
pub use store::{FsRecordStore, HttpRecordStore, RecordStore};
pub use validator::{validate, ValidatedSnapshot, ValidationReport, Violation};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One design entity (item, quest, NPC, ...) as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub record_type: String,
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field value, returning the record.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// The complete set of records for one branch reference, grouped by type.
///
/// Records are kept sorted by id within each type so that everything derived
/// from a snapshot is deterministic. Duplicate ids are preserved for the
/// validator to report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub branch: String,
    records: BTreeMap<String, Vec<RawRecord>>,
}

impl Snapshot {
    pub fn from_records(branch: impl Into<String>, records: impl IntoIterator<Item = RawRecord>) -> Self {
        let mut grouped: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.record_type.clone())
                .or_default()
                .push(record);
        }
        for group in grouped.values_mut() {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Self {
            branch: branch.into(),
            records: grouped,
        }
    }

    /// Record types present in the snapshot, sorted.
    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Records of one type, sorted by id.
    pub fn records_of(&self, record_type: &str) -> &[RawRecord] {
        self.records
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All records, grouped by type then sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.values().flatten()
    }

    /// Look up a record by identity. With duplicate ids, any one of them.
    pub fn get(&self, record_type: &str, id: &str) -> Option<&RawRecord> {
        let records = self.records_of(record_type);
        records
            .binary_search_by(|r| r.id.as_str().cmp(id))
            .ok()
            .map(|index| &records[index])
    }

    pub fn contains(&self, record_type: &str, id: &str) -> bool {
        self.get(record_type, id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
