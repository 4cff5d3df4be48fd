//! Domain builder: typed objects from validated records.
//!
//! Building runs in two phases. Every record is first converted into a
//! [`DomainObject`] using its schema; registered derivations then compute
//! per-type precomputed values against the complete set of converted objects.
//! The resulting graph is immutable and shared across localization workers.

use crate::error::BuildError;
use crate::records::{FieldKind, RawRecord, RecordSchema, SchemaRegistry, ValidatedSnapshot};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Enum(String),
    Ref(String),
    RefList(Vec<String>),
    Null,
}

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Referenced ids for `Ref` and `RefList` values.
    pub fn references(&self) -> &[String] {
        match self {
            FieldValue::Ref(id) => std::slice::from_ref(id),
            FieldValue::RefList(ids) => ids,
            _ => &[],
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldValue::Ref(_) | FieldValue::RefList(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// A typed, immutable representation of one design record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainObject {
    pub record_type: String,
    pub id: String,

    /// Authored fields in name order
    pub fields: BTreeMap<String, FieldValue>,

    /// Values computed by derivations
    pub derived: BTreeMap<String, FieldValue>,
}

impl DomainObject {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn derived(&self, name: &str) -> Option<&FieldValue> {
        self.derived.get(name)
    }
}

/// Read access to converted objects while derivations run.
pub struct DomainIndex {
    objects: BTreeMap<String, BTreeMap<String, DomainObject>>,
}

impl DomainIndex {
    pub fn get(&self, record_type: &str, id: &str) -> Option<&DomainObject> {
        self.objects.get(record_type).and_then(|objects| objects.get(id))
    }

    /// Integer field of a referenced object. A missing field counts as zero;
    /// a missing object is an error.
    pub fn integer_of(&self, record_type: &str, id: &str, field: &str) -> Result<i64, String> {
        let object = self
            .get(record_type, id)
            .ok_or_else(|| format!("references missing {} '{}'", record_type, id))?;
        Ok(object.field(field).and_then(FieldValue::as_integer).unwrap_or(0))
    }
}

/// Computes one derived value for an object.
///
/// Returns `Ok(None)` when the inputs are absent and the value should be
/// omitted.
pub type DeriveFn = fn(&DomainObject, &DomainIndex) -> Result<Option<FieldValue>, String>;

/// A named per-type precomputation.
#[derive(Clone)]
pub struct Derivation {
    pub record_type: String,
    pub name: String,
    pub derive: DeriveFn,
}

impl Derivation {
    pub fn new(record_type: &str, name: &str, derive: DeriveFn) -> Self {
        Self {
            record_type: record_type.to_string(),
            name: name.to_string(),
            derive,
        }
    }
}

impl std::fmt::Debug for Derivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Derivation({}.{})", self.record_type, self.name)
    }
}

fn sell_price(object: &DomainObject, _: &DomainIndex) -> Result<Option<FieldValue>, String> {
    Ok(object
        .field("price")
        .and_then(FieldValue::as_integer)
        .map(|price| FieldValue::Integer(price.div_euclid(2))))
}

fn inventory_value(object: &DomainObject, index: &DomainIndex) -> Result<Option<FieldValue>, String> {
    let Some(sells) = object.field("sells") else {
        return Ok(Some(FieldValue::Integer(0)));
    };
    let mut total = 0i64;
    for item in sells.references() {
        total = total.saturating_add(index.integer_of("item", item, "price")?);
    }
    Ok(Some(FieldValue::Integer(total)))
}

fn total_reward_value(object: &DomainObject, index: &DomainIndex) -> Result<Option<FieldValue>, String> {
    let mut total = object.field("reward_gold").and_then(FieldValue::as_integer).unwrap_or(0);
    if let Some(rewards) = object.field("rewards") {
        for item in rewards.references() {
            total = total.saturating_add(index.integer_of("item", item, "price")?);
        }
    }
    Ok(Some(FieldValue::Integer(total)))
}

fn npc_count(object: &DomainObject, _: &DomainIndex) -> Result<Option<FieldValue>, String> {
    let count = object.field("npcs").map(|npcs| npcs.references().len()).unwrap_or(0);
    Ok(Some(FieldValue::Integer(count as i64)))
}

/// Converts validated snapshots into a [`DomainGraph`].
#[derive(Debug, Clone, Default)]
pub struct DomainBuilder {
    derivations: Vec<Derivation>,
}

impl DomainBuilder {
    /// A builder with no derivations.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder with the derivations for the built-in record types.
    pub fn with_builtin_derivations() -> Self {
        Self::new()
            .with_derivation(Derivation::new("item", "sell_price", sell_price))
            .with_derivation(Derivation::new("npc", "inventory_value", inventory_value))
            .with_derivation(Derivation::new("quest", "total_reward_value", total_reward_value))
            .with_derivation(Derivation::new("location", "npc_count", npc_count))
    }

    pub fn with_derivation(mut self, derivation: Derivation) -> Self {
        self.derivations.push(derivation);
        self
    }

    pub fn derivations(&self) -> &[Derivation] {
        &self.derivations
    }

    /// Build the domain graph for a validated snapshot.
    pub fn build(&self, validated: &ValidatedSnapshot, schemas: &SchemaRegistry) -> Result<DomainGraph, BuildError> {
        let snapshot = validated.snapshot();

        let mut objects: BTreeMap<String, BTreeMap<String, DomainObject>> = BTreeMap::new();
        for record in snapshot.iter() {
            let schema = schemas.get(&record.record_type).ok_or_else(|| {
                build_error(&record.record_type, &record.id, "no schema registered".to_string())
            })?;
            let object = convert(record, schema)?;
            objects
                .entry(object.record_type.clone())
                .or_default()
                .insert(object.id.clone(), object);
        }

        let index = DomainIndex { objects };
        let mut graph = DomainGraph::default();
        for (record_type, objects) in &index.objects {
            let schema = schemas.get(record_type);
            for object in objects.values() {
                let mut built = object.clone();
                for derivation in self.derivations.iter().filter(|d| &d.record_type == record_type) {
                    if schema.is_some_and(|s| s.field(&derivation.name).is_some()) {
                        return Err(build_error(
                            record_type,
                            &object.id,
                            format!("derived value '{}' collides with a schema field", derivation.name),
                        ));
                    }
                    let value = (derivation.derive)(object, &index)
                        .map_err(|reason| build_error(record_type, &object.id, reason))?;
                    if let Some(value) = value {
                        built.derived.insert(derivation.name.clone(), value);
                    }
                }
                graph.insert(built);
            }
        }

        debug!("Built {} domain objects across {} record types", graph.len(), graph.objects.len());
        Ok(graph)
    }
}

fn build_error(record_type: &str, id: &str, reason: String) -> BuildError {
    BuildError {
        record_type: record_type.to_string(),
        id: id.to_string(),
        reason,
    }
}

fn convert(record: &RawRecord, schema: &RecordSchema) -> Result<DomainObject, BuildError> {
    let mut fields = BTreeMap::new();
    for (name, value) in &record.fields {
        let spec = schema.field(name).ok_or_else(|| {
            build_error(&record.record_type, &record.id, format!("field '{}' is not declared", name))
        })?;
        let converted = convert_value(&spec.kind, value).ok_or_else(|| {
            build_error(
                &record.record_type,
                &record.id,
                format!("field '{}' does not match its declared kind", name),
            )
        })?;
        fields.insert(name.clone(), converted);
    }

    Ok(DomainObject {
        record_type: record.record_type.clone(),
        id: record.id.clone(),
        fields,
        derived: BTreeMap::new(),
    })
}

fn convert_value(kind: &FieldKind, value: &Value) -> Option<FieldValue> {
    if value.is_null() {
        return Some(FieldValue::Null);
    }
    let strings = |value: &Value| -> Option<Vec<String>> {
        value
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    };
    match kind {
        FieldKind::Text => value.as_str().map(|s| FieldValue::Text(s.to_string())),
        FieldKind::TextList => strings(value).map(FieldValue::TextList),
        FieldKind::Integer { .. } => value.as_i64().map(FieldValue::Integer),
        FieldKind::Float { .. } => value.as_f64().map(FieldValue::Float),
        FieldKind::Bool => value.as_bool().map(FieldValue::Bool),
        FieldKind::Enum { .. } => value.as_str().map(|s| FieldValue::Enum(s.to_string())),
        FieldKind::Reference { .. } => value.as_str().map(|s| FieldValue::Ref(s.to_string())),
        FieldKind::ReferenceList { .. } => strings(value).map(FieldValue::RefList),
    }
}

/// Immutable domain objects grouped by record type, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct DomainGraph {
    objects: BTreeMap<String, Vec<Arc<DomainObject>>>,
}

impl DomainGraph {
    fn insert(&mut self, object: DomainObject) {
        let objects = self.objects.entry(object.record_type.clone()).or_default();
        objects.push(Arc::new(object));
    }

    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn objects_of(&self, record_type: &str) -> &[Arc<DomainObject>] {
        self.objects.get(record_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, record_type: &str, id: &str) -> Option<&Arc<DomainObject>> {
        self.objects_of(record_type).iter().find(|o| o.id == id)
    }

    /// All objects, by record type then id.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DomainObject>> {
        self.objects.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{validate, Snapshot};
    use serde_json::json;

    fn build(records: Vec<RawRecord>) -> Result<DomainGraph, BuildError> {
        let schemas = SchemaRegistry::builtin();
        let validated = validate(Snapshot::from_records("main", records), &schemas).unwrap();
        DomainBuilder::with_builtin_derivations().build(&validated, &schemas)
    }

    fn item(id: &str, price: i64) -> RawRecord {
        RawRecord::new("item", id)
            .with_field("name", json!(format!("Item {}", id)))
            .with_field("category", json!("weapon"))
            .with_field("price", json!(price))
    }

    fn sample() -> Vec<RawRecord> {
        vec![
            item("sword01", 101),
            item("shield01", 40),
            RawRecord::new("npc", "smith")
                .with_field("name", json!("Smith"))
                .with_field("role", json!("merchant"))
                .with_field("level", json!(10))
                .with_field("sells", json!(["sword01", "shield01"])),
            RawRecord::new("quest", "q1")
                .with_field("title", json!("First Blood"))
                .with_field("giver", json!("smith"))
                .with_field("level", json!(1))
                .with_field("reward_gold", json!(25))
                .with_field("rewards", json!(["shield01"]))
                .with_field("objectives", json!(["Find the smith", "Buy a sword"])),
            RawRecord::new("location", "town")
                .with_field("name", json!("Town"))
                .with_field("region", json!("coast"))
                .with_field("npcs", json!(["smith"])),
        ]
    }

    // ==================== Conversion Tests ====================

    #[test]
    fn test_fields_converted_by_kind() {
        let graph = build(sample()).unwrap();
        let quest = graph.get("quest", "q1").unwrap();

        assert_eq!(quest.field("title"), Some(&FieldValue::Text("First Blood".to_string())));
        assert_eq!(quest.field("giver"), Some(&FieldValue::Ref("smith".to_string())));
        assert_eq!(quest.field("level"), Some(&FieldValue::Integer(1)));
        assert_eq!(
            quest.field("objectives"),
            Some(&FieldValue::TextList(vec!["Find the smith".into(), "Buy a sword".into()]))
        );

        let npc = graph.get("npc", "smith").unwrap();
        assert_eq!(npc.field("role"), Some(&FieldValue::Enum("merchant".to_string())));
    }

    #[test]
    fn test_graph_is_ordered() {
        let graph = build(sample()).unwrap();
        let types: Vec<_> = graph.record_types().collect();
        assert_eq!(types, vec!["item", "location", "npc", "quest"]);

        let items: Vec<_> = graph.objects_of("item").iter().map(|o| o.id.as_str()).collect();
        assert_eq!(items, vec!["shield01", "sword01"]);
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_explicit_null_kept_as_null() {
        let graph = build(vec![item("a", 1).with_field("icon", Value::Null)]).unwrap();
        assert!(graph.get("item", "a").unwrap().field("icon").unwrap().is_null());
    }

    // ==================== Derivation Tests ====================

    #[test]
    fn test_builtin_derivations() {
        let graph = build(sample()).unwrap();

        assert_eq!(graph.get("item", "sword01").unwrap().derived("sell_price"), Some(&FieldValue::Integer(50)));
        assert_eq!(graph.get("npc", "smith").unwrap().derived("inventory_value"), Some(&FieldValue::Integer(141)));
        assert_eq!(graph.get("quest", "q1").unwrap().derived("total_reward_value"), Some(&FieldValue::Integer(65)));
        assert_eq!(graph.get("location", "town").unwrap().derived("npc_count"), Some(&FieldValue::Integer(1)));
    }

    #[test]
    fn test_absent_inputs_default_to_zero() {
        let graph = build(vec![
            item("a", 0),
            RawRecord::new("location", "void")
                .with_field("name", json!("Void"))
                .with_field("region", json!("underworld")),
        ])
        .unwrap();

        assert_eq!(graph.get("location", "void").unwrap().derived("npc_count"), Some(&FieldValue::Integer(0)));
        assert_eq!(graph.get("item", "a").unwrap().derived("sell_price"), Some(&FieldValue::Integer(0)));
    }

    #[test]
    fn test_dangling_reference_in_derivation_is_build_error() {
        // Bypass the validator to simulate an invariant breach.
        let schemas = SchemaRegistry::builtin();
        let snapshot = Snapshot::from_records(
            "main",
            vec![RawRecord::new("npc", "smith")
                .with_field("name", json!("Smith"))
                .with_field("role", json!("merchant"))
                .with_field("level", json!(1))
                .with_field("sells", json!(["ghost"]))],
        );
        let validated = ValidatedSnapshot::unchecked(snapshot);

        let err = DomainBuilder::with_builtin_derivations().build(&validated, &schemas).unwrap_err();
        assert_eq!(err.record_type, "npc");
        assert!(err.reason.contains("missing item 'ghost'"));
    }

    #[test]
    fn test_type_mismatch_is_build_error() {
        let schemas = SchemaRegistry::builtin();
        let snapshot = Snapshot::from_records("main", vec![item("a", 1).with_field("price", json!("cheap"))]);
        let validated = ValidatedSnapshot::unchecked(snapshot);

        let err = DomainBuilder::new().build(&validated, &schemas).unwrap_err();
        assert!(err.reason.contains("price"));
    }

    #[test]
    fn test_derivation_colliding_with_schema_field() {
        let schemas = SchemaRegistry::builtin();
        let validated = validate(Snapshot::from_records("main", vec![item("a", 1)]), &schemas).unwrap();
        let builder = DomainBuilder::new().with_derivation(Derivation::new("item", "price", sell_price));

        let err = builder.build(&validated, &schemas).unwrap_err();
        assert!(err.reason.contains("collides"));
    }

    #[test]
    fn test_field_value_serializes_untagged() {
        assert_eq!(serde_json::to_value(FieldValue::Integer(3)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(FieldValue::Ref("x".into())).unwrap(), json!("x"));
        assert_eq!(serde_json::to_value(FieldValue::Null).unwrap(), Value::Null);
    }
}
