//! Record schemas: the declared shape of every record type.
//!
//! The registry is consulted by the validator (structure and references),
//! the domain builder (value conversion) and the localization policy (the
//! `localizable` marker). Adding a record type or a localizable field only
//! requires a schema entry.

use crate::dto::ALL_BUNDLE;
use crate::storage::is_valid_segment;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Value kind of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextList,
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
    },
    Bool,
    Enum {
        allowed: Vec<String>,
    },
    Reference {
        target: String,
    },
    ReferenceList {
        target: String,
    },
}

impl FieldKind {
    /// Whether values of this kind are strings that can carry translations
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::TextList)
    }

    /// Target record type for reference kinds
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            FieldKind::Reference { target } | FieldKind::ReferenceList { target } => Some(target),
            _ => None,
        }
    }
}

/// Declaration of one field of a record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(flatten)]
    pub kind: FieldKind,

    #[serde(default)]
    pub required: bool,

    /// Marks the field for translation at publish time
    #[serde(default)]
    pub localizable: bool,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            localizable: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn localizable(mut self) -> Self {
        self.localizable = true;
        self
    }
}

/// Schema for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub record_type: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(record_type: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            record_type: record_type.to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// All registered record schemas, keyed by record type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, RecordSchema>,
}

impl SchemaRegistry {
    /// Build a registry from a list of schemas, checking it is self-consistent.
    ///
    /// Rejects duplicate record types, duplicate or reserved (`id`) field
    /// names, empty enums and references to unregistered record types.
    /// Record type names become artifact key segments, so they must be
    /// key-safe and must not shadow the aggregate bundle name.
    pub fn new(schemas: Vec<RecordSchema>) -> Result<Self> {
        let mut registry = SchemaRegistry::default();
        for schema in schemas {
            if schema.record_type == ALL_BUNDLE {
                bail!("Record type name '{}' is reserved for the aggregate bundle", ALL_BUNDLE);
            }
            if !is_valid_segment(&schema.record_type) {
                bail!(
                    "Record type name '{}' may only contain letters, digits, '-', '_' and '.'",
                    schema.record_type
                );
            }
            if registry.schemas.contains_key(&schema.record_type) {
                bail!("Duplicate schema for record type '{}'", schema.record_type);
            }
            let mut seen = HashSet::new();
            for field in &schema.fields {
                if field.name == "id" {
                    bail!("{}: field name 'id' is reserved", schema.record_type);
                }
                if !seen.insert(field.name.as_str()) {
                    bail!("{}: duplicate field '{}'", schema.record_type, field.name);
                }
                if let FieldKind::Enum { allowed } = &field.kind {
                    if allowed.is_empty() {
                        bail!("{}.{}: enum has no allowed values", schema.record_type, field.name);
                    }
                }
            }
            registry.schemas.insert(schema.record_type.clone(), schema);
        }

        for schema in registry.schemas.values() {
            for field in &schema.fields {
                if let Some(target) = field.kind.reference_target() {
                    if !registry.schemas.contains_key(target) {
                        bail!(
                            "{}.{}: references unknown record type '{}'",
                            schema.record_type,
                            field.name,
                            target
                        );
                    }
                }
            }
        }

        Ok(registry)
    }

    /// Parse a registry from a JSON array of schemas.
    pub fn from_json(json: &str) -> Result<Self> {
        let schemas: Vec<RecordSchema> =
            serde_json::from_str(json).context("Failed to parse schema JSON")?;
        Self::new(schemas)
    }

    /// Load a registry from a JSON schema file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        Self::from_json(&json)
    }

    /// The built-in game schemas: item, npc, quest, location.
    pub fn builtin() -> Self {
        use FieldKind::*;

        let text = |name: &str| FieldSpec::new(name, Text);
        let integer = |name: &str, min: Option<i64>, max: Option<i64>| {
            FieldSpec::new(name, Integer { min, max })
        };
        let one_of = |name: &str, values: &[&str]| {
            FieldSpec::new(
                name,
                Enum {
                    allowed: values.iter().map(|v| v.to_string()).collect(),
                },
            )
        };
        let reference = |name: &str, target: &str| {
            FieldSpec::new(
                name,
                Reference {
                    target: target.to_string(),
                },
            )
        };
        let references = |name: &str, target: &str| {
            FieldSpec::new(
                name,
                ReferenceList {
                    target: target.to_string(),
                },
            )
        };

        let schemas = vec![
            RecordSchema::new(
                "item",
                vec![
                    text("name").required().localizable(),
                    text("description").localizable(),
                    one_of("category", &["weapon", "armor", "consumable", "material", "quest"])
                        .required(),
                    integer("price", Some(0), None).required(),
                    FieldSpec::new("weight", Float { min: Some(0.0) }),
                    integer("stack_size", Some(1), Some(999)),
                    text("icon"),
                ],
            ),
            RecordSchema::new(
                "npc",
                vec![
                    text("name").required().localizable(),
                    text("title").localizable(),
                    text("greeting").localizable(),
                    one_of("role", &["merchant", "quest_giver", "guard", "villager"]).required(),
                    integer("level", Some(1), Some(100)).required(),
                    references("sells", "item"),
                    text("portrait"),
                ],
            ),
            RecordSchema::new(
                "quest",
                vec![
                    text("title").required().localizable(),
                    text("description").localizable(),
                    FieldSpec::new("objectives", TextList).localizable(),
                    reference("giver", "npc").required(),
                    integer("level", Some(1), Some(100)).required(),
                    integer("reward_gold", Some(0), None),
                    references("rewards", "item"),
                    FieldSpec::new("repeatable", Bool),
                    reference("location", "location"),
                ],
            ),
            RecordSchema::new(
                "location",
                vec![
                    text("name").required().localizable(),
                    text("description").localizable(),
                    one_of("region", &["highlands", "coast", "desert", "underworld"]).required(),
                    references("npcs", "npc"),
                    reference("parent", "location"),
                    FieldSpec::new("safe_zone", Bool),
                ],
            ),
        ];

        let mut registry = SchemaRegistry::default();
        for schema in schemas {
            registry.schemas.insert(schema.record_type.clone(), schema);
        }
        registry
    }

    pub fn get(&self, record_type: &str) -> Option<&RecordSchema> {
        self.schemas.get(record_type)
    }

    /// All schemas, sorted by record type.
    pub fn iter(&self) -> impl Iterator<Item = &RecordSchema> {
        self.schemas.values()
    }

    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_self_consistent() {
        let builtin = SchemaRegistry::builtin();
        let schemas: Vec<_> = builtin.iter().cloned().collect();
        let rebuilt = SchemaRegistry::new(schemas).expect("builtin schemas should validate");
        assert_eq!(rebuilt, builtin);
    }

    #[test]
    fn test_builtin_record_types() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(
            registry.record_types().collect::<Vec<_>>(),
            vec!["item", "location", "npc", "quest"]
        );
    }

    #[test]
    fn test_builtin_item_name_is_localizable() {
        let registry = SchemaRegistry::builtin();
        let name = registry.get("item").unwrap().field("name").unwrap();
        assert!(name.localizable);
        assert!(name.required);
        let icon = registry.get("item").unwrap().field("icon").unwrap();
        assert!(!icon.localizable);
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"record_type": "skill", "fields": [
                {"name": "name", "kind": "text", "required": true, "localizable": true},
                {"name": "cooldown", "kind": "integer", "min": 0},
                {"name": "element", "kind": "enum", "allowed": ["fire", "ice"]},
                {"name": "requires", "kind": "reference", "target": "skill"}
            ]}
        ]"#;
        let registry = SchemaRegistry::from_json(json).unwrap();
        let skill = registry.get("skill").unwrap();
        assert_eq!(skill.fields.len(), 4);
        assert_eq!(
            skill.field("cooldown").unwrap().kind,
            FieldKind::Integer { min: Some(0), max: None }
        );
        assert_eq!(skill.field("requires").unwrap().kind.reference_target(), Some("skill"));
    }

    #[test]
    fn test_rejects_unknown_reference_target() {
        let json = r#"[{"record_type": "quest", "fields": [
            {"name": "giver", "kind": "reference", "target": "npc"}
        ]}]"#;
        let err = SchemaRegistry::from_json(json).unwrap_err();
        assert!(err.to_string().contains("unknown record type 'npc'"));
    }

    #[test]
    fn test_rejects_record_type_named_like_aggregate_bundle() {
        let schemas = vec![
            RecordSchema::new("all", vec![FieldSpec::new("name", FieldKind::Text)]),
            RecordSchema::new("item", vec![FieldSpec::new("name", FieldKind::Text)]),
        ];
        let err = SchemaRegistry::new(schemas).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_rejects_record_type_unusable_in_keys() {
        for name in ["boss fight", "", "..", "a/b"] {
            let schema = RecordSchema::new(name, vec![FieldSpec::new("name", FieldKind::Text)]);
            assert!(SchemaRegistry::new(vec![schema]).is_err(), "accepted {:?}", name);
        }

        let schema = RecordSchema::new("boss_fight", vec![FieldSpec::new("name", FieldKind::Text)]);
        assert!(SchemaRegistry::new(vec![schema]).is_ok());
    }

    #[test]
    fn test_rejects_reserved_id_field() {
        let schema = RecordSchema::new("item", vec![FieldSpec::new("id", FieldKind::Text)]);
        assert!(SchemaRegistry::new(vec![schema]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_field() {
        let schema = RecordSchema::new(
            "item",
            vec![
                FieldSpec::new("name", FieldKind::Text),
                FieldSpec::new("name", FieldKind::Bool),
            ],
        );
        assert!(SchemaRegistry::new(vec![schema]).is_err());
    }

    #[test]
    fn test_rejects_empty_enum() {
        let schema = RecordSchema::new(
            "item",
            vec![FieldSpec::new("category", FieldKind::Enum { allowed: vec![] })],
        );
        assert!(SchemaRegistry::new(vec![schema]).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(SchemaRegistry::load(Path::new("/nonexistent/schema.json")).is_err());
    }
}
