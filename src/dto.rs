//! Consumer-facing DTO shapes.
//!
//! Each client platform gets its own projection of a localized object. The
//! shapes are independent of each other and of the wire format they are
//! later rendered into.

use crate::domain::FieldValue;
use crate::i18n::{LanguageCode, LocalizedObject};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Name of the bundle that aggregates every record type.
pub const ALL_BUNDLE: &str = "all";

/// Target DTO shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtoShape {
    /// Flat object with camelCase keys
    Flash,
    /// `{id, type, attributes, relationships}` with snake_case keys
    Ios,
}

impl DtoShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            DtoShape::Flash => "flash",
            DtoShape::Ios => "ios",
        }
    }
}

impl fmt::Display for DtoShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DtoShape {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "flash" => Ok(DtoShape::Flash),
            "ios" => Ok(DtoShape::Ios),
            other => anyhow::bail!("Unknown DTO shape '{}' (expected flash or ios)", other),
        }
    }
}

/// Project a localized object into the given shape. Nulls are omitted.
pub fn to_dto(localized: &LocalizedObject, shape: DtoShape) -> Map<String, Value> {
    match shape {
        DtoShape::Flash => flash_dto(localized),
        DtoShape::Ios => ios_dto(localized),
    }
}

fn value_of(value: &FieldValue) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn flash_dto(localized: &LocalizedObject) -> Map<String, Value> {
    let object = &localized.object;
    let mut dto = Map::new();
    dto.insert("id".to_string(), Value::String(object.id.clone()));
    dto.insert("type".to_string(), Value::String(object.record_type.clone()));

    for (name, value) in object.fields.iter().chain(object.derived.iter()) {
        if value.is_null() {
            continue;
        }
        let key = camel_case(name);
        if key == "id" || key == "type" {
            continue;
        }
        dto.insert(key, value_of(value));
    }
    dto
}

fn ios_dto(localized: &LocalizedObject) -> Map<String, Value> {
    let object = &localized.object;
    let mut attributes = Map::new();
    let mut relationships = Map::new();

    for (name, value) in object.fields.iter().chain(object.derived.iter()) {
        if value.is_null() {
            continue;
        }
        let target = if value.is_reference() {
            &mut relationships
        } else {
            &mut attributes
        };
        target.insert(snake_case(name), value_of(value));
    }

    let mut dto = Map::new();
    dto.insert("id".to_string(), Value::String(object.id.clone()));
    dto.insert("type".to_string(), Value::String(object.record_type.clone()));
    dto.insert("attributes".to_string(), Value::Object(attributes));
    dto.insert("relationships".to_string(), Value::Object(relationships));
    dto
}

/// `sell_price` -> `sellPrice`
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `sellPrice` -> `sell_price`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// One renderable unit: every DTO of a bundle for one language and shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bundle {
    pub bundle: String,
    pub language: LanguageCode,
    pub shape: DtoShape,
    pub records: Vec<Map<String, Value>>,
}

impl Bundle {
    /// Project `objects` into a bundle, in the order given.
    pub fn from_objects<'a>(
        bundle: &str,
        language: &LanguageCode,
        shape: DtoShape,
        objects: impl IntoIterator<Item = &'a LocalizedObject>,
    ) -> Self {
        Self {
            bundle: bundle.to_string(),
            language: language.clone(),
            shape,
            records: objects.into_iter().map(|o| to_dto(o, shape)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
