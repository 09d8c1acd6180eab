//! Notion API wire types.
//!
//! Property payloads are kept as raw JSON rather than fully typed structs:
//! Notion content is user-edited and individual cells can be malformed, so
//! extraction inspects the JSON defensively and substitutes NULL instead of
//! failing deserialization for a whole page.

use serde::Deserialize;

/// Property kinds understood by the importer.
///
/// `Unknown` absorbs kinds added to the Notion API after this tool was
/// written; such properties are skipped with a warning instead of aborting
/// the import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Status,
    Date,
    People,
    Files,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    Formula,
    Relation,
    Rollup,
    CreatedTime,
    CreatedBy,
    LastEditedTime,
    LastEditedBy,
    UniqueId,
    #[serde(other)]
    Unknown,
}

/// One property of a Notion database schema.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Property name as shown in Notion; also the key under which row
    /// values appear.
    pub name: String,
    pub kind: PropertyKind,
    /// The kind-specific configuration object, e.g. a relation's
    /// `database_id` or a rollup's `relation_property_name` and `function`.
    pub config: serde_json::Value,
}

impl PropertyDescriptor {
    /// Build a descriptor from one entry of a database's `properties` map.
    pub fn from_schema_entry(name: &str, raw: &serde_json::Value) -> Self {
        let kind = raw
            .get("type")
            .cloned()
            .map(serde_json::from_value)
            .and_then(Result::ok)
            .unwrap_or(PropertyKind::Unknown);
        // The payload lives under a key equal to the type tag.
        let config = raw
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(|t| raw.get(t))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        PropertyDescriptor {
            name: name.to_string(),
            kind,
            config,
        }
    }
}

/// One Notion page (row), as returned by the database query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRow {
    pub id: String,
    /// Property name → raw property value object (carries a `type` tag).
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct PageBatch {
    pub rows: Vec<RemoteRow>,
    /// Cursor for the next batch; `None` when the sequence is exhausted.
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_from_schema_entry() {
        let raw = serde_json::json!({
            "id": "abcd",
            "name": "Cost",
            "type": "number",
            "number": {"format": "dollar"},
        });
        let descriptor = PropertyDescriptor::from_schema_entry("Cost", &raw);
        assert_eq!(descriptor.name, "Cost");
        assert_eq!(descriptor.kind, PropertyKind::Number);
        assert_eq!(descriptor.config["format"], "dollar");
    }

    #[test]
    fn unrecognized_kind_is_unknown() {
        let raw = serde_json::json!({"type": "holographic", "holographic": {}});
        let descriptor = PropertyDescriptor::from_schema_entry("X", &raw);
        assert_eq!(descriptor.kind, PropertyKind::Unknown);
    }

    #[test]
    fn row_without_properties_deserializes() {
        let row: RemoteRow = serde_json::from_value(serde_json::json!({"id": "p1"})).unwrap();
        assert!(row.properties.is_empty());
    }
}
