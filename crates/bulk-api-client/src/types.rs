//! Wire types for the Bulk API.
//!
//! These types mirror the catalog's discovery and schema documents and are
//! used for deserialization of JSON responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a field's value is interpreted by a [`Record`](crate::Record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain JSON value.
    Scalar,
    /// URI of another record, resolved lazily into a `Record`.
    Relation,
    /// URI of a downloadable file, dereferenced into its bytes.
    File,
}

/// Schema metadata for one field of a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Human-readable label
    #[serde(default)]
    pub title: Option<String>,
    /// Declared type (`integer`, `string`, `file`, ...)
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    /// Value format; `uri` marks a relation
    #[serde(default)]
    pub format: Option<String>,
    /// Whether null is accepted
    #[serde(default, alias = "x-nullable")]
    pub nullable: bool,
    /// Whether the server ignores writes to this field
    #[serde(default, rename = "readOnly", alias = "read_only")]
    pub read_only: bool,
    /// Advisory maximum length
    #[serde(default, rename = "maxLength")]
    pub max_length: Option<u64>,
    /// Advisory minimum length
    #[serde(default, rename = "minLength")]
    pub min_length: Option<u64>,
}

impl FieldDescriptor {
    /// Classify the field for the record accessors.
    pub fn kind(&self) -> FieldKind {
        match (self.format.as_deref(), self.field_type.as_deref()) {
            (Some("uri"), _) => FieldKind::Relation,
            (Some("binary"), _) | (_, Some("file")) => FieldKind::File,
            _ => FieldKind::Scalar,
        }
    }
}

/// Field descriptors of a single model, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Field name -> descriptor
    #[serde(default)]
    pub properties: BTreeMap<String, FieldDescriptor>,
}

impl ModelSchema {
    /// Look up one field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.properties.get(name)
    }

    /// Iterate over field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}

/// Catalog-wide schema document, keyed by `app_label.model_name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDocument {
    /// `app.model` -> model schema
    #[serde(default)]
    pub definitions: BTreeMap<String, ModelSchema>,
}

/// Paged collection response (`GET <model_url>`).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListResponse {
    pub results: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_accepts_swagger_and_legacy_keys() {
        let doc: SchemaDocument = serde_json::from_value(serde_json::json!({
            "definitions": {
                "bulk_importer.examplefortesting": {
                    "properties": {
                        "id": {"title": "ID", "type": "integer", "readOnly": true},
                        "name": {"type": "string", "maxLength": 256, "minLength": 1},
                        "legacy": {"type": "integer", "read_only": true, "x-nullable": true},
                        "parent": {"type": "string", "format": "uri"},
                        "data_file": {"type": "file"}
                    }
                }
            }
        }))
        .unwrap();

        let schema = &doc.definitions["bulk_importer.examplefortesting"];
        assert!(schema.field("id").unwrap().read_only);
        assert_eq!(schema.field("name").unwrap().max_length, Some(256));
        let legacy = schema.field("legacy").unwrap();
        assert!(legacy.read_only);
        assert!(legacy.nullable);
        assert_eq!(schema.field("parent").unwrap().kind(), FieldKind::Relation);
        assert_eq!(schema.field("data_file").unwrap().kind(), FieldKind::File);
        assert_eq!(schema.field("name").unwrap().kind(), FieldKind::Scalar);
    }

    #[test]
    fn test_missing_properties_is_empty() {
        let schema: ModelSchema = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(schema.field_names().count(), 0);
    }
}
