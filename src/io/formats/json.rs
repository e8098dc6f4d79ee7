//! JSON format adapter.
//!
//! Reads and writes the sectioned document described in [`super::document`].

use std::io::Write;

use super::document;
use crate::io::traits::{
    AdapterDescriptor, Capabilities, FieldMapping, FormatAdapter, FormatSpec, RawRecordStream,
    SourceDocument, StructuralIssue,
};
use crate::models::{CanonicalRecord, EntityKind};
use crate::{Error, Result};

/// JSON adapter.
pub struct JsonAdapter {
    descriptor: AdapterDescriptor,
    mapping: FieldMapping,
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonAdapter {
    /// Adapter id.
    pub const ID: &'static str = "json";

    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AdapterDescriptor {
                id: Self::ID.to_string(),
                display_name: "JSON document".to_string(),
                formats: vec![FormatSpec::new("json", &["json"], "application/json")],
                capabilities: Capabilities::BOTH,
                entity_kinds: EntityKind::all().to_vec(),
            },
            mapping: FieldMapping::canonical(),
        }
    }

    fn decode(source: &SourceDocument) -> std::result::Result<serde_json::Value, String> {
        serde_json::from_slice(source.bytes()).map_err(|e| format!("invalid JSON: {e}"))
    }
}

impl FormatAdapter for JsonAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn validate_structure(&self, source: &SourceDocument, _format: &str) -> Vec<StructuralIssue> {
        match Self::decode(source) {
            Ok(root) => document::validate(&root),
            Err(message) => vec![StructuralIssue::new(message)],
        }
    }

    fn parse<'a>(
        &'a self,
        source: &'a SourceDocument,
        _format: &str,
    ) -> Result<RawRecordStream<'a>> {
        let root = Self::decode(source).map_err(|message| Error::Format {
            adapter: Self::ID.to_string(),
            message,
        })?;
        Ok(Box::new(document::into_rows(Self::ID, root)))
    }

    fn serialize(
        &self,
        records: &[CanonicalRecord],
        _format: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let root = document::to_document(records);
        serde_json::to_writer_pretty(&mut *out, &root).map_err(|e| Error::OperationFailed {
            operation: "write_json".to_string(),
            cause: e.to_string(),
        })?;
        out.write_all(b"\n")
            .map_err(|e| Error::operation("write_json", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, Instructor, SourcePosition, TenantScope};

    #[test]
    fn test_parse_document() {
        let adapter = JsonAdapter::new();
        let source = SourceDocument::from_bytes(
            "catalog.json",
            r#"{"instructors": [{"employee_id": "E1", "full_name": "Ada"}]}"#,
        );
        assert!(adapter.validate_structure(&source, "json").is_empty());
        let rows: Vec<_> = adapter
            .parse(&source, "json")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind_hint.as_deref(), Some("instructor"));
    }

    #[test]
    fn test_invalid_json_is_structural() {
        let adapter = JsonAdapter::new();
        let source = SourceDocument::from_bytes("bad.json", "{not json");
        let issues = adapter.validate_structure(&source, "json");
        assert!(issues[0].message.starts_with("invalid JSON"));
        assert!(matches!(
            adapter.parse(&source, "json").err(),
            Some(Error::Format { .. })
        ));
    }

    #[test]
    fn test_serialize_sections() {
        let adapter = JsonAdapter::new();
        let record = CanonicalRecord {
            tenant: TenantScope::institution("acme"),
            position: SourcePosition::ordinal(1),
            entity: Entity::Instructor(Instructor {
                employee_id: "e1".to_string(),
                full_name: Some("Ada".to_string()),
                email: None,
                department: None,
            }),
        };
        let mut out = Vec::new();
        adapter.serialize(&[record], "json", &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["instructors"][0]["employee_id"], "e1");
        assert!(value["instructors"][0].get("email").is_none());
        assert!(value.get("courses").is_none());
    }
}
