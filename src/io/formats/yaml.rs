//! YAML format adapter.
//!
//! Same sectioned shape as the JSON adapter; the YAML text is decoded into a
//! JSON value tree so both share [`super::document`].

use std::io::Write;

use super::document;
use crate::io::traits::{
    AdapterDescriptor, Capabilities, FieldMapping, FormatAdapter, FormatSpec, RawRecordStream,
    SourceDocument, StructuralIssue,
};
use crate::models::{CanonicalRecord, EntityKind};
use crate::{Error, Result};

/// YAML adapter.
pub struct YamlAdapter {
    descriptor: AdapterDescriptor,
    mapping: FieldMapping,
}

impl Default for YamlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlAdapter {
    /// Adapter id.
    pub const ID: &'static str = "yaml";

    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AdapterDescriptor {
                id: Self::ID.to_string(),
                display_name: "YAML document".to_string(),
                formats: vec![
                    FormatSpec::new("yaml", &["yaml"], "application/x-yaml"),
                    FormatSpec::new("yml", &["yml"], "application/x-yaml"),
                ],
                capabilities: Capabilities::BOTH,
                entity_kinds: EntityKind::all().to_vec(),
            },
            mapping: FieldMapping::canonical(),
        }
    }

    fn decode(source: &SourceDocument) -> std::result::Result<serde_json::Value, String> {
        let text = source.text()?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_yaml_ng::from_str(text).map_err(|e| format!("invalid YAML: {e}"))
    }
}

impl FormatAdapter for YamlAdapter {
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
        serde_yaml_ng::to_writer(out, &root).map_err(|e| Error::OperationFailed {
            operation: "write_yaml".to_string(),
            cause: e.to_string(),
        })
    }
}
