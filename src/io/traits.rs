//! Core traits for import/export adapters.
//!
//! Defines the [`FormatAdapter`] trait that format adapters implement, together
//! with the descriptor, field mapping and source types it works with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::models::{CanonicalRecord, EntityKind, RawRecord};
use crate::{Error, Result};

/// An in-memory source document handed to an adapter.
///
/// Adapters read it twice (structure check, then parse), so the bytes are
/// owned by the session rather than streamed from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    name: String,
    data: Vec<u8>,
}

impl SourceDocument {
    /// Wraps bytes under a display name.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Reads a whole reader into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn from_reader(name: impl Into<String>, mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::operation("read_source", e))?;
        Ok(Self::from_bytes(name, data))
    }

    /// Reads a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::OperationFailed {
            operation: "open_import_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Ok(Self::from_bytes(path.display().to_string(), data))
    }

    /// Display name (usually the file path).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the document is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lowercased extension of the name, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
    }

    /// Decodes the bytes as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns a message describing the invalid byte offset.
    pub fn text(&self) -> std::result::Result<&str, String> {
        std::str::from_utf8(&self.data)
            .map_err(|e| format!("source is not valid UTF-8 (at byte {})", e.valid_up_to()))
    }
}

/// One concrete format an adapter reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    /// Registry key (lowercase), e.g. `csv`.
    pub key: String,
    /// File extensions without the dot.
    pub extensions: Vec<String>,
    /// Mimetype written into export manifests.
    pub mime_type: String,
}

impl FormatSpec {
    /// Creates a format spec.
    #[must_use]
    pub fn new(key: &str, extensions: &[&str], mime_type: &str) -> Self {
        Self {
            key: key.to_lowercase(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            mime_type: mime_type.to_string(),
        }
    }

    /// Primary extension (falls back to the key).
    #[must_use]
    pub fn primary_extension(&self) -> &str {
        self.extensions.first().map_or(self.key.as_str(), String::as_str)
    }
}

/// What an adapter can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Adapter can parse sources.
    pub can_import: bool,
    /// Adapter can serialize records.
    pub can_export: bool,
}

impl Capabilities {
    /// Import and export.
    pub const BOTH: Self = Self {
        can_import: true,
        can_export: true,
    };
    /// Import only.
    pub const IMPORT_ONLY: Self = Self {
        can_import: true,
        can_export: false,
    };
    /// Export only.
    pub const EXPORT_ONLY: Self = Self {
        can_import: false,
        can_export: true,
    };
}

/// Static description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Stable adapter id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Formats handled by the adapter.
    pub formats: Vec<FormatSpec>,
    /// Import/export capabilities.
    pub capabilities: Capabilities,
    /// Entity kinds the adapter can carry.
    pub entity_kinds: Vec<EntityKind>,
}

impl AdapterDescriptor {
    /// Looks up one of the adapter's formats by key.
    #[must_use]
    pub fn format(&self, key: &str) -> Option<&FormatSpec> {
        let key = key.trim().to_lowercase();
        self.formats.iter().find(|f| f.key == key)
    }

    /// Whether the adapter carries `kind`.
    #[must_use]
    pub fn supports_kind(&self, kind: EntityKind) -> bool {
        self.entity_kinds.contains(&kind)
    }
}

/// Maps source column names onto canonical field names.
///
/// Matching ignores case and treats spaces and dashes as underscores, so
/// `Course Number`, `course-number` and `course_number` are the same column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    aliases: HashMap<String, &'static str>,
}

impl FieldMapping {
    /// Maps every canonical field of every kind onto itself.
    #[must_use]
    pub fn canonical() -> Self {
        let mut mapping = Self::default();
        for kind in EntityKind::all() {
            for field in kind.fields() {
                mapping.aliases.insert(field.name.to_string(), field.name);
            }
        }
        mapping
    }

    /// Adds an alias.
    #[must_use]
    pub fn with_alias(mut self, alias: &str, canonical: &'static str) -> Self {
        self.aliases.insert(Self::normalize_column(alias), canonical);
        self
    }

    /// Normalizes a column name for lookup.
    #[must_use]
    pub fn normalize_column(column: &str) -> String {
        column
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect()
    }

    /// Resolves a source column to a canonical field.
    #[must_use]
    pub fn resolve(&self, column: &str) -> Option<&'static str> {
        self.aliases.get(&Self::normalize_column(column)).copied()
    }

    /// Whether some column maps onto `canonical`.
    #[must_use]
    pub fn covers(&self, canonical: &str) -> bool {
        self.aliases.values().any(|c| *c == canonical)
    }

    /// Required fields of `kind` that no column maps onto.
    #[must_use]
    pub fn missing_required(&self, kind: EntityKind) -> Vec<&'static str> {
        kind.required_fields().filter(|f| !self.covers(f)).collect()
    }
}

/// A structural problem found before row-level parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralIssue {
    /// Where in the document (column, section, line), if known.
    pub location: Option<String>,
    /// What is wrong.
    pub message: String,
}

impl StructuralIssue {
    /// Creates an issue without location.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            location: None,
            message: message.into(),
        }
    }

    /// Creates an issue at a location.
    #[must_use]
    pub fn at(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Lazy, finite, non-restartable stream of raw records.
///
/// An `Err` item is a structural failure discovered mid-stream.
pub type RawRecordStream<'a> = Box<dyn Iterator<Item = Result<RawRecord>> + 'a>;

/// A per-format parse/validate/serialize capability.
///
/// Adapters are stateless: they only read the source they are given and are
/// shared across sessions as `Arc<dyn FormatAdapter>`.
///
/// # Example Implementation
///
/// ```rust,ignore
/// impl FormatAdapter for NdjsonAdapter {
///     fn parse<'a>(&'a self, source: &'a SourceDocument, _format: &str) -> Result<RawRecordStream<'a>> {
///         Ok(Box::new(source.bytes().split(|b| *b == b'\n').enumerate().map(...)))
///     }
///     // ...
/// }
/// ```
pub trait FormatAdapter: Send + Sync {
    /// Static descriptor.
    fn descriptor(&self) -> &AdapterDescriptor;

    /// Column aliases used by the normalizer.
    fn field_mapping(&self) -> &FieldMapping;

    /// Checks document structure before any row is parsed.
    ///
    /// An empty result means the source is structurally sound.
    fn validate_structure(&self, source: &SourceDocument, format: &str) -> Vec<StructuralIssue>;

    /// Opens a lazy stream of raw records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the stream cannot be opened.
    fn parse<'a>(&'a self, source: &'a SourceDocument, format: &str)
    -> Result<RawRecordStream<'a>>;

    /// Writes records in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    fn serialize(
        &self,
        records: &[CanonicalRecord],
        format: &str,
        out: &mut dyn Write,
    ) -> Result<()>;
}
