//! Adapter registry.
//!
//! An explicit [`AdapterRegistry`] instance is handed to sessions; there is no
//! process-wide registry. Capability checks run once, at registration, so row
//! processing never has to ask whether an adapter can carry a field.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::traits::{
    AdapterDescriptor, FieldMapping, FormatAdapter, RawRecordStream, SourceDocument,
    StructuralIssue,
};
use crate::models::CanonicalRecord;
use crate::{Error, Result};

/// Resolves adapters by format key.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    by_format: BTreeMap<String, Arc<dyn FormatAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("formats", &self.by_format.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in CSV, JSON and YAML adapters.
    ///
    /// # Errors
    ///
    /// Returns an error only if a built-in adapter fails validation.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        for adapter in super::formats::default_adapters() {
            registry.register(adapter)?;
        }
        Ok(registry)
    }

    /// Registers an adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterConflict`] if any of its format keys is taken, or
    /// [`Error::InvalidAdapter`] if it fails capability validation.
    pub fn register(&mut self, adapter: Arc<dyn FormatAdapter>) -> Result<()> {
        self.insert(adapter, false)
    }

    /// Registers an adapter, replacing any adapter holding the same keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAdapter`] if it fails capability validation.
    pub fn register_with_override(&mut self, adapter: Arc<dyn FormatAdapter>) -> Result<()> {
        self.insert(adapter, true)
    }

    /// Builds and registers a closure-backed adapter.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub fn register_plugin<P, V, S>(
        &mut self,
        descriptor: AdapterDescriptor,
        mapping: FieldMapping,
        parse_fn: P,
        validate_fn: V,
        serialize_fn: S,
    ) -> Result<()>
    where
        P: for<'a> Fn(&'a SourceDocument, &str) -> Result<RawRecordStream<'a>>
            + Send
            + Sync
            + 'static,
        V: Fn(&SourceDocument, &str) -> Vec<StructuralIssue> + Send + Sync + 'static,
        S: Fn(&[CanonicalRecord], &str, &mut dyn Write) -> Result<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(PluginAdapter {
            descriptor,
            mapping,
            parse_fn: Box::new(parse_fn),
            validate_fn: Box::new(validate_fn),
            serialize_fn: Box::new(serialize_fn),
        }))
    }

    /// Resolves an adapter by format key (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterNotFound`] if no adapter owns the key.
    pub fn resolve(&self, format: &str) -> Result<Arc<dyn FormatAdapter>> {
        let key = format.trim().to_lowercase();
        self.by_format
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::AdapterNotFound(format.to_string()))
    }

    /// Resolves a format key from a file extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterNotFound`] if no format claims the extension.
    pub fn format_for_path(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                Error::AdapterNotFound(format!("{} (no file extension)", path.display()))
            })?;

        self.by_format
            .iter()
            .find_map(|(key, adapter)| {
                adapter
                    .descriptor()
                    .format(key)
                    .filter(|spec| spec.extensions.iter().any(|e| *e == ext))
                    .map(|_| key.clone())
            })
            .ok_or_else(|| Error::AdapterNotFound(format!(".{ext}")))
    }

    /// Resolves an adapter from a file extension, returning the matched key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterNotFound`] if no format claims the extension.
    pub fn resolve_for_path(&self, path: &Path) -> Result<(String, Arc<dyn FormatAdapter>)> {
        let key = self.format_for_path(path)?;
        let adapter = self.resolve(&key)?;
        Ok((key, adapter))
    }

    /// Registered format keys.
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.by_format.keys().map(String::as_str)
    }

    /// Distinct registered adapter descriptors, ordered by id.
    #[must_use]
    pub fn descriptors(&self) -> Vec<AdapterDescriptor> {
        let mut by_id: BTreeMap<String, AdapterDescriptor> = BTreeMap::new();
        for adapter in self.by_format.values() {
            let descriptor = adapter.descriptor();
            by_id
                .entry(descriptor.id.clone())
                .or_insert_with(|| descriptor.clone());
        }
        by_id.into_values().collect()
    }

    fn insert(&mut self, adapter: Arc<dyn FormatAdapter>, allow_override: bool) -> Result<()> {
        validate_adapter(adapter.as_ref())?;
        let descriptor = adapter.descriptor();

        if !allow_override {
            for spec in &descriptor.formats {
                if let Some(existing) = self.by_format.get(&spec.key) {
                    return Err(Error::AdapterConflict {
                        format: spec.key.clone(),
                        existing: existing.descriptor().id.clone(),
                    });
                }
            }
        }

        for spec in &descriptor.formats {
            if let Some(previous) = self.by_format.insert(spec.key.clone(), Arc::clone(&adapter)) {
                tracing::info!(
                    format = %spec.key,
                    previous = %previous.descriptor().id,
                    adapter = %descriptor.id,
                    "Adapter registration overridden"
                );
            }
        }
        tracing::debug!(adapter = %descriptor.id, formats = descriptor.formats.len(), "Registered adapter");
        Ok(())
    }
}

/// Registration-time capability validation.
fn validate_adapter(adapter: &dyn FormatAdapter) -> Result<()> {
    let descriptor = adapter.descriptor();
    let invalid = |reason: String| Error::InvalidAdapter {
        adapter: descriptor.id.clone(),
        reason,
    };

    if descriptor.id.trim().is_empty() {
        return Err(invalid("adapter id is empty".to_string()));
    }
    if descriptor.formats.is_empty() {
        return Err(invalid("declares no formats".to_string()));
    }
    if let Some(spec) = descriptor.formats.iter().find(|f| f.key.trim().is_empty()) {
        return Err(invalid(format!("format with mimetype '{}' has an empty key", spec.mime_type)));
    }
    if !descriptor.capabilities.can_import && !descriptor.capabilities.can_export {
        return Err(invalid("declares neither import nor export".to_string()));
    }
    if descriptor.entity_kinds.is_empty() {
        return Err(invalid("declares no entity kinds".to_string()));
    }

    let mapping = adapter.field_mapping();
    for kind in &descriptor.entity_kinds {
        let missing = mapping.missing_required(*kind);
        if !missing.is_empty() {
            return Err(invalid(format!(
                "field mapping does not cover required {kind} fields: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

type ParseFn = Box<dyn for<'a> Fn(&'a SourceDocument, &str) -> Result<RawRecordStream<'a>> + Send + Sync>;
type ValidateFn = Box<dyn Fn(&SourceDocument, &str) -> Vec<StructuralIssue> + Send + Sync>;
type SerializeFn = Box<dyn Fn(&[CanonicalRecord], &str, &mut dyn Write) -> Result<()> + Send + Sync>;

/// Adapter assembled from plugin closures.
struct PluginAdapter {
    descriptor: AdapterDescriptor,
    mapping: FieldMapping,
    parse_fn: ParseFn,
    validate_fn: ValidateFn,
    serialize_fn: SerializeFn,
}

impl FormatAdapter for PluginAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn validate_structure(&self, source: &SourceDocument, format: &str) -> Vec<StructuralIssue> {
        (self.validate_fn)(source, format)
    }

    fn parse<'a>(
        &'a self,
        source: &'a SourceDocument,
        format: &str,
    ) -> Result<RawRecordStream<'a>> {
        (self.parse_fn)(source, format)
    }

    fn serialize(
        &self,
        records: &[CanonicalRecord],
        format: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        (self.serialize_fn)(records, format, out)
    }
}
