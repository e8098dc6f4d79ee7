//! Export session.
//!
//! Queries tenant-scoped records matching an [`EntitySelector`] and hands them
//! to the adapter's serializer. Mimetype and extension always come from the
//! adapter's declared format, so the output re-imports through the same
//! adapter.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tracing::instrument;

use crate::io::registry::AdapterRegistry;
use crate::models::{CanonicalRecord, EntitySelector, ExportManifest, TenantScope};
use crate::observability::record_export_session;
use crate::storage::PersistenceGateway;
use crate::{Error, Result};

/// One export run.
pub struct ExportSession<'e> {
    registry: &'e AdapterRegistry,
    gateway: &'e dyn PersistenceGateway,
}

impl<'e> ExportSession<'e> {
    /// Creates an export session.
    #[must_use]
    pub fn new(registry: &'e AdapterRegistry, gateway: &'e dyn PersistenceGateway) -> Self {
        Self { registry, gateway }
    }

    /// Exports into a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterNotFound`] or [`Error::Unsupported`] before any
    /// query runs, or an error if serialization fails. A failed per-kind query
    /// does not fail the export; it marks the manifest incomplete.
    pub fn run(
        &self,
        selector: &EntitySelector,
        format: &str,
        tenant: &TenantScope,
    ) -> Result<(Vec<u8>, ExportManifest)> {
        let mut buffer = Vec::new();
        let manifest = self.run_to_writer(selector, format, tenant, &mut buffer)?;
        Ok((buffer, manifest))
    }

    /// Exports to a file, taking the format from its extension unless given.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`], plus file creation failures.
    pub fn run_to_file(
        &self,
        selector: &EntitySelector,
        path: &Path,
        format: Option<&str>,
        tenant: &TenantScope,
    ) -> Result<ExportManifest> {
        let format = match format {
            Some(format) => format.to_string(),
            None => self.registry.format_for_path(path)?,
        };
        let file = std::fs::File::create(path).map_err(|e| Error::OperationFailed {
            operation: "create_export_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut writer = std::io::BufWriter::new(file);
        let manifest = self.run_to_writer(selector, &format, tenant, &mut writer)?;
        writer
            .flush()
            .map_err(|e| Error::operation("flush_export_file", e))?;
        Ok(manifest)
    }

    /// Exports into a caller-supplied writer.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    #[instrument(
        name = "curricula.export",
        skip_all,
        fields(tenant = %tenant, format = %format, selector = %selector)
    )]
    pub fn run_to_writer(
        &self,
        selector: &EntitySelector,
        format: &str,
        tenant: &TenantScope,
        out: &mut dyn Write,
    ) -> Result<ExportManifest> {
        tenant.validate()?;
        let format = format.trim().to_lowercase();
        let adapter = self.registry.resolve(&format)?;
        let descriptor = adapter.descriptor();
        if !descriptor.capabilities.can_export {
            return Err(Error::Unsupported {
                adapter: descriptor.id.clone(),
                operation: "export",
            });
        }
        let spec = descriptor
            .format(&format)
            .ok_or_else(|| Error::AdapterNotFound(format.clone()))?;

        let start = Instant::now();
        let mut records: Vec<CanonicalRecord> = Vec::new();
        let mut counts = BTreeMap::new();
        let mut failures = Vec::new();

        for kind in selector.selected_kinds() {
            if !descriptor.supports_kind(kind) {
                failures.push(format!("{kind}: not supported by adapter '{}'", descriptor.id));
                continue;
            }
            match self.gateway.query(tenant, kind, selector) {
                Ok(stored) => {
                    counts.insert(kind, stored.len());
                    let offset = records.len();
                    records.extend(
                        stored
                            .iter()
                            .enumerate()
                            .map(|(i, record)| record.to_canonical(offset + i + 1)),
                    );
                },
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "Export query failed");
                    failures.push(format!("{kind}: {e}"));
                },
            }
        }

        adapter.serialize(&records, &format, out)?;

        let manifest = ExportManifest {
            selector: selector.clone(),
            adapter_id: descriptor.id.clone(),
            format: spec.key.clone(),
            mime_type: spec.mime_type.clone(),
            extension: spec.primary_extension().to_string(),
            record_count: records.len(),
            counts,
            complete: failures.is_empty(),
            failures,
            tenant: tenant.clone(),
        };
        record_export_session(&manifest);
        tracing::info!(
            records = manifest.record_count,
            complete = manifest.complete,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Export finished"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Course, Entity, EntityKind, Instructor};
    use crate::storage::MemoryGateway;

    fn seeded() -> MemoryGateway {
        let gateway = MemoryGateway::new();
        let tenant = TenantScope::institution("state-u");
        for number in ["bio101", "chem101"] {
            gateway.seed(
                &tenant,
                Entity::Course(Course {
                    course_number: number.to_string(),
                    title: Some(number.to_uppercase()),
                    description: None,
                    credit_hours: Some(3.0),
                    department: None,
                }),
            );
        }
        gateway.seed(
            &tenant,
            Entity::Instructor(Instructor {
                employee_id: "e1".to_string(),
                full_name: Some("Ada".to_string()),
                email: None,
                department: None,
            }),
        );
        gateway
    }

    #[test]
    fn test_manifest_uses_adapter_format() {
        let registry = AdapterRegistry::with_defaults().unwrap();
        let gateway = seeded();
        let session = ExportSession::new(&registry, &gateway);
        let (bytes, manifest) = session
            .run(&EntitySelector::all(), "TSV", &TenantScope::institution("state-u"))
            .unwrap();

        assert_eq!(manifest.format, "tsv");
        assert_eq!(manifest.extension, "tsv");
        assert_eq!(manifest.mime_type, "text/tab-separated-values");
        assert_eq!(manifest.record_count, 3);
        assert_eq!(manifest.counts.get(&EntityKind::Course), Some(&2));
        assert!(manifest.complete);
        assert!(String::from_utf8(bytes).unwrap().contains("bio101"));
    }

    #[test]
    fn test_failed_kind_marks_manifest_incomplete() {
        let registry = AdapterRegistry::with_defaults().unwrap();
        let gateway = seeded();
        gateway.fail_query_for(EntityKind::Instructor);
        let (_, manifest) = ExportSession::new(&registry, &gateway)
            .run(&EntitySelector::all(), "json", &TenantScope::institution("state-u"))
            .unwrap();
        assert!(!manifest.complete);
        assert_eq!(manifest.failures.len(), 1);
        assert!(manifest.failures[0].starts_with("instructor"));
        assert_eq!(manifest.record_count, 2);
    }

    #[test]
    fn test_unknown_format_fails_before_query() {
        let registry = AdapterRegistry::with_defaults().unwrap();
        let gateway = seeded();
        gateway.fail_query_for(EntityKind::Course);
        let err = ExportSession::new(&registry, &gateway)
            .run(&EntitySelector::all(), "xlsx", &TenantScope::institution("state-u"))
            .unwrap_err();
        assert!(matches!(err, Error::AdapterNotFound(_)));
    }

    #[test]
    fn test_other_tenant_sees_nothing() {
        let registry = AdapterRegistry::with_defaults().unwrap();
        let gateway = seeded();
        let (_, manifest) = ExportSession::new(&registry, &gateway)
            .run(&EntitySelector::all(), "csv", &TenantScope::institution("other"))
            .unwrap();
        assert_eq!(manifest.record_count, 0);
        assert!(manifest.complete);
    }

    #[test]
    fn test_run_to_file_detects_format() {
        let registry = AdapterRegistry::with_defaults().unwrap();
        let gateway = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yml");
        let manifest = ExportSession::new(&registry, &gateway)
            .run_to_file(
                &EntitySelector::kinds([EntityKind::Course]),
                &path,
                None,
                &TenantScope::institution("state-u"),
            )
            .unwrap();
        assert_eq!(manifest.format, "yml");
        assert_eq!(manifest.record_count, 2);
        assert!(std::fs::read_to_string(&path).unwrap().contains("courses"));
    }
}
