//! Conflict detection and resolution against the persisted store.

use std::collections::{HashMap, HashSet};

use crate::config::TenantDefaults;
use crate::models::{
    CanonicalRecord, Classification, Conflict, EntityKind, NaturalKey, Resolution,
    ResolutionStrategy, TenantScope, ValidationIssue,
};
use crate::storage::{PendingWrite, PersistenceGateway};
use crate::{Error, Result};

/// Resolution of one canonical record.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Classification and applied resolution.
    pub conflict: Conflict,
    /// Write to apply on commit, if any.
    pub write: Option<PendingWrite>,
    /// Issues raised while resolving.
    pub issues: Vec<ValidationIssue>,
}

/// Matches canonical records against stored ones by natural key.
///
/// Only reads from the gateway; writes are returned as [`PendingWrite`]s so a
/// dry run and a real run resolve identically. Tenant defaults fill fields the
/// resolved record still leaves blank, so a stored value always wins over a
/// default.
pub struct ConflictResolver<'g> {
    gateway: &'g dyn PersistenceGateway,
    tenant: TenantScope,
    strategy: ResolutionStrategy,
    defaults: TenantDefaults,
    batch: HashSet<(EntityKind, NaturalKey)>,
    stored_refs: HashMap<(EntityKind, NaturalKey), bool>,
}

impl<'g> ConflictResolver<'g> {
    /// Creates a resolver for one tenant.
    #[must_use]
    pub fn new(
        gateway: &'g dyn PersistenceGateway,
        tenant: TenantScope,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            gateway,
            tenant,
            strategy,
            defaults: TenantDefaults::default(),
            batch: HashSet::new(),
            stored_refs: HashMap::new(),
        }
    }

    /// Sets the tenant fallbacks for blank fields.
    #[must_use]
    pub fn with_defaults(mut self, defaults: TenantDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Declares the records of the current batch that references may point at.
    #[must_use]
    pub fn with_batch<'r>(mut self, records: impl IntoIterator<Item = &'r CanonicalRecord>) -> Self {
        self.batch = records
            .into_iter()
            .map(|r| (r.kind(), r.natural_key()))
            .collect();
        self
    }

    /// Strategy in effect.
    #[must_use]
    pub const fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Classifies and resolves one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record belongs to another tenant or a gateway
    /// lookup fails. Referential problems are issues, not errors.
    pub fn resolve(&mut self, record: &CanonicalRecord) -> Result<Resolved> {
        if record.tenant != self.tenant {
            return Err(Error::InvalidInput(format!(
                "record for tenant '{}' submitted to a session for '{}'",
                record.tenant, self.tenant
            )));
        }

        let kind = record.kind();
        let key = record.natural_key();
        let incoming = record.record_ref();

        let mut issues = Vec::new();
        for reference in record.entity.references() {
            if !self.reference_exists(reference.kind, &reference.key)? {
                issues.push(ValidationIssue::error(
                    incoming.clone(),
                    reference.field,
                    format!("references unknown {} '{}'", reference.kind, reference.key),
                ));
            }
        }
        if !issues.is_empty() {
            return Ok(Resolved {
                conflict: Conflict {
                    kind,
                    natural_key: key,
                    existing: None,
                    incoming,
                    classification: Classification::Error,
                    resolution: Resolution::Excluded,
                },
                write: None,
                issues,
            });
        }

        let Some(existing) = self.gateway.find_by_natural_key(&self.tenant, kind, &key)? else {
            return Ok(Resolved {
                conflict: Conflict {
                    kind,
                    natural_key: key,
                    existing: None,
                    incoming,
                    classification: Classification::New,
                    resolution: Resolution::Insert,
                },
                write: Some(PendingWrite::new(
                    self.tenant.clone(),
                    None,
                    self.defaults.apply(record.entity.clone()),
                )),
                issues,
            });
        };

        let overwrite = self.strategy == ResolutionStrategy::OverwriteAll;
        let resolved = self
            .defaults
            .apply(existing.entity.resolved_with(&record.entity, overwrite));
        if resolved == existing.entity {
            return Ok(Resolved {
                conflict: Conflict {
                    kind,
                    natural_key: key,
                    existing: Some(existing.id),
                    incoming,
                    classification: Classification::Unchanged,
                    resolution: Resolution::NoOp,
                },
                write: None,
                issues,
            });
        }

        let (resolution, write) = match self.strategy {
            ResolutionStrategy::OverwriteAll => (
                Resolution::Overwrite,
                Some(PendingWrite::new(self.tenant.clone(), Some(existing.id), resolved)),
            ),
            ResolutionStrategy::MergeNonNull => (
                Resolution::MergeNonNull,
                Some(PendingWrite::new(self.tenant.clone(), Some(existing.id), resolved)),
            ),
            ResolutionStrategy::SkipAndReport => {
                issues.push(ValidationIssue::warning(
                    incoming.clone(),
                    "natural_key",
                    format!("{kind} '{key}' differs from the stored record; update skipped"),
                ));
                (Resolution::Skipped, None)
            },
        };

        Ok(Resolved {
            conflict: Conflict {
                kind,
                natural_key: key,
                existing: Some(existing.id),
                incoming,
                classification: Classification::Update,
                resolution,
            },
            write,
            issues,
        })
    }

    fn reference_exists(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<bool> {
        if self.batch.contains(&(kind, key.clone())) {
            return Ok(true);
        }
        if let Some(found) = self.stored_refs.get(&(kind, key.clone())) {
            return Ok(*found);
        }
        let found = self
            .gateway
            .find_by_natural_key(&self.tenant, kind, key)?
            .is_some();
        self.stored_refs.insert((kind, key.clone()), found);
        Ok(found)
    }
}
