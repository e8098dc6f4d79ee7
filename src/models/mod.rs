//! Data models for curricula.
//!
//! This module contains the core data structures: tenant scopes, the tagged
//! canonical entities, raw and stored record forms, validation issues, and the
//! report/manifest types produced by sessions.

mod entity;
mod issue;
mod record;
mod report;
mod tenant;

pub use entity::{
    Course, Entity, EntityKind, FieldSpec, Instructor, KEY_SEPARATOR, NaturalKey, Outcome,
    Reference, Section,
};
pub use issue::{Severity, ValidationIssue};
pub use record::{
    CanonicalRecord, RawRecord, RecordId, RecordRef, SectionEntry, SourcePosition, StoredRecord,
};
pub use report::{
    Classification, Conflict, EntitySelector, ExportManifest, ImportReport, OutcomeCounts,
    Resolution, ResolutionStrategy, SessionState,
};
pub use tenant::{StaticTenantContext, TenantContext, TenantScope};
