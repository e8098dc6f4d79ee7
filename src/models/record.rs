//! Raw, canonical and stored record representations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::entity::{Entity, EntityKind, NaturalKey};
use super::tenant::TenantScope;

/// Where a raw record came from in its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based ordinal of the record in source order.
    pub ordinal: usize,
    /// 1-based line in the source, when the format tracks lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    /// Section entry, when the format is a sectioned document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<SectionEntry>,
}

/// A 0-based entry inside one section of a document, shown as `courses[2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionEntry {
    /// Kind the section holds.
    pub kind: EntityKind,
    /// Index within the section.
    pub index: usize,
}

impl fmt::Display for SectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind.plural(), self.index)
    }
}

impl SourcePosition {
    /// Creates a position without line information.
    #[must_use]
    pub const fn ordinal(ordinal: usize) -> Self {
        Self {
            ordinal,
            line: None,
            entry: None,
        }
    }

    /// Attaches a source line.
    #[must_use]
    pub const fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    /// Attaches a section entry.
    #[must_use]
    pub const fn in_section(mut self, kind: EntityKind, index: usize) -> Self {
        self.entry = Some(SectionEntry { kind, index });
        self
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.entry) {
            (Some(line), _) => write!(f, "record {} (line {line})", self.ordinal),
            (None, Some(entry)) => write!(f, "record {} ({entry})", self.ordinal),
            (None, None) => write!(f, "record {}", self.ordinal),
        }
    }
}

/// An adapter-produced row before normalization.
///
/// Values are keyed by the source's own column names; the normalizer maps them
/// onto canonical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Position for error attribution.
    pub position: SourcePosition,
    /// Kind hint supplied by the adapter (column value or document section).
    pub kind_hint: Option<String>,
    /// Source column name to raw value.
    pub values: BTreeMap<String, String>,
}

impl RawRecord {
    /// Creates an empty raw record.
    #[must_use]
    pub const fn new(position: SourcePosition) -> Self {
        Self {
            position,
            kind_hint: None,
            values: BTreeMap::new(),
        }
    }

    /// Sets the kind hint.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind_hint = Some(kind.into());
        self
    }

    /// Adds a column value.
    #[must_use]
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }
}

/// A normalized, tenant-scoped entity ready for conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    /// Tenant the record belongs to.
    pub tenant: TenantScope,
    /// Source position of the raw record it came from.
    pub position: SourcePosition,
    /// The typed entity.
    pub entity: Entity,
}

impl CanonicalRecord {
    /// Returns the entity kind.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.entity.kind()
    }

    /// Returns the natural key.
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        self.entity.natural_key()
    }

    /// Reference used in issues and conflicts.
    #[must_use]
    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            position: self.position,
            kind: Some(self.kind()),
            natural_key: Some(self.natural_key()),
        }
    }
}

/// Surrogate identifier of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generates a new time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A record as held by the persistence gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Surrogate id.
    pub id: RecordId,
    /// Owning tenant.
    pub tenant: TenantScope,
    /// Entity payload.
    pub entity: Entity,
    /// Last write time (Unix seconds).
    pub updated_at: u64,
}

impl StoredRecord {
    /// Returns the natural key.
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        self.entity.natural_key()
    }

    /// Converts to a canonical record for serialization.
    #[must_use]
    pub fn to_canonical(&self, ordinal: usize) -> CanonicalRecord {
        CanonicalRecord {
            tenant: self.tenant.clone(),
            position: SourcePosition::ordinal(ordinal),
            entity: self.entity.clone(),
        }
    }
}

/// Points an issue or conflict at its originating raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Position of the raw record.
    pub position: SourcePosition,
    /// Kind, if it could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    /// Natural key, if it could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<NaturalKey>,
}

impl RecordRef {
    /// Reference to a raw record whose kind and key are unknown.
    #[must_use]
    pub const fn at(position: SourcePosition) -> Self {
        Self {
            position,
            kind: None,
            natural_key: None,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position)?;
        if let Some(kind) = self.kind {
            write!(f, " [{kind}")?;
            if let Some(key) = &self.natural_key {
                write!(f, " {key}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::Instructor;

    #[test]
    fn test_position_display() {
        assert_eq!(SourcePosition::ordinal(3).to_string(), "record 3");
        assert_eq!(
            SourcePosition::ordinal(3).at_line(4).to_string(),
            "record 3 (line 4)"
        );
        assert_eq!(
            SourcePosition::ordinal(5)
                .in_section(EntityKind::Section, 1)
                .to_string(),
            "record 5 (sections[1])"
        );
    }

    #[test]
    fn test_record_ref_display() {
        let record = CanonicalRecord {
            tenant: TenantScope::institution("acme"),
            position: SourcePosition::ordinal(2),
            entity: Entity::Instructor(Instructor {
                employee_id: "e1".to_string(),
                full_name: None,
                email: None,
                department: None,
            }),
        };
        assert_eq!(record.record_ref().to_string(), "record 2 [instructor e1]");
    }

    #[test]
    fn test_record_ids_are_unique() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
