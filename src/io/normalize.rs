//! Record normalization.
//!
//! Maps adapter-produced [`RawRecord`]s onto typed, tenant-scoped
//! [`CanonicalRecord`]s, applying row-level validation.
//!
//! # Rules
//!
//! - Identifier fields are trimmed and case-folded, and may not contain `|`
//! - Blank fields stay blank; tenant defaults are applied at resolution, once
//!   the stored record is known
//! - `credit_hours` must be a number in `0..=30`
//! - `capacity` must be a non-negative whole number
//! - `email`, when present, must contain `@`
//! - Unknown columns are reported once per session, not once per row

use std::collections::{BTreeMap, HashMap, HashSet};

use super::traits::FieldMapping;
use crate::models::{
    CanonicalRecord, Course, Entity, EntityKind, Instructor, KEY_SEPARATOR, NaturalKey, Outcome,
    RawRecord, RecordRef, Section, SourcePosition, TenantScope, ValidationIssue,
};

/// Upper bound for credit hours.
pub const MAX_CREDIT_HOURS: f64 = 30.0;

/// What normalization made of one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A valid canonical record (it may still carry warnings).
    Accepted(CanonicalRecord),
    /// The kind was known but the row failed validation.
    Excluded(EntityKind),
    /// The kind could not be determined.
    Rejected,
}

/// A normalization outcome plus the issues it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    /// The outcome.
    pub outcome: Normalized,
    /// Issues for this row, in the order found.
    pub issues: Vec<ValidationIssue>,
}

impl Normalization {
    /// Whether any issue is error-severity.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }
}

/// A record displaced by a later record with the same natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct Superseded {
    /// The displaced record.
    pub record: CanonicalRecord,
    /// Position of the record that displaced it.
    pub by: SourcePosition,
}

impl Superseded {
    /// Warning issue naming the superseding row.
    #[must_use]
    pub fn issue(&self) -> ValidationIssue {
        ValidationIssue::warning(
            self.record.record_ref(),
            "natural_key",
            format!(
                "duplicate {} '{}' superseded by {}",
                self.record.kind(),
                self.record.natural_key(),
                self.by
            ),
        )
    }
}

/// Normalizes raw records for one session.
///
/// Holds per-session state (which unknown columns were already reported), so
/// a fresh normalizer is built for every session.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    tenant: TenantScope,
    mapping: FieldMapping,
    kinds: Vec<EntityKind>,
    warned_columns: HashSet<String>,
}

impl RecordNormalizer {
    /// Creates a normalizer for `tenant` using an adapter's field mapping.
    #[must_use]
    pub fn new(tenant: TenantScope, mapping: FieldMapping) -> Self {
        Self {
            tenant,
            mapping,
            kinds: EntityKind::all().to_vec(),
            warned_columns: HashSet::new(),
        }
    }

    /// Restricts accepted kinds to those the adapter declares.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[EntityKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Tenant the normalizer stamps onto records.
    #[must_use]
    pub const fn tenant(&self) -> &TenantScope {
        &self.tenant
    }

    /// Normalizes one raw record.
    pub fn normalize(&mut self, raw: RawRecord) -> Normalization {
        let position = raw.position;
        let mut issues = Vec::new();

        let kind = match raw.kind_hint.as_deref().map(str::trim) {
            None | Some("") => {
                issues.push(ValidationIssue::error(
                    RecordRef::at(position),
                    "kind",
                    "record kind is missing",
                ));
                None
            },
            Some(hint) => {
                let kind = EntityKind::parse(hint);
                if kind.is_none() {
                    issues.push(ValidationIssue::error(
                        RecordRef::at(position),
                        "kind",
                        format!("unknown record kind '{hint}'"),
                    ));
                }
                kind
            },
        };
        let Some(kind) = kind else {
            return Normalization {
                outcome: Normalized::Rejected,
                issues,
            };
        };

        let record_ref = RecordRef {
            position,
            kind: Some(kind),
            natural_key: None,
        };

        if !self.kinds.contains(&kind) {
            issues.push(ValidationIssue::error(
                record_ref,
                "kind",
                format!("{kind} records are not supported by this adapter"),
            ));
            return Normalization {
                outcome: Normalized::Excluded(kind),
                issues,
            };
        }

        let fields = self.map_columns(&raw.values, kind, &record_ref, &mut issues);
        let mut row = Row {
            fields,
            record_ref,
            issues,
        };
        let entity = match kind {
            EntityKind::Course => Self::course(&mut row),
            EntityKind::Instructor => Self::instructor(&mut row),
            EntityKind::Section => Self::section(&mut row),
            EntityKind::Outcome => Self::outcome(&mut row),
        };

        let outcome = match entity {
            Some(entity) if !row.issues.iter().any(ValidationIssue::is_error) => {
                Normalized::Accepted(CanonicalRecord {
                    tenant: self.tenant.clone(),
                    position,
                    entity,
                })
            },
            _ => Normalized::Excluded(kind),
        };

        Normalization {
            outcome,
            issues: row.issues,
        }
    }

    /// Maps source columns onto canonical fields of `kind`.
    fn map_columns(
        &mut self,
        values: &BTreeMap<String, String>,
        kind: EntityKind,
        record_ref: &RecordRef,
        issues: &mut Vec<ValidationIssue>,
    ) -> HashMap<&'static str, String> {
        let mut fields: HashMap<&'static str, String> = HashMap::new();
        for (column, value) in values {
            let value = value.trim();
            let Some(field) = self.mapping.resolve(column) else {
                let normalized = FieldMapping::normalize_column(column);
                if self.warned_columns.insert(normalized) {
                    issues.push(ValidationIssue::warning(
                        record_ref.clone(),
                        column.clone(),
                        format!("unknown column '{column}' ignored"),
                    ));
                }
                continue;
            };

            if !kind.fields().iter().any(|f| f.name == field) {
                if !value.is_empty() {
                    issues.push(ValidationIssue::warning(
                        record_ref.clone(),
                        field,
                        format!("field does not apply to {kind} records; value ignored"),
                    ));
                }
                continue;
            }

            if !value.is_empty() || !fields.contains_key(field) {
                fields.insert(field, value.to_string());
            }
        }
        fields
    }

    fn course(row: &mut Row) -> Option<Entity> {
        let course_number = row.identifier("course_number");
        let credit_hours = row.credit_hours();
        Some(Entity::Course(Course {
            course_number: course_number?,
            title: row.text("title"),
            description: row.text("description"),
            credit_hours,
            department: row.text("department"),
        }))
    }

    fn instructor(row: &mut Row) -> Option<Entity> {
        let employee_id = row.identifier("employee_id");
        let email = row.email();
        Some(Entity::Instructor(Instructor {
            employee_id: employee_id?,
            full_name: row.text("full_name"),
            email,
            department: row.text("department"),
        }))
    }

    fn section(row: &mut Row) -> Option<Entity> {
        let course_number = row.identifier("course_number");
        let term = row.identifier("term");
        let section_code = row.identifier("section_code");
        let instructor_id = row.optional_identifier("instructor_id");
        let capacity = row.capacity();
        let modality = row.text("modality");
        Some(Entity::Section(Section {
            course_number: course_number?,
            term: term?,
            section_code: section_code?,
            instructor_id,
            capacity,
            modality,
        }))
    }

    fn outcome(row: &mut Row) -> Option<Entity> {
        let course_number = row.identifier("course_number");
        let outcome_code = row.identifier("outcome_code");
        Some(Entity::Outcome(Outcome {
            course_number: course_number?,
            outcome_code: outcome_code?,
            description: row.text("description"),
            level: row.text("level"),
        }))
    }
}

/// One row's mapped fields while it is being typed.
struct Row {
    fields: HashMap<&'static str, String>,
    record_ref: RecordRef,
    issues: Vec<ValidationIssue>,
}

impl Row {
    fn raw(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.issues
            .push(ValidationIssue::error(self.record_ref.clone(), field, message));
    }

    fn text(&self, field: &str) -> Option<String> {
        self.raw(field).map(String::from)
    }

    /// A required identifier, folded.
    fn identifier(&mut self, field: &'static str) -> Option<String> {
        if self.raw(field).is_none() {
            self.error(field, "required field is missing");
            return None;
        }
        self.optional_identifier(field)
    }

    fn optional_identifier(&mut self, field: &'static str) -> Option<String> {
        let folded = NaturalKey::fold(self.raw(field)?);
        if folded.contains(KEY_SEPARATOR) {
            self.error(
                field,
                format!("identifier '{folded}' must not contain '{KEY_SEPARATOR}'"),
            );
            return None;
        }
        Some(folded)
    }

    fn credit_hours(&mut self) -> Option<f64> {
        let raw = self.raw("credit_hours")?.to_string();
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && (0.0..=MAX_CREDIT_HOURS).contains(&value) => {
                Some(value)
            },
            Ok(_) => {
                self.error(
                    "credit_hours",
                    format!("credit hours '{raw}' out of range 0-{MAX_CREDIT_HOURS}"),
                );
                None
            },
            Err(_) => {
                self.error("credit_hours", format!("credit hours '{raw}' is not a number"));
                None
            },
        }
    }

    fn capacity(&mut self) -> Option<u32> {
        let raw = self.raw("capacity")?.to_string();
        match raw.parse::<u32>() {
            Ok(value) => Some(value),
            Err(_) => {
                self.error(
                    "capacity",
                    format!("capacity '{raw}' is not a non-negative whole number"),
                );
                None
            },
        }
    }

    fn email(&mut self) -> Option<String> {
        let email = self.text("email")?;
        if email.contains('@') {
            Some(email)
        } else {
            self.error("email", format!("malformed email '{email}'"));
            None
        }
    }
}

/// Splits a batch into survivors and records superseded by a later record with
/// the same kind and natural key. Both lists keep source order, and every
/// superseded record points at the surviving one.
#[must_use]
pub fn dedupe(records: Vec<CanonicalRecord>) -> (Vec<CanonicalRecord>, Vec<Superseded>) {
    let mut later: HashMap<(EntityKind, NaturalKey), SourcePosition> = HashMap::new();
    let mut survivors = Vec::with_capacity(records.len());
    let mut superseded = Vec::new();

    for record in records.into_iter().rev() {
        let key = (record.kind(), record.natural_key());
        if let Some(&by) = later.get(&key) {
            superseded.push(Superseded { record, by });
        } else {
            later.insert(key, record.position);
            survivors.push(record);
        }
    }

    survivors.reverse();
    superseded.reverse();
    (survivors, superseded)
}
