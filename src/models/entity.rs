//! Canonical entity types.
//!
//! Each entity kind is a typed struct; [`Entity`] tags them. Identifier fields
//! are stored in their folded natural-key form so that comparisons against
//! persisted records never depend on source casing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Separator between natural-key components.
pub const KEY_SEPARATOR: char = '|';

/// The four record kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A catalog course.
    Course,
    /// A teaching staff member.
    Instructor,
    /// A scheduled offering of a course in a term.
    Section,
    /// A learning outcome attached to a course.
    Outcome,
}

/// A canonical field of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical field name.
    pub name: &'static str,
    /// Whether normalization rejects the row when this field is blank.
    pub required: bool,
}

const fn required(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
    }
}

const COURSE_FIELDS: &[FieldSpec] = &[
    required("course_number"),
    optional("title"),
    optional("description"),
    optional("credit_hours"),
    optional("department"),
];

const INSTRUCTOR_FIELDS: &[FieldSpec] = &[
    required("employee_id"),
    optional("full_name"),
    optional("email"),
    optional("department"),
];

const SECTION_FIELDS: &[FieldSpec] = &[
    required("course_number"),
    required("term"),
    required("section_code"),
    optional("instructor_id"),
    optional("capacity"),
    optional("modality"),
];

const OUTCOME_FIELDS: &[FieldSpec] = &[
    required("course_number"),
    required("outcome_code"),
    optional("description"),
    optional("level"),
];

impl EntityKind {
    /// All kinds, in dependency order (referenced kinds first).
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Course, Self::Instructor, Self::Section, Self::Outcome]
    }

    /// Singular name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Instructor => "instructor",
            Self::Section => "section",
            Self::Outcome => "outcome",
        }
    }

    /// Plural name, used as a document section key.
    #[must_use]
    pub const fn plural(&self) -> &'static str {
        match self {
            Self::Course => "courses",
            Self::Instructor => "instructors",
            Self::Section => "sections",
            Self::Outcome => "outcomes",
        }
    }

    /// Canonical fields in serialization order.
    #[must_use]
    pub const fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Course => COURSE_FIELDS,
            Self::Instructor => INSTRUCTOR_FIELDS,
            Self::Section => SECTION_FIELDS,
            Self::Outcome => OUTCOME_FIELDS,
        }
    }

    /// Names of the required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields().iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Parses a kind name, accepting singular, plural and a few aliases.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "course" | "courses" | "catalog" => Some(Self::Course),
            "instructor" | "instructors" | "faculty" | "staff" => Some(Self::Instructor),
            "section" | "sections" | "offering" | "offerings" | "class" => Some(Self::Section),
            "outcome" | "outcomes" | "learning_outcome" | "slo" => Some(Self::Outcome),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidInput(format!("Unknown entity kind: {s}")))
    }
}

/// Business identifier used to match incoming records against stored ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Case-folds and trims a single identifier.
    #[must_use]
    pub fn fold(identifier: &str) -> String {
        identifier.trim().to_lowercase()
    }

    /// Builds a key from already-folded components.
    #[must_use]
    pub fn composite(parts: &[&str]) -> Self {
        let mut key = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(part);
        }
        Self(key)
    }

    /// Builds a key from a raw string, folding every component.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<String> = raw.split(KEY_SEPARATOR).map(Self::fold).collect();
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        Self::composite(&refs)
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A catalog course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    /// Folded course number (natural key).
    pub course_number: String,
    /// Display title.
    pub title: Option<String>,
    /// Catalog description.
    pub description: Option<String>,
    /// Credit hours.
    pub credit_hours: Option<f64>,
    /// Owning department.
    pub department: Option<String>,
}

/// A teaching staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    /// Folded employee id (natural key).
    pub employee_id: String,
    /// Display name.
    pub full_name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Home department.
    pub department: Option<String>,
}

/// A scheduled offering of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Folded course number of the offered course.
    pub course_number: String,
    /// Folded term code.
    pub term: String,
    /// Folded section code.
    pub section_code: String,
    /// Folded employee id of the assigned instructor.
    pub instructor_id: Option<String>,
    /// Seat capacity.
    pub capacity: Option<u32>,
    /// Delivery modality.
    pub modality: Option<String>,
}

/// A learning outcome attached to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Folded course number.
    pub course_number: String,
    /// Folded outcome code.
    pub outcome_code: String,
    /// Outcome statement.
    pub description: Option<String>,
    /// Cognitive level (e.g. Bloom's taxonomy).
    pub level: Option<String>,
}

/// Tagged canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    /// A course.
    Course(Course),
    /// An instructor.
    Instructor(Instructor),
    /// A section.
    Section(Section),
    /// An outcome.
    Outcome(Outcome),
}

/// A reference from one entity to another, checked during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field holding the reference.
    pub field: &'static str,
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Natural key of the referenced entity.
    pub key: NaturalKey,
}

/// Picks the resolved value of one field.
///
/// With `overwrite` the incoming value always wins; otherwise a blank incoming
/// value keeps the existing one.
fn pick<T: Clone>(existing: &Option<T>, incoming: &Option<T>, overwrite: bool) -> Option<T> {
    if overwrite || incoming.is_some() {
        incoming.clone()
    } else {
        existing.clone()
    }
}

fn format_credits(value: f64) -> String {
    format!("{value}")
}

impl Entity {
    /// Returns the entity kind.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Course(_) => EntityKind::Course,
            Self::Instructor(_) => EntityKind::Instructor,
            Self::Section(_) => EntityKind::Section,
            Self::Outcome(_) => EntityKind::Outcome,
        }
    }

    /// Returns the natural key.
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Course(c) => NaturalKey::composite(&[&c.course_number]),
            Self::Instructor(i) => NaturalKey::composite(&[&i.employee_id]),
            Self::Section(s) => {
                NaturalKey::composite(&[&s.course_number, &s.term, &s.section_code])
            },
            Self::Outcome(o) => NaturalKey::composite(&[&o.course_number, &o.outcome_code]),
        }
    }

    /// Entities this one must be able to reach.
    #[must_use]
    pub fn references(&self) -> Vec<Reference> {
        let course_ref = |course: &str| Reference {
            field: "course_number",
            kind: EntityKind::Course,
            key: NaturalKey::composite(&[course]),
        };
        match self {
            Self::Course(_) | Self::Instructor(_) => Vec::new(),
            Self::Section(s) => {
                let mut refs = vec![course_ref(&s.course_number)];
                if let Some(instructor) = &s.instructor_id {
                    refs.push(Reference {
                        field: "instructor_id",
                        kind: EntityKind::Instructor,
                        key: NaturalKey::composite(&[instructor]),
                    });
                }
                refs
            },
            Self::Outcome(o) => vec![course_ref(&o.course_number)],
        }
    }

    /// Resolves `incoming` against `self` (the existing record).
    ///
    /// Key fields always come from `incoming`; both share the same natural key.
    #[must_use]
    pub fn resolved_with(&self, incoming: &Self, overwrite: bool) -> Self {
        match (self, incoming) {
            (Self::Course(e), Self::Course(i)) => Self::Course(Course {
                course_number: i.course_number.clone(),
                title: pick(&e.title, &i.title, overwrite),
                description: pick(&e.description, &i.description, overwrite),
                credit_hours: pick(&e.credit_hours, &i.credit_hours, overwrite),
                department: pick(&e.department, &i.department, overwrite),
            }),
            (Self::Instructor(e), Self::Instructor(i)) => Self::Instructor(Instructor {
                employee_id: i.employee_id.clone(),
                full_name: pick(&e.full_name, &i.full_name, overwrite),
                email: pick(&e.email, &i.email, overwrite),
                department: pick(&e.department, &i.department, overwrite),
            }),
            (Self::Section(e), Self::Section(i)) => Self::Section(Section {
                course_number: i.course_number.clone(),
                term: i.term.clone(),
                section_code: i.section_code.clone(),
                instructor_id: pick(&e.instructor_id, &i.instructor_id, overwrite),
                capacity: pick(&e.capacity, &i.capacity, overwrite),
                modality: pick(&e.modality, &i.modality, overwrite),
            }),
            (Self::Outcome(e), Self::Outcome(i)) => Self::Outcome(Outcome {
                course_number: i.course_number.clone(),
                outcome_code: i.outcome_code.clone(),
                description: pick(&e.description, &i.description, overwrite),
                level: pick(&e.level, &i.level, overwrite),
            }),
            // Mismatched kinds never share a lookup key; keep the incoming record.
            _ => incoming.clone(),
        }
    }

    /// Field values in [`EntityKind::fields`] order; `None` means blank.
    #[must_use]
    pub fn field_values(&self) -> Vec<(&'static str, Option<String>)> {
        match self {
            Self::Course(c) => vec![
                ("course_number", Some(c.course_number.clone())),
                ("title", c.title.clone()),
                ("description", c.description.clone()),
                ("credit_hours", c.credit_hours.map(format_credits)),
                ("department", c.department.clone()),
            ],
            Self::Instructor(i) => vec![
                ("employee_id", Some(i.employee_id.clone())),
                ("full_name", i.full_name.clone()),
                ("email", i.email.clone()),
                ("department", i.department.clone()),
            ],
            Self::Section(s) => vec![
                ("course_number", Some(s.course_number.clone())),
                ("term", Some(s.term.clone())),
                ("section_code", Some(s.section_code.clone())),
                ("instructor_id", s.instructor_id.clone()),
                ("capacity", s.capacity.map(|c| c.to_string())),
                ("modality", s.modality.clone()),
            ],
            Self::Outcome(o) => vec![
                ("course_number", Some(o.course_number.clone())),
                ("outcome_code", Some(o.outcome_code.clone())),
                ("description", o.description.clone()),
                ("level", o.level.clone()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(title: Option<&str>, credits: Option<f64>) -> Entity {
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: title.map(String::from),
            description: None,
            credit_hours: credits,
            department: Some("biology".to_string()),
        })
    }

    #[test]
    fn test_kind_parse_aliases() {
        assert_eq!(EntityKind::parse("Courses"), Some(EntityKind::Course));
        assert_eq!(EntityKind::parse(" offering "), Some(EntityKind::Section));
        assert_eq!(EntityKind::parse("slo"), Some(EntityKind::Outcome));
        assert_eq!(EntityKind::parse("building"), None);
        assert!("faculty".parse::<EntityKind>().is_ok());
    }

    #[test]
    fn test_required_fields() {
        let section: Vec<_> = EntityKind::Section.required_fields().collect();
        assert_eq!(section, vec!["course_number", "term", "section_code"]);
        let course: Vec<_> = EntityKind::Course.required_fields().collect();
        assert_eq!(course, vec!["course_number"]);
    }

    #[test]
    fn test_natural_key_folding() {
        assert_eq!(NaturalKey::fold("  BIO 101 "), "bio 101");
        assert_eq!(NaturalKey::parse(" BIO101 | FA24 ").as_str(), "bio101|fa24");
    }

    #[test]
    fn test_section_key_and_references() {
        let section = Entity::Section(Section {
            course_number: "bio101".to_string(),
            term: "fa24".to_string(),
            section_code: "01".to_string(),
            instructor_id: Some("e42".to_string()),
            capacity: Some(30),
            modality: None,
        });
        assert_eq!(section.natural_key().as_str(), "bio101|fa24|01");
        let refs = section.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, EntityKind::Course);
        assert_eq!(refs[1].key.as_str(), "e42");
    }

    #[test]
    fn test_merge_keeps_existing_when_incoming_blank() {
        let existing = course(Some("Intro to Biology"), Some(3.0));
        let incoming = course(None, Some(4.0));
        let merged = existing.resolved_with(&incoming, false);
        let Entity::Course(c) = merged else {
            unreachable!("kind preserved")
        };
        assert_eq!(c.title.as_deref(), Some("Intro to Biology"));
        assert_eq!(c.credit_hours, Some(4.0));
    }

    #[test]
    fn test_overwrite_clears_blank_fields() {
        let existing = course(Some("Intro to Biology"), Some(3.0));
        let incoming = course(None, Some(3.0));
        assert_eq!(existing.resolved_with(&incoming, true), incoming);
    }

    #[test]
    fn test_field_values_follow_field_order() {
        let values = course(Some("T"), Some(3.5)).field_values();
        let names: Vec<_> = values.iter().map(|(n, _)| *n).collect();
        let declared: Vec<_> = EntityKind::Course.fields().iter().map(|f| f.name).collect();
        assert_eq!(names, declared);
        assert_eq!(values[3].1.as_deref(), Some("3.5"));
    }
}
