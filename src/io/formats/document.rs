//! Sectioned document shape shared by the JSON and YAML adapters.
//!
//! ```json
//! {"courses": [...], "instructors": [...], "sections": [...], "outcomes": [...]}
//! ```
//!
//! Both adapters decode into a [`serde_json::Value`] tree and hand it here, so
//! structure checks, row extraction and export layout are identical.

use serde_json::{Map, Number, Value};

use crate::io::traits::StructuralIssue;
use crate::models::{CanonicalRecord, EntityKind, RawRecord, SourcePosition};
use crate::{Error, Result};

/// Checks the document tree.
pub(crate) fn validate(root: &Value) -> Vec<StructuralIssue> {
    let Value::Object(sections) = root else {
        return vec![StructuralIssue::new(format!(
            "top level must be a mapping of sections, found {}",
            type_name(root)
        ))];
    };

    let mut issues = Vec::new();
    let mut known = 0;
    for (name, value) in sections {
        let Some(kind) = section_kind(name) else {
            issues.push(StructuralIssue::at(
                format!("section '{name}'"),
                "unknown section",
            ));
            continue;
        };
        known += 1;

        let Value::Array(items) = value else {
            issues.push(StructuralIssue::at(
                kind.plural(),
                format!("section must be a list, found {}", type_name(value)),
            ));
            continue;
        };

        for (i, item) in items.iter().enumerate() {
            match item {
                Value::Object(fields) => {
                    for (field, value) in fields {
                        if matches!(value, Value::Array(_) | Value::Object(_)) {
                            issues.push(StructuralIssue::at(
                                format!("{}[{i}].{field}", kind.plural()),
                                "nested values are not supported",
                            ));
                        }
                    }
                },
                other => issues.push(StructuralIssue::at(
                    format!("{}[{i}]", kind.plural()),
                    format!("entry must be a mapping, found {}", type_name(other)),
                )),
            }
        }
    }

    if known == 0 && issues.is_empty() {
        issues.push(StructuralIssue::new(format!(
            "document has no known section (expected one of: {})",
            EntityKind::all()
                .iter()
                .map(EntityKind::plural)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    issues
}

/// Turns a validated document into raw records, section by section in
/// dependency order.
pub(crate) fn into_rows(
    adapter: &'static str,
    root: Value,
) -> impl Iterator<Item = Result<RawRecord>> {
    let mut sections = match root {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let ordered: Vec<(EntityKind, Vec<Value>)> = EntityKind::all()
        .iter()
        .filter_map(|kind| match sections.remove(kind.plural()) {
            Some(Value::Array(items)) => Some((*kind, items)),
            _ => None,
        })
        .collect();

    ordered
        .into_iter()
        .flat_map(|(kind, items)| {
            items
                .into_iter()
                .enumerate()
                .map(move |(index, item)| (kind, index, item))
        })
        .enumerate()
        .map(move |(ordinal, (kind, index, item))| {
            let position = SourcePosition::ordinal(ordinal + 1).in_section(kind, index);
            row(adapter, kind, position, item)
        })
}

fn row(
    adapter: &'static str,
    kind: EntityKind,
    position: SourcePosition,
    item: Value,
) -> Result<RawRecord> {
    let Value::Object(fields) = item else {
        return Err(Error::Format {
            adapter: adapter.to_string(),
            message: format!("{position}: {} entry is not a mapping", kind.as_str()),
        });
    };

    let mut raw = RawRecord::new(position).with_kind(kind.as_str());
    for (field, value) in fields {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::Format {
                    adapter: adapter.to_string(),
                    message: format!("{position}: field '{field}' is not a scalar"),
                });
            },
        };
        raw.values.insert(field, text);
    }
    Ok(raw)
}

/// Builds the export tree. Blank fields are omitted; numeric fields are
/// written as numbers.
pub(crate) fn to_document(records: &[CanonicalRecord]) -> Value {
    let mut root = Map::new();
    for kind in EntityKind::all() {
        let items: Vec<Value> = records
            .iter()
            .filter(|r| r.kind() == *kind)
            .map(|r| {
                let mut object = Map::new();
                for (name, value) in r.entity.field_values() {
                    if let Some(value) = value {
                        object.insert(name.to_string(), field_value(name, value));
                    }
                }
                Value::Object(object)
            })
            .collect();
        if !items.is_empty() || records.is_empty() {
            root.insert(kind.plural().to_string(), Value::Array(items));
        }
    }
    Value::Object(root)
}

fn field_value(name: &str, value: String) -> Value {
    let number = match name {
        "credit_hours" => value.parse::<f64>().ok().and_then(Number::from_f64),
        "capacity" => value.parse::<u64>().ok().map(Number::from),
        _ => None,
    };
    number.map_or(Value::String(value), Value::Number)
}

fn section_kind(name: &str) -> Option<EntityKind> {
    EntityKind::all()
        .iter()
        .copied()
        .find(|k| k.plural() == name.trim().to_lowercase())
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionEntry;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_sections() {
        let doc = json!({"courses": [{"course_number": "BIO101"}], "outcomes": []});
        assert!(validate(&doc).is_empty());
    }

    #[test]
    fn test_validate_rejects_shapes() {
        assert_eq!(validate(&json!([1, 2])).len(), 1);
        assert!(validate(&json!({"rooms": []}))[0].message.contains("unknown section"));
        assert!(validate(&json!({"courses": {}}))[0].message.contains("must be a list"));
        assert!(validate(&json!({}))[0].message.contains("no known section"));
        assert!(
            validate(&json!({"courses": [{"course_number": ["a"]}]}))[0]
                .message
                .contains("nested")
        );
    }

    #[test]
    fn test_rows_follow_dependency_order() {
        let doc = json!({
            "sections": [{"course_number": "BIO101", "term": "FA24", "section_code": "01", "capacity": 30}],
            "courses": [{"course_number": "BIO101", "credit_hours": 3.5, "title": null}]
        });
        let rows: Vec<_> = into_rows("json", doc).collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind_hint.as_deref(), Some("course"));
        assert_eq!(rows[0].position.ordinal, 1);
        assert_eq!(rows[0].values.get("credit_hours").map(String::as_str), Some("3.5"));
        assert!(!rows[0].values.contains_key("title"));
        assert_eq!(rows[1].values.get("capacity").map(String::as_str), Some("30"));
        assert_eq!(rows[1].position.ordinal, 2);
    }

    #[test]
    fn test_rows_carry_section_entry() {
        let doc = json!({
            "instructors": [{"employee_id": "E1"}],
            "courses": [{"course_number": "BIO101"}, {"course_number": "CHEM101"}, {"course_number": "PHYS101"}]
        });
        let rows: Vec<_> = into_rows("json", doc).collect::<Result<_>>().unwrap();
        assert_eq!(rows[2].position.to_string(), "record 3 (courses[2])");
        assert_eq!(rows[3].position.ordinal, 4);
        assert_eq!(
            rows[3].position.entry,
            Some(SectionEntry {
                kind: EntityKind::Instructor,
                index: 0
            })
        );
        assert_eq!(rows[3].position.to_string(), "record 4 (instructors[0])");
    }
}
