//! CSV/TSV format adapter.
//!
//! One table carries every entity kind: a `kind` column names the kind of each
//! row and the remaining columns are mapped onto canonical fields. Rows are
//! streamed lazily from the source bytes.

use std::collections::HashSet;
use std::io::Write;

use crate::io::traits::{
    AdapterDescriptor, Capabilities, FieldMapping, FormatAdapter, FormatSpec, RawRecordStream,
    SourceDocument, StructuralIssue,
};
use crate::models::{CanonicalRecord, EntityKind, RawRecord, SourcePosition};
use crate::{Error, Result};

/// Header names accepted for the kind column.
const KIND_COLUMNS: &[&str] = &["kind", "entity", "record_type", "type"];

/// Columns that can carry a natural key.
const KEY_FIELDS: &[&str] = &["course_number", "employee_id"];

/// CSV and TSV adapter.
pub struct CsvAdapter {
    descriptor: AdapterDescriptor,
    mapping: FieldMapping,
}

impl Default for CsvAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvAdapter {
    /// Adapter id.
    pub const ID: &'static str = "csv";

    /// Creates the adapter with the default column aliases.
    #[must_use]
    pub fn new() -> Self {
        let mapping = FieldMapping::canonical()
            .with_alias("course", "course_number")
            .with_alias("course_code", "course_number")
            .with_alias("course_id", "course_number")
            .with_alias("name", "title")
            .with_alias("credits", "credit_hours")
            .with_alias("units", "credit_hours")
            .with_alias("dept", "department")
            .with_alias("employee", "employee_id")
            .with_alias("staff_id", "employee_id")
            .with_alias("instructor_name", "full_name")
            .with_alias("mail", "email")
            .with_alias("section", "section_code")
            .with_alias("instructor", "instructor_id")
            .with_alias("seats", "capacity")
            .with_alias("enrollment_cap", "capacity")
            .with_alias("delivery", "modality")
            .with_alias("outcome", "outcome_code");

        Self {
            descriptor: AdapterDescriptor {
                id: Self::ID.to_string(),
                display_name: "Delimited text (CSV/TSV)".to_string(),
                formats: vec![
                    FormatSpec::new("csv", &["csv"], "text/csv"),
                    FormatSpec::new("tsv", &["tsv", "tab"], "text/tab-separated-values"),
                ],
                capabilities: Capabilities::BOTH,
                entity_kinds: EntityKind::all().to_vec(),
            },
            mapping,
        }
    }

    fn delimiter(format: &str) -> u8 {
        if format.trim().eq_ignore_ascii_case("tsv") {
            b'\t'
        } else {
            b','
        }
    }

    fn reader<'a>(&self, source: &'a SourceDocument, format: &str) -> csv::Reader<&'a [u8]> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(Self::delimiter(format))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source.bytes())
    }

    fn format_error(message: impl Into<String>) -> Error {
        Error::Format {
            adapter: Self::ID.to_string(),
            message: message.into(),
        }
    }
}

/// Index of the kind column among `headers`.
fn kind_column(headers: &csv::StringRecord) -> Option<usize> {
    headers.iter().position(|h| {
        let normalized = FieldMapping::normalize_column(h);
        KIND_COLUMNS.contains(&normalized.as_str())
    })
}

impl FormatAdapter for CsvAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn field_mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn validate_structure(&self, source: &SourceDocument, format: &str) -> Vec<StructuralIssue> {
        let mut issues = Vec::new();
        let mut reader = self.reader(source, format);
        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                issues.push(StructuralIssue::at("header", e.to_string()));
                return issues;
            },
        };

        if headers.iter().all(str::is_empty) {
            issues.push(StructuralIssue::at("header", "missing header row"));
            return issues;
        }

        if kind_column(&headers).is_none() {
            issues.push(StructuralIssue::at(
                "header",
                format!("missing kind column (expected one of: {})", KIND_COLUMNS.join(", ")),
            ));
        }

        let mapped: Vec<_> = headers
            .iter()
            .filter_map(|h| self.mapping.resolve(h))
            .collect();
        if !KEY_FIELDS.iter().any(|key| mapped.contains(key)) {
            issues.push(StructuralIssue::at(
                "header",
                format!("no natural-key column (expected one of: {})", KEY_FIELDS.join(", ")),
            ));
        }

        let mut seen = HashSet::new();
        for header in &headers {
            let normalized = FieldMapping::normalize_column(header);
            if !normalized.is_empty() && !seen.insert(normalized) {
                issues.push(StructuralIssue::at(
                    format!("column '{header}'"),
                    "duplicate column",
                ));
            }
        }

        issues
    }

    fn parse<'a>(
        &'a self,
        source: &'a SourceDocument,
        format: &str,
    ) -> Result<RawRecordStream<'a>> {
        let mut reader = self.reader(source, format);
        let headers = reader
            .headers()
            .map_err(|e| Self::format_error(format!("cannot read header: {e}")))?
            .clone();
        let kind_idx = kind_column(&headers)
            .ok_or_else(|| Self::format_error("missing kind column"))?;

        let rows = reader
            .into_records()
            .enumerate()
            .map(move |(index, row)| {
                let row = row.map_err(|e| {
                    Self::format_error(format!("record {}: {e}", index + 1))
                })?;

                let mut position = SourcePosition::ordinal(index + 1);
                if let Some(pos) = row.position() {
                    position = position.at_line(pos.line());
                }

                let mut raw = RawRecord::new(position);
                for (i, value) in row.iter().enumerate() {
                    if i == kind_idx {
                        if !value.is_empty() {
                            raw.kind_hint = Some(value.to_string());
                        }
                        continue;
                    }
                    let Some(header) = headers.get(i) else {
                        continue;
                    };
                    if header.is_empty() {
                        continue;
                    }
                    raw.values.insert(header.to_string(), value.to_string());
                }
                Ok(raw)
            });

        Ok(Box::new(rows))
    }

    fn serialize(
        &self,
        records: &[CanonicalRecord],
        format: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let kinds: Vec<EntityKind> = EntityKind::all()
            .iter()
            .copied()
            .filter(|k| records.is_empty() || records.iter().any(|r| r.kind() == *k))
            .collect();

        let mut columns: Vec<&'static str> = Vec::new();
        for kind in &kinds {
            for field in kind.fields() {
                if !columns.contains(&field.name) {
                    columns.push(field.name);
                }
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(Self::delimiter(format))
            .from_writer(out);

        let write_err = |e: csv::Error| Error::OperationFailed {
            operation: "write_csv".to_string(),
            cause: e.to_string(),
        };

        writer
            .write_record(std::iter::once("kind").chain(columns.iter().copied()))
            .map_err(write_err)?;

        for record in records {
            let values = record.entity.field_values();
            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(record.kind().as_str().to_string());
            for column in &columns {
                let value = values
                    .iter()
                    .find(|(name, _)| name == column)
                    .and_then(|(_, v)| v.clone())
                    .unwrap_or_default();
                row.push(value);
            }
            writer.write_record(&row).map_err(write_err)?;
        }

        writer.flush().map_err(|e| Error::OperationFailed {
            operation: "flush_csv".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Course, Entity, TenantScope};
    use test_case::test_case;

    fn parse_all(adapter: &CsvAdapter, input: &str, format: &str) -> Vec<RawRecord> {
        let source = SourceDocument::from_bytes("input", input);
        adapter
            .parse(&source, format)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_parse_basic_csv() {
        let adapter = CsvAdapter::new();
        let rows = parse_all(
            &adapter,
            "kind,course_number,title\ncourse, BIO101 ,Intro to Biology\ncourse,CHEM200,\n",
            "csv",
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind_hint.as_deref(), Some("course"));
        assert_eq!(rows[0].values.get("course_number").map(String::as_str), Some("BIO101"));
        assert_eq!(rows[0].position.ordinal, 1);
        assert_eq!(rows[0].position.line, Some(2));
        assert_eq!(rows[1].values.get("title").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_tsv() {
        let adapter = CsvAdapter::new();
        let rows = parse_all(&adapter, "type\temployee_id\nfaculty\tE1\n", "tsv");
        assert_eq!(rows[0].kind_hint.as_deref(), Some("faculty"));
        assert_eq!(rows[0].values.get("employee_id").map(String::as_str), Some("E1"));
    }

    #[test_case("course_number,title\nBIO101,x\n", "missing kind column" ; "no kind column")]
    #[test_case("kind,title\ncourse,x\n", "no natural-key column" ; "no key column")]
    #[test_case("kind,course_number,Course Number\ncourse,a,b\n", "duplicate column" ; "duplicate columns")]
    #[test_case("", "missing header row" ; "empty document")]
    fn test_structural_issues(input: &str, expected: &str) {
        let adapter = CsvAdapter::new();
        let source = SourceDocument::from_bytes("input.csv", input);
        let issues = adapter.validate_structure(&source, "csv");
        assert!(
            issues.iter().any(|i| i.message.contains(expected)),
            "expected '{expected}' in {issues:?}"
        );
    }

    #[test]
    fn test_valid_structure_has_no_issues() {
        let adapter = CsvAdapter::new();
        let source = SourceDocument::from_bytes(
            "input.csv",
            "Record Type,Course Code,Credits\ncourse,BIO101,3\n",
        );
        assert!(adapter.validate_structure(&source, "csv").is_empty());
    }

    #[test]
    fn test_serialize_writes_union_of_columns() {
        let adapter = CsvAdapter::new();
        let record = CanonicalRecord {
            tenant: TenantScope::institution("acme"),
            position: SourcePosition::ordinal(1),
            entity: Entity::Course(Course {
                course_number: "bio101".to_string(),
                title: Some("Intro, Biology".to_string()),
                description: None,
                credit_hours: Some(3.0),
                department: None,
            }),
        };
        let mut out = Vec::new();
        adapter.serialize(&[record], "csv", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("kind,course_number,title,description,credit_hours,department")
        );
        assert_eq!(lines.next(), Some("course,bio101,\"Intro, Biology\",,3,"));
    }
}
