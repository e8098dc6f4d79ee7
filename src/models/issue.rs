//! Recoverable per-record validation issues.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::record::RecordRef;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Noted, the record still proceeds.
    Warning,
    /// The record is excluded from commit.
    Error,
}

/// A problem found with one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: Severity,
    /// Canonical field (or `kind`, `natural_key`) the issue concerns.
    pub field: String,
    /// Description of the issue.
    pub message: String,
    /// The originating raw record.
    pub record: RecordRef,
}

impl ValidationIssue {
    /// Creates a warning issue.
    #[must_use]
    pub fn warning(record: RecordRef, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
            record,
        }
    }

    /// Creates an error issue.
    #[must_use]
    pub fn error(record: RecordRef, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
            record,
        }
    }

    /// Returns whether this is an error-severity issue.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}: {}: {}", self.record, self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::SourcePosition;

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::error(
            RecordRef::at(SourcePosition::ordinal(4)),
            "title",
            "Title cannot be empty",
        );
        assert!(issue.is_error());
        assert_eq!(
            issue.to_string(),
            "error: record 4: title: Title cannot be empty"
        );
    }
}
