//! Session outcomes: conflicts, import reports and export manifests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{Entity, EntityKind, NaturalKey};
use super::issue::{Severity, ValidationIssue};
use super::record::{RecordId, RecordRef};
use super::tenant::TenantScope;
use crate::{Error, Result};

/// How an update to an existing record is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Every incoming field replaces the stored one, blanks included.
    OverwriteAll,
    /// Blank incoming fields never replace populated stored fields.
    #[default]
    MergeNonNull,
    /// Differences are reported and nothing is written.
    SkipAndReport,
}

impl ResolutionStrategy {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OverwriteAll => "overwrite",
            Self::MergeNonNull => "merge",
            Self::SkipAndReport => "skip",
        }
    }

    /// Parses a strategy name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "overwrite" | "overwrite_all" | "overwrite-all" | "replace" => Some(Self::OverwriteAll),
            "merge" | "merge_non_null" | "merge-non-null" => Some(Self::MergeNonNull),
            "skip" | "skip_and_report" | "skip-and-report" => Some(Self::SkipAndReport),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidInput(format!("Unknown strategy: {s}")))
    }
}

/// Classification of one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No stored record with this key.
    New,
    /// Stored record exists and differs.
    Update,
    /// Stored record exists and is field-identical after resolution.
    Unchanged,
    /// Excluded because of a validation or referential error.
    Error,
    /// Replaced by a later record with the same key in the same batch.
    Superseded,
}

/// What was (or, in a dry run, would be) done with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Inserted as a new record.
    Insert,
    /// Stored record replaced wholesale.
    Overwrite,
    /// Non-blank incoming fields merged onto the stored record.
    MergeNonNull,
    /// Difference reported, no write.
    Skipped,
    /// Nothing to do.
    NoOp,
    /// Excluded from commit.
    Excluded,
    /// Discarded in favor of a later record.
    Superseded,
}

impl Resolution {
    /// Whether this resolution produces a gateway write.
    #[must_use]
    pub const fn writes(&self) -> bool {
        matches!(self, Self::Insert | Self::Overwrite | Self::MergeNonNull)
    }
}

/// The outcome of matching one incoming record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Entity kind.
    pub kind: EntityKind,
    /// Natural key.
    pub natural_key: NaturalKey,
    /// Stored record the incoming one matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<RecordId>,
    /// The incoming record.
    pub incoming: RecordRef,
    /// Classification.
    pub classification: Classification,
    /// Applied resolution.
    pub resolution: Resolution,
}

/// Outcome counts for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// New records.
    pub new: usize,
    /// Updated records.
    pub update: usize,
    /// Unchanged records.
    pub unchanged: usize,
    /// Records excluded by errors.
    pub error: usize,
    /// Records superseded within the batch.
    pub superseded: usize,
}

impl OutcomeCounts {
    /// Sum of all outcomes.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.new + self.update + self.unchanged + self.error + self.superseded
    }

    /// Increments the bucket for a classification.
    pub const fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Update => self.update += 1,
            Classification::Unchanged => self.unchanged += 1,
            Classification::Error => self.error += 1,
            Classification::Superseded => self.superseded += 1,
        }
    }

    fn add(&mut self, other: &Self) {
        self.new += other.new;
        self.update += other.update;
        self.unchanged += other.unchanged;
        self.error += other.error;
        self.superseded += other.superseded;
    }
}

/// Lifecycle of an import session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, nothing read yet.
    Created,
    /// Adapter is producing raw records.
    Parsing,
    /// Raw records are being mapped to canonical ones.
    Normalizing,
    /// Canonical records are being matched against the store.
    Resolving,
    /// Dry run: the write plan is verified but not applied.
    Simulating,
    /// Real run: the write plan is applied in one transaction.
    Committing,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Aborted,
}

impl SessionState {
    /// Returns whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns whether `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Completed | Self::Aborted, _) => false,
            (_, Self::Aborted) => true,
            (Self::Created, Self::Parsing)
            | (Self::Parsing, Self::Normalizing)
            | (Self::Normalizing, Self::Resolving)
            | (Self::Resolving, Self::Simulating | Self::Committing)
            | (Self::Simulating | Self::Committing, Self::Completed) => true,
            _ => false,
        }
    }
}

/// Outcome of an import session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    /// Session identifier.
    pub session_id: Uuid,
    /// Tenant the session ran for.
    pub tenant: TenantScope,
    /// Adapter that parsed the source.
    pub adapter_id: String,
    /// Format key the source was read as.
    pub format: String,
    /// Whether the session was a dry run.
    pub dry_run: bool,
    /// Whether strict mode was on.
    pub strict: bool,
    /// Strategy used for updates.
    pub strategy: ResolutionStrategy,
    /// Terminal (or last reached) state.
    pub state: SessionState,
    /// False when the session aborted; counts are then partial.
    pub complete: bool,
    /// Outcome counts per entity kind.
    pub counts: BTreeMap<EntityKind, OutcomeCounts>,
    /// Rows rejected before their kind could be determined.
    pub rejected: usize,
    /// Every issue, in the order it was found.
    pub issues: Vec<ValidationIssue>,
    /// Every classified record, in source order.
    pub conflicts: Vec<Conflict>,
    /// Top-level error description for aborted sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ImportReport {
    /// Creates an empty report for a session.
    #[must_use]
    pub fn new(
        tenant: TenantScope,
        adapter_id: impl Into<String>,
        format: impl Into<String>,
        dry_run: bool,
        strict: bool,
    ) -> Self {
        Self {
            session_id: Uuid::now_v7(),
            tenant,
            adapter_id: adapter_id.into(),
            format: format.into(),
            dry_run,
            strict,
            strategy: ResolutionStrategy::default(),
            state: SessionState::Created,
            complete: false,
            counts: BTreeMap::new(),
            rejected: 0,
            issues: Vec::new(),
            conflicts: Vec::new(),
            error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Records a classified record.
    pub fn record_conflict(&mut self, conflict: Conflict) {
        self.counts
            .entry(conflict.kind)
            .or_default()
            .record(conflict.classification);
        self.conflicts.push(conflict);
    }

    /// Counts a record whose kind is known but which never reached resolution.
    pub fn record_error(&mut self, kind: EntityKind) {
        self.counts.entry(kind).or_default().error += 1;
    }

    /// Counts for one kind.
    #[must_use]
    pub fn counts_for(&self, kind: EntityKind) -> OutcomeCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    /// Counts summed over every kind (rejected rows count as errors).
    #[must_use]
    pub fn totals(&self) -> OutcomeCounts {
        let mut totals = OutcomeCounts::default();
        for counts in self.counts.values() {
            totals.add(counts);
        }
        totals.error += self.rejected;
        totals
    }

    /// Total records processed.
    #[must_use]
    pub fn total_processed(&self) -> usize {
        self.totals().total()
    }

    /// Error-severity issues.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Warning-severity issues.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Returns whether any error-severity issue was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Returns whether the session reached `Completed`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed && self.complete
    }

    /// Compares everything a dry run must reproduce: counts, issues and
    /// conflict classifications.
    #[must_use]
    pub fn same_outcome_as(&self, other: &Self) -> bool {
        self.counts == other.counts
            && self.rejected == other.rejected
            && self.issues == other.issues
            && self.conflicts == other.conflicts
            && self.state == other.state
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let t = self.totals();
        let mode = if self.dry_run { "dry run" } else { "import" };
        let status = if self.is_completed() {
            "completed"
        } else {
            "aborted (incomplete)"
        };
        format!(
            "{mode} {status} for {}: {} processed, {} new, {} updated, {} unchanged, {} errors, {} superseded, {} warnings",
            self.tenant,
            t.total(),
            t.new,
            t.update,
            t.unchanged,
            t.error,
            t.superseded,
            self.warnings().count()
        )
    }
}

/// Which stored entities an export should include.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySelector {
    /// Kinds to include; empty means all.
    pub kinds: BTreeSet<EntityKind>,
    /// Optional natural-key prefix (folded before matching).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl EntitySelector {
    /// Selects every kind.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects the given kinds.
    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            key_prefix: None,
        }
    }

    /// Restricts to keys starting with `prefix`.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(NaturalKey::fold(&prefix.into()));
        self
    }

    /// Kinds to query, in dependency order.
    #[must_use]
    pub fn selected_kinds(&self) -> Vec<EntityKind> {
        EntityKind::all()
            .iter()
            .copied()
            .filter(|k| self.kinds.is_empty() || self.kinds.contains(k))
            .collect()
    }

    /// Whether a stored entity matches the key prefix.
    #[must_use]
    pub fn matches_key(&self, entity: &Entity) -> bool {
        self.key_prefix
            .as_deref()
            .is_none_or(|prefix| entity.natural_key().as_str().starts_with(prefix))
    }
}

impl FromStr for EntitySelector {
    type Err = Error;

    /// Parses `all`, or a comma-separated list of kinds with an optional
    /// `:prefix` suffix (e.g. `courses,sections:bio`).
    fn from_str(s: &str) -> Result<Self> {
        let (kinds_part, prefix) = match s.split_once(':') {
            Some((kinds, prefix)) => (kinds, Some(prefix)),
            None => (s, None),
        };
        let mut selector = Self::default();
        let trimmed = kinds_part.trim();
        if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("all") {
            for part in trimmed.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                selector.kinds.insert(part.parse()?);
            }
        }
        if let Some(prefix) = prefix.filter(|p| !p.trim().is_empty()) {
            selector = selector.with_key_prefix(prefix);
        }
        Ok(selector)
    }
}

impl fmt::Display for EntitySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            f.write_str("all")?;
        } else {
            let names: Vec<_> = self.kinds.iter().map(EntityKind::plural).collect();
            f.write_str(&names.join(","))?;
        }
        if let Some(prefix) = &self.key_prefix {
            write!(f, ":{prefix}")?;
        }
        Ok(())
    }
}

/// Outcome of an export session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// The selector that was requested.
    pub selector: EntitySelector,
    /// Adapter that serialized the records.
    pub adapter_id: String,
    /// Format key used.
    pub format: String,
    /// Mimetype declared by the adapter for that format.
    pub mime_type: String,
    /// File extension declared by the adapter for that format.
    pub extension: String,
    /// Records written.
    pub record_count: usize,
    /// Records written per kind.
    pub counts: BTreeMap<EntityKind, usize>,
    /// False when any selected kind failed to load.
    pub complete: bool,
    /// Per-kind query failures.
    pub failures: Vec<String>,
    /// Tenant exported.
    pub tenant: TenantScope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::SourcePosition;

    fn conflict(kind: EntityKind, classification: Classification) -> Conflict {
        Conflict {
            kind,
            natural_key: NaturalKey::parse("k"),
            existing: None,
            incoming: RecordRef::at(SourcePosition::ordinal(1)),
            classification,
            resolution: Resolution::Insert,
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            ResolutionStrategy::parse("overwrite-all"),
            Some(ResolutionStrategy::OverwriteAll)
        );
        assert_eq!(
            ResolutionStrategy::parse("MERGE"),
            Some(ResolutionStrategy::MergeNonNull)
        );
        assert!("bogus".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::default(), ResolutionStrategy::MergeNonNull);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Created.can_transition_to(Parsing));
        assert!(Resolving.can_transition_to(Simulating));
        assert!(Resolving.can_transition_to(Committing));
        assert!(Parsing.can_transition_to(Aborted));
        assert!(!Created.can_transition_to(Resolving));
        assert!(!Completed.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Completed));
    }

    #[test]
    fn test_report_totals_include_rejected() {
        let mut report =
            ImportReport::new(TenantScope::institution("a"), "csv", "csv", false, false);
        report.record_conflict(conflict(EntityKind::Course, Classification::New));
        report.record_conflict(conflict(EntityKind::Course, Classification::Superseded));
        report.record_conflict(conflict(EntityKind::Section, Classification::Update));
        report.record_error(EntityKind::Outcome);
        report.rejected = 2;

        let totals = report.totals();
        assert_eq!(totals.new, 1);
        assert_eq!(totals.update, 1);
        assert_eq!(totals.superseded, 1);
        assert_eq!(totals.error, 3);
        assert_eq!(report.total_processed(), 6);
        assert_eq!(report.counts_for(EntityKind::Course).total(), 2);
    }

    #[test]
    fn test_selector_parse() {
        let selector: EntitySelector = "courses, sections:BIO".parse().unwrap();
        assert_eq!(
            selector.selected_kinds(),
            vec![EntityKind::Course, EntityKind::Section]
        );
        assert_eq!(selector.key_prefix.as_deref(), Some("bio"));
        assert_eq!(selector.to_string(), "courses,sections:bio");

        let all: EntitySelector = "all".parse().unwrap();
        assert_eq!(all.selected_kinds().len(), 4);
        assert!("rooms".parse::<EntitySelector>().is_err());
    }

    #[test]
    fn test_summary_marks_incomplete() {
        let report = ImportReport::new(TenantScope::institution("a"), "csv", "csv", true, false);
        assert!(report.summary().contains("aborted (incomplete)"));
        assert!(report.summary().starts_with("dry run"));
    }
}
