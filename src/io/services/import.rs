//! Import session.
//!
//! Drives one source document through parse, normalize, resolve and then
//! either simulate (dry run) or commit, producing an [`ImportReport`].
//!
//! # State machine
//!
//! ```text
//! Created → Parsing → Normalizing → Resolving → Simulating | Committing → Completed
//!    └──────────┴───────────┴────────────┴──────────────┴────────→ Aborted
//! ```
//!
//! A dry run and a real run share every step up to the write plan, so they
//! classify identically; only a real run hands the plan to the gateway.

use std::collections::HashSet;
use std::time::Instant;

use tracing::instrument;

use super::control::{CancellationToken, Checkpoint};
use super::locks::TenantLocks;
use crate::config::EngineConfig;
use crate::io::normalize::{Normalized, RecordNormalizer, dedupe};
use crate::io::registry::AdapterRegistry;
use crate::io::resolve::ConflictResolver;
use crate::io::traits::{FormatAdapter, SourceDocument};
use crate::models::{
    CanonicalRecord, Classification, Conflict, ImportReport, Resolution, ResolutionStrategy,
    SessionState, TenantScope,
};
use crate::observability::record_import_session;
use crate::storage::{PendingWrite, PersistenceGateway};
use crate::{Error, Result};

/// Progress callback for import sessions.
pub type ProgressCallback = Box<dyn Fn(&ImportProgress) + Send>;

/// Progress information during an import.
#[derive(Debug, Clone, Default)]
pub struct ImportProgress {
    /// Current session state.
    pub state: Option<SessionState>,
    /// Raw records read so far.
    pub processed: usize,
    /// Records that normalized successfully.
    pub accepted: usize,
    /// Records excluded or rejected during normalization.
    pub excluded: usize,
    /// Records classified by the resolver.
    pub resolved: usize,
}

/// One import run.
///
/// Built per call from the engine's shared parts; consumed by [`Self::run`].
pub struct ImportSession<'e> {
    registry: &'e AdapterRegistry,
    gateway: &'e dyn PersistenceGateway,
    locks: &'e TenantLocks,
    config: &'e EngineConfig,
    strategy: ResolutionStrategy,
    token: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl<'e> ImportSession<'e> {
    /// Creates a session using the configured default strategy.
    #[must_use]
    pub fn new(
        registry: &'e AdapterRegistry,
        gateway: &'e dyn PersistenceGateway,
        locks: &'e TenantLocks,
        config: &'e EngineConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            locks,
            config,
            strategy: config.default_strategy,
            token: CancellationToken::new(),
            progress: None,
        }
    }

    /// Overrides the resolution strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Attaches a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Runs the session to a terminal state.
    ///
    /// # Errors
    ///
    /// - [`Error::AdapterNotFound`], [`Error::Unsupported`], [`Error::LockTimeout`]
    ///   and [`Error::Format`] are returned directly; no report exists.
    /// - Any other fatal error returns [`Error::SessionAborted`] carrying the
    ///   partial report.
    #[instrument(
        name = "curricula.import",
        skip_all,
        fields(tenant = %tenant, format = %format, dry_run = dry_run, strict = strict, source = source.name())
    )]
    pub fn run(
        self,
        source: &SourceDocument,
        format: &str,
        tenant: &TenantScope,
        dry_run: bool,
        strict: bool,
    ) -> Result<ImportReport> {
        tenant.validate()?;
        let format = format.trim().to_lowercase();
        let adapter = self.registry.resolve(&format)?;
        let descriptor = adapter.descriptor();
        if !descriptor.capabilities.can_import {
            return Err(Error::Unsupported {
                adapter: descriptor.id.clone(),
                operation: "import",
            });
        }

        let _lease = self.locks.acquire(tenant, self.config.lock_timeout)?;

        let start = Instant::now();
        let mut report = ImportReport::new(
            tenant.clone(),
            descriptor.id.clone(),
            format.clone(),
            dry_run,
            strict,
        );
        report.strategy = self.strategy;
        tracing::info!(session_id = %report.session_id, adapter = %descriptor.id, "Import session started");

        let checkpoint = Checkpoint::new(self.token.clone(), self.config.session_timeout);
        let mut run = Run {
            session: &self,
            adapter: adapter.as_ref(),
            checkpoint,
            report: &mut report,
            progress: ImportProgress::default(),
        };

        match run.execute(source, &format) {
            Ok(()) => {
                report.complete = true;
                report.duration_ms = elapsed_ms(start);
                record_import_session(&report);
                tracing::info!(
                    session_id = %report.session_id,
                    records = report.total_processed(),
                    duration_ms = report.duration_ms,
                    "{}",
                    report.summary()
                );
                Ok(report)
            },
            Err(e @ Error::Format { .. }) => {
                tracing::warn!(session_id = %report.session_id, error = %e, "Import rejected by adapter");
                Err(e)
            },
            Err(cause) => Err(abort(report, cause, start)),
        }
    }
}

/// Mutable state of one running session.
struct Run<'s, 'e> {
    session: &'s ImportSession<'e>,
    adapter: &'s dyn FormatAdapter,
    checkpoint: Checkpoint,
    report: &'s mut ImportReport,
    progress: ImportProgress,
}

impl Run<'_, '_> {
    fn execute(&mut self, source: &SourceDocument, format: &str) -> Result<()> {
        let accepted = self.parse_and_normalize(source, format)?;
        let writes = self.resolve(accepted)?;
        let plan = build_plan(writes, &self.report.tenant)?;

        if self.report.dry_run {
            self.transition(SessionState::Simulating)?;
            tracing::debug!(writes = plan.len(), "Write plan verified, nothing applied");
        } else {
            self.transition(SessionState::Committing)?;
            self.checkpoint.check()?;
            self.commit(&plan)?;
        }
        self.transition(SessionState::Completed)
    }

    fn parse_and_normalize(
        &mut self,
        source: &SourceDocument,
        format: &str,
    ) -> Result<Vec<CanonicalRecord>> {
        self.transition(SessionState::Parsing)?;
        let descriptor = self.adapter.descriptor();
        let structural = self.adapter.validate_structure(source, format);
        if !structural.is_empty() {
            let message = structural
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Format {
                adapter: descriptor.id.clone(),
                message,
            });
        }
        let stream = self.adapter.parse(source, format)?;

        self.transition(SessionState::Normalizing)?;
        let tenant = self.report.tenant.clone();
        let mut normalizer = RecordNormalizer::new(tenant, self.adapter.field_mapping().clone())
            .with_kinds(&descriptor.entity_kinds);

        let mut accepted = Vec::new();
        for raw in stream {
            self.checkpoint.check()?;
            let normalization = normalizer.normalize(raw?);
            let first_error = normalization
                .issues
                .iter()
                .find(|i| i.is_error())
                .map(ToString::to_string);
            self.report.issues.extend(normalization.issues);
            self.progress.processed += 1;

            match normalization.outcome {
                Normalized::Accepted(record) => {
                    self.progress.accepted += 1;
                    accepted.push(record);
                },
                Normalized::Excluded(kind) => {
                    self.progress.excluded += 1;
                    self.report.record_error(kind);
                },
                Normalized::Rejected => {
                    self.progress.excluded += 1;
                    self.report.rejected += 1;
                },
            }
            self.notify();

            if let Some(message) = first_error.filter(|_| self.report.strict) {
                return Err(Error::StrictModeViolation(message));
            }
        }

        tracing::debug!(
            processed = self.progress.processed,
            accepted = accepted.len(),
            "Normalization finished"
        );
        Ok(accepted)
    }

    fn resolve(&mut self, accepted: Vec<CanonicalRecord>) -> Result<Vec<PendingWrite>> {
        self.transition(SessionState::Resolving)?;

        let (survivors, superseded) = dedupe(accepted);
        for displaced in &superseded {
            self.report.issues.push(displaced.issue());
            self.report.record_conflict(Conflict {
                kind: displaced.record.kind(),
                natural_key: displaced.record.natural_key(),
                existing: None,
                incoming: displaced.record.record_ref(),
                classification: Classification::Superseded,
                resolution: Resolution::Superseded,
            });
        }

        let defaults = self.session.config.tenant_defaults(&self.report.tenant);
        let mut resolver =
            ConflictResolver::new(self.session.gateway, self.report.tenant.clone(), self.session.strategy)
                .with_defaults(defaults)
                .with_batch(&survivors);
        let mut writes = Vec::new();
        for record in &survivors {
            self.checkpoint.check()?;
            let resolved = resolver.resolve(record)?;
            let first_error = resolved
                .issues
                .iter()
                .find(|i| i.is_error())
                .map(ToString::to_string);
            self.report.issues.extend(resolved.issues);
            self.report.record_conflict(resolved.conflict);
            writes.extend(resolved.write);
            self.progress.resolved += 1;
            self.notify();

            if let Some(message) = first_error.filter(|_| self.report.strict) {
                return Err(Error::StrictModeViolation(message));
            }
        }

        self.report
            .conflicts
            .sort_by_key(|c| c.incoming.position);
        Ok(writes)
    }

    fn commit(&self, plan: &[PendingWrite]) -> Result<()> {
        let gateway = self.session.gateway;
        let mut tx = gateway.begin_transaction()?;
        let outcomes = match tx.upsert_batch(plan) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(error = %rollback, "Rollback failed after write error");
                }
                return Err(e);
            },
        };
        if outcomes.len() != plan.len() {
            if let Err(rollback) = tx.rollback() {
                tracing::error!(error = %rollback, "Rollback failed after short write");
            }
            return Err(Error::persistence(
                "upsert_batch",
                format!("gateway applied {} of {} writes", outcomes.len(), plan.len()),
            ));
        }
        tx.commit()?;
        tracing::debug!(
            backend = gateway.backend_name(),
            writes = plan.len(),
            "Write plan committed"
        );
        Ok(())
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        let current = self.report.state;
        if !current.can_transition_to(next) {
            return Err(Error::operation(
                "session_transition",
                format!("illegal transition {current:?} -> {next:?}"),
            ));
        }
        tracing::debug!(session_id = %self.report.session_id, from = ?current, to = ?next, "Session state change");
        self.report.state = next;
        self.progress.state = Some(next);
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        if let Some(callback) = &self.session.progress {
            callback(&self.progress);
        }
    }
}

/// Orders writes so referenced kinds land first and checks the plan holds
/// one write per natural key, all for the session tenant.
fn build_plan(mut writes: Vec<PendingWrite>, tenant: &TenantScope) -> Result<Vec<PendingWrite>> {
    writes.sort_by_key(|w| w.kind);
    let mut seen = HashSet::with_capacity(writes.len());
    for write in &writes {
        if &write.tenant != tenant {
            return Err(Error::InvalidInput(format!(
                "write for tenant '{}' in a session for '{tenant}'",
                write.tenant
            )));
        }
        if !seen.insert((write.kind, write.key.clone())) {
            return Err(Error::operation(
                "build_write_plan",
                format!("duplicate write for {} '{}'", write.kind, write.key),
            ));
        }
    }
    Ok(writes)
}

fn abort(mut report: ImportReport, cause: Error, start: Instant) -> Error {
    let from = report.state;
    report.state = SessionState::Aborted;
    report.complete = false;
    report.error = Some(cause.to_string());
    report.duration_ms = elapsed_ms(start);
    record_import_session(&report);
    tracing::warn!(
        session_id = %report.session_id,
        from = ?from,
        error = %cause,
        "Import session aborted"
    );
    Error::SessionAborted {
        cause: Box::new(cause),
        report: Box::new(report),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
