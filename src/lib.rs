//! # Curricula
//!
//! Tenant-scoped import/export engine for institutional course records.
//!
//! Curricula ingests courses, instructors, sections and learning outcomes from
//! external files through pluggable per-format adapters, reconciles them against
//! an existing store, and exports them back out in any registered format.
//!
//! ## Features
//!
//! - Pluggable format adapters (CSV/TSV, JSON, YAML) behind an injected registry
//! - Natural-key conflict detection with configurable resolution strategies
//! - Dry runs that classify exactly like real runs without touching the store
//! - All-or-nothing commits through a single gateway transaction
//! - Per-tenant session serialization; different tenants run concurrently
//!
//! ## Example
//!
//! ```rust,ignore
//! use curricula::{Engine, EngineConfig, SourceDocument, StaticTenantContext};
//!
//! let engine = Engine::with_default_adapters(EngineConfig::default(), gateway)?;
//! let tenant = StaticTenantContext::institution("state-u");
//! let report = engine.submit_import(
//!     SourceDocument::from_path("courses.csv")?,
//!     "csv",
//!     ImportFlags::dry_run(),
//!     &tenant,
//! )?;
//! println!("{}", report.summary());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;

use thiserror::Error as ThisError;

pub mod config;
pub mod engine;
pub mod io;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::{EngineConfig, TenantDefaults};
pub use engine::{Engine, ImportFlags};
pub use io::{
    AdapterDescriptor, AdapterRegistry, CancellationToken, ConflictResolver, ExportSession,
    FormatAdapter, ImportSession, RecordNormalizer, ResolutionStrategy, SourceDocument,
};
pub use models::{
    CanonicalRecord, Classification, Entity, EntityKind, EntitySelector, ExportManifest,
    ImportReport, NaturalKey, Severity, StaticTenantContext, TenantContext, TenantScope,
    ValidationIssue,
};
pub use storage::{MemoryGateway, PersistenceGateway, SqliteGateway};

/// Error type for curricula operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Format` | Source fails structural validation (missing column, unknown section) |
/// | `AdapterNotFound` | No adapter registered for the requested format key |
/// | `LockTimeout` | Another session holds the tenant lease past the timeout |
/// | `Persistence` | Gateway lookup, upsert or commit fails |
/// | `SessionAborted` | A session-fatal error after parsing began; carries the partial report |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Filesystem I/O errors occur
    /// - Serialization of an export fails
    /// - Configuration cannot be read or parsed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The source document does not have the structure the adapter expects.
    ///
    /// Aborts the session before any row is normalized.
    #[error("format error in '{adapter}': {message}")]
    Format {
        /// Adapter that rejected the source.
        adapter: String,
        /// Description of the structural mismatch.
        message: String,
    },

    /// No adapter is registered for the format key.
    #[error("no adapter registered for format '{0}'")]
    AdapterNotFound(String),

    /// An adapter format key is already taken.
    #[error("format '{format}' is already registered by adapter '{existing}'")]
    AdapterConflict {
        /// The colliding format key.
        format: String,
        /// Id of the adapter that already owns the key.
        existing: String,
    },

    /// An adapter failed capability validation at registration.
    #[error("adapter '{adapter}' is invalid: {reason}")]
    InvalidAdapter {
        /// Adapter id.
        adapter: String,
        /// Why the adapter was rejected.
        reason: String,
    },

    /// The adapter exists but lacks the requested capability.
    #[error("adapter '{adapter}' does not support {operation}")]
    Unsupported {
        /// Adapter id.
        adapter: String,
        /// `import` or `export`.
        operation: &'static str,
    },

    /// The persistence gateway failed.
    #[error("persistence '{operation}' failed: {cause}")]
    Persistence {
        /// The gateway operation.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The tenant lease could not be acquired in time.
    #[error("tenant '{tenant}' is busy (waited {waited:?})")]
    LockTimeout {
        /// Tenant scope that was busy.
        tenant: String,
        /// How long the session waited.
        waited: Duration,
    },

    /// The session was cancelled at a row boundary.
    #[error("session cancelled")]
    Cancelled,

    /// The session exceeded its time budget.
    #[error("session exceeded its time budget of {0:?}")]
    TimeBudgetExceeded(Duration),

    /// Strict mode stopped the session at the first error-severity issue.
    #[error("strict mode: {0}")]
    StrictModeViolation(String),

    /// A session-fatal error after parsing began.
    ///
    /// The report is marked incomplete and carries the top-level error text.
    #[error("import session aborted: {cause}")]
    SessionAborted {
        /// The fatal error.
        cause: Box<Error>,
        /// Whatever was collected before the abort.
        report: Box<models::ImportReport>,
    },
}

impl Error {
    /// Returns the partial report if this is an aborted session.
    #[must_use]
    pub fn partial_report(&self) -> Option<&models::ImportReport> {
        match self {
            Self::SessionAborted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Returns the root cause, unwrapping `SessionAborted`.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::SessionAborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub(crate) fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn persistence(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Persistence {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for curricula operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
