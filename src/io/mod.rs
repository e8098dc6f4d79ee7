//! Import/Export I/O subsystem.
//!
//! # Architecture
//!
//! - **Format adapters** implement [`FormatAdapter`] and are looked up through
//!   an injected [`AdapterRegistry`]
//! - **Normalization** maps raw rows onto typed, tenant-scoped records
//! - **Resolution** matches records against the store by natural key
//! - **Sessions** orchestrate the above into import and export runs
//!
//! # Supported Formats
//!
//! | Format | Keys | Import | Export | Notes |
//! |--------|------|--------|--------|-------|
//! | CSV | `csv`, `tsv` | ✓ | ✓ | Streaming, `kind` column per row |
//! | JSON | `json` | ✓ | ✓ | Sectioned document |
//! | YAML | `yaml`, `yml` | ✓ | ✓ | Sectioned document |
//!
//! # Examples
//!
//! ```rust,ignore
//! use curricula::io::{AdapterRegistry, ImportSession, SourceDocument, TenantLocks};
//!
//! let registry = AdapterRegistry::with_defaults()?;
//! let locks = TenantLocks::new();
//! let report = ImportSession::new(&registry, &gateway, &locks, &config)
//!     .run(&SourceDocument::from_path("catalog.csv")?, "csv", &tenant, true, false)?;
//! println!("{}", report.summary());
//! ```

pub mod formats;
pub mod normalize;
pub mod registry;
pub mod resolve;
pub mod services;
pub mod traits;

pub use crate::models::ResolutionStrategy;
pub use normalize::{Normalization, Normalized, RecordNormalizer, Superseded, dedupe};
pub use registry::AdapterRegistry;
pub use resolve::{ConflictResolver, Resolved};
pub use services::{
    CancellationToken, ExportSession, ImportProgress, ImportSession, ProgressCallback,
    TenantLease, TenantLocks,
};
pub use traits::{
    AdapterDescriptor, Capabilities, FieldMapping, FormatAdapter, FormatSpec, RawRecordStream,
    SourceDocument, StructuralIssue,
};
