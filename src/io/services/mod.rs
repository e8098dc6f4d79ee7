//! Import and export sessions.
//!
//! Orchestrates adapters, normalization, conflict resolution and the
//! persistence gateway for one source document or one export request.

mod control;
pub mod export;
pub mod import;
mod locks;

pub use control::CancellationToken;
pub use export::ExportSession;
pub use import::{ImportProgress, ImportSession, ProgressCallback};
pub use locks::{TenantLease, TenantLocks};
