//! Metrics recording helpers.
//!
//! Samples go through the `metrics` facade; without an installed recorder they
//! are no-ops.

use std::time::Instant;

use crate::models::{ExportManifest, ImportReport, SessionState};

/// Records metrics for a finished import session.
pub fn record_import_session(report: &ImportReport) {
    let outcome = match report.state {
        SessionState::Completed => "completed",
        _ => "aborted",
    };
    let dry_run = if report.dry_run { "true" } else { "false" };

    metrics::counter!(
        "import_sessions_total",
        "outcome" => outcome,
        "dry_run" => dry_run
    )
    .increment(1);

    let totals = report.totals();
    for (classification, count) in [
        ("new", totals.new),
        ("update", totals.update),
        ("unchanged", totals.unchanged),
        ("error", totals.error),
        ("superseded", totals.superseded),
    ] {
        if count > 0 {
            metrics::counter!("import_records_total", "classification" => classification)
                .increment(count as u64);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    metrics::histogram!("import_session_duration_ms", "dry_run" => dry_run)
        .record(report.duration_ms as f64);
}

/// Records metrics for a finished export session.
pub fn record_export_session(manifest: &ExportManifest) {
    let complete = if manifest.complete { "true" } else { "false" };
    metrics::counter!("export_sessions_total", "complete" => complete).increment(1);
    metrics::counter!("export_records_total").increment(manifest.record_count as u64);
}

/// Records a persistence gateway operation.
///
/// * `backend` - Backend name (e.g., "memory", "sqlite")
/// * `operation` - Operation name (e.g., "find", "upsert_batch", "commit")
/// * `status` - "success" or "error"
pub fn record_gateway_operation(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "gateway_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "gateway_operation_duration_ms",
        "backend" => backend,
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
