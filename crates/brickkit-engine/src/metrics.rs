//! Reconciliation metrics.
//!
//! Counters and histograms for reconcile operations, complementing the
//! structured logging. Callers install a metrics recorder; with none
//! installed these are no-ops.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Operations applied counter.
pub const OPERATIONS_APPLIED: &str = "brickkit_operations_applied_total";

/// Operations failed counter.
pub const OPERATIONS_FAILED: &str = "brickkit_operations_failed_total";

/// Backend retry counter.
pub const BACKEND_RETRIES: &str = "brickkit_backend_retries_total";

/// Per-resource reconcile duration histogram.
pub const RECONCILE_DURATION: &str = "brickkit_reconcile_duration_seconds";

/// Drift entries detected counter.
pub const DRIFT_DETECTED: &str = "brickkit_drift_detected_total";

/// Registers all engine metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(OPERATIONS_APPLIED, "Total backend operations applied");
    describe_counter!(OPERATIONS_FAILED, "Total backend operations failed");
    describe_counter!(BACKEND_RETRIES, "Total transient backend retries");
    describe_histogram!(
        RECONCILE_DURATION,
        "Duration of per-resource reconciliation in seconds"
    );
    describe_counter!(DRIFT_DETECTED, "Total drifted resources detected");
}

/// Records an applied operation.
pub fn record_operation(operation: &str, securable_type: &str) {
    counter!(
        OPERATIONS_APPLIED,
        "operation" => operation.to_string(),
        "securable_type" => securable_type.to_string()
    )
    .increment(1);
}

/// Records a failed operation.
pub fn record_failure(operation: &str, securable_type: &str) {
    counter!(
        OPERATIONS_FAILED,
        "operation" => operation.to_string(),
        "securable_type" => securable_type.to_string()
    )
    .increment(1);
}

/// Records a transient retry.
pub fn record_retry(operation: &str) {
    counter!(BACKEND_RETRIES, "operation" => operation.to_string()).increment(1);
}

/// Records the duration of one resource's reconciliation.
pub fn record_reconcile_duration(securable_type: &str, duration_secs: f64) {
    histogram!(
        RECONCILE_DURATION,
        "securable_type" => securable_type.to_string()
    )
    .record(duration_secs);
}

/// Records drift entries by severity.
pub fn record_drift(severity: &str, count: u64) {
    counter!(DRIFT_DETECTED, "severity" => severity.to_string()).increment(count);
}
