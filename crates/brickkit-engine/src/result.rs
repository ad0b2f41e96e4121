//! Execution results and the aggregated run report.

use serde::{Deserialize, Serialize};

use brickkit_core::SecurableType;
use brickkit_convention::RuleViolation;

use crate::differ::Change;
use crate::drift::DriftReport;

/// What an executor did (or would do) for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Resource was created.
    Create,
    /// Resource was updated in place.
    Update,
    /// Resource was deleted.
    Delete,
    /// Nothing to do; declared and observed agree.
    Skip,
    /// Dry-run: planned operations were logged, nothing mutated.
    DryRun,
    /// The operation failed.
    Error,
    /// The run was cancelled before this resource was reached.
    NotAttempted,
}

/// Result of one executor operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// What was done.
    pub operation: Operation,
    /// Securable type.
    pub securable_type: SecurableType,
    /// Fully qualified name.
    pub resource_name: String,
    /// Human-readable outcome.
    pub message: String,
    /// Changes applied by this operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes_applied: Vec<Change>,
    /// Errors captured for this resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Creates a successful result.
    #[must_use]
    pub fn ok(
        operation: Operation,
        securable_type: SecurableType,
        resource_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            operation,
            securable_type,
            resource_name: resource_name.into(),
            message: message.into(),
            changes_applied: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        operation: Operation,
        securable_type: SecurableType,
        resource_name: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        let error = error.to_string();
        Self {
            success: false,
            operation,
            securable_type,
            resource_name: resource_name.into(),
            message: error.clone(),
            changes_applied: Vec::new(),
            errors: vec![error],
            duration_ms: 0,
        }
    }
}

/// Per-resource outcome of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Fully qualified name.
    pub resource_name: String,
    /// Changes actually applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes_applied: Vec<Change>,
    /// Changes planned but not applied (dry-run, or skipped after an
    /// earlier error).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes_skipped: Vec<Change>,
    /// Errors captured for this resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconcileResult {
    /// Returns true when no error was captured.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Aggregated output of one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Per-operation results in execution order.
    pub results: Vec<ExecutionResult>,
    /// Drift report, when a detection pass ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    /// Convention validation findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<RuleViolation>,
    /// True when the run only detected drift without applying changes.
    pub detect_only: bool,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(detect_only: bool) -> Self {
        Self {
            results: Vec::new(),
            drift: None,
            validation: Vec::new(),
            detect_only,
        }
    }

    /// Returns true when any per-resource operation failed or declared
    /// state failed enforced validation.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|result| !result.success)
            || self
                .validation
                .iter()
                .any(|violation| violation.severity == brickkit_convention::RuleMode::Enforced)
    }

    /// Exit-equivalent status of the run: `0` when everything reconciled
    /// without errors, `1` when drift was detected in detect-only mode,
    /// `2` when any resource failed.
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        if self.has_failures() {
            return 2;
        }
        if self.detect_only && self.drift.as_ref().is_some_and(|d| !d.is_clean()) {
            return 1;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickkit_core::Environment;
    use chrono::Utc;

    #[test]
    fn exit_status_reflects_failures_and_drift() {
        let mut report = RunReport::new(false);
        assert_eq!(report.exit_status(), 0);

        report.results.push(ExecutionResult::failed(
            Operation::Update,
            SecurableType::Schema,
            "cat.sch",
            "permission denied",
        ));
        assert_eq!(report.exit_status(), 2);

        let mut detect = RunReport::new(true);
        let mut drift = DriftReport::new(Environment::Dev, Utc::now());
        drift.missing.push("cat.sch".into());
        detect.drift = Some(drift);
        assert_eq!(detect.exit_status(), 1);
    }
}
