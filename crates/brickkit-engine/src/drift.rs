//! Drift classification and reporting.
//!
//! Drift is observable divergence of actual state from declared plus
//! convention-required state. Each field-level change is classified:
//! security-impactful fields (grants, row filters, column masks, owner on
//! tier-1 securables, isolation) are critical, convention-mandated state
//! is a warning, and cosmetic fields are informational.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use brickkit_core::{Environment, SecurableType};

use crate::differ::{Change, ChangeAction, Diff};
use crate::metrics;

/// Severity of a drift entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    /// Cosmetic divergence, no action required.
    Info,
    /// Convention-mandated state is missing.
    Warning,
    /// Security-impactful divergence, immediate attention.
    Critical,
}

/// Classification options.
#[derive(Debug, Clone, Default)]
pub struct DriftOptions {
    /// Tag keys whose divergence is security-impactful (e.g. `pii`).
    pub security_sensitive_tags: BTreeSet<String>,
    /// Tag keys mandated by the convention; their absence is a warning.
    pub required_tags: BTreeSet<String>,
}

impl DriftOptions {
    /// Classifies one change on a securable of the given type.
    #[must_use]
    pub fn classify(&self, securable_type: SecurableType, change: &Change) -> DriftSeverity {
        let path = change.field_path.as_str();
        if path.starts_with("grant.")
            || path.starts_with("row_filter")
            || path.starts_with("column_mask.")
            || path == "isolation_mode"
            || path.starts_with("workspace_binding.")
        {
            return DriftSeverity::Critical;
        }
        if path.starts_with("abac_policy.") {
            // A missing convention-mandated policy is a warning; a policy
            // present on the backend but not declared is critical.
            return match change.action {
                ChangeAction::Remove => DriftSeverity::Critical,
                ChangeAction::Add | ChangeAction::Modify => DriftSeverity::Warning,
            };
        }
        if path == "owner" {
            return if securable_type.is_tier1() {
                DriftSeverity::Critical
            } else {
                DriftSeverity::Warning
            };
        }
        if let Some(key) = path.strip_prefix("tag.") {
            if self.security_sensitive_tags.contains(key) {
                return DriftSeverity::Critical;
            }
            if self.required_tags.contains(key) {
                return DriftSeverity::Warning;
            }
            return DriftSeverity::Info;
        }
        DriftSeverity::Info
    }
}

/// One change with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftedChange {
    /// Dotted field path.
    pub field_path: String,
    /// What the reconciler would do.
    pub action: ChangeAction,
    /// Classified severity.
    pub severity: DriftSeverity,
}

/// One drifted resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    /// Fully qualified name.
    pub resource_name: String,
    /// Securable type.
    pub securable_type: SecurableType,
    /// Highest severity across the changes.
    pub severity: DriftSeverity,
    /// The classified changes.
    pub changes: Vec<DriftedChange>,
}

/// Report from a drift-detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Environment the pass ran against.
    pub environment: Environment,
    /// Declared resources whose observed state diverges.
    pub drifted: Vec<DriftEntry>,
    /// Declared resources absent from the backend.
    pub missing: Vec<String>,
    /// Observed resources not covered by declared state. Reported only;
    /// never mutated unless the caller opts in.
    pub unmanaged: Vec<String>,
    /// Declared resources whose observed state agrees.
    pub compliant: Vec<String>,
}

impl DriftReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(environment: Environment, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            environment,
            drifted: Vec::new(),
            missing: Vec::new(),
            unmanaged: Vec::new(),
            compliant: Vec::new(),
        }
    }

    /// Folds one diff into the report.
    pub fn record(&mut self, diff: &Diff, options: &DriftOptions) {
        if diff.is_compliant() {
            self.compliant.push(diff.resource_name.clone());
            return;
        }
        if diff.needs_create() {
            self.missing.push(diff.resource_name.clone());
            return;
        }
        let changes: Vec<DriftedChange> = diff
            .changes
            .iter()
            .map(|change| DriftedChange {
                field_path: change.field_path.clone(),
                action: change.action,
                severity: options.classify(diff.securable_type, change),
            })
            .collect();
        let severity = changes
            .iter()
            .map(|c| c.severity)
            .max()
            .unwrap_or(DriftSeverity::Info);
        self.drifted.push(DriftEntry {
            resource_name: diff.resource_name.clone(),
            securable_type: diff.securable_type,
            severity,
            changes,
        });
    }

    /// Records an observed resource with no declared counterpart.
    pub fn record_unmanaged(&mut self, full_name: impl Into<String>) {
        self.unmanaged.push(full_name.into());
    }

    /// Returns true when nothing drifted and nothing is missing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty() && self.missing.is_empty()
    }

    /// Emits drift counters.
    pub fn emit_metrics(&self) {
        let mut by_severity = [0u64; 3];
        for entry in &self.drifted {
            by_severity[entry.severity as usize] += 1;
        }
        metrics::record_drift("info", by_severity[DriftSeverity::Info as usize]);
        metrics::record_drift("warning", by_severity[DriftSeverity::Warning as usize]);
        metrics::record_drift("critical", by_severity[DriftSeverity::Critical as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn change(path: &str, action: ChangeAction) -> Change {
        Change {
            field_path: path.into(),
            declared: Value::Null,
            observed: Value::Null,
            action,
        }
    }

    #[test]
    fn grants_and_filters_are_critical() {
        let options = DriftOptions::default();
        assert_eq!(
            options.classify(
                SecurableType::Schema,
                &change("grant.alice.SELECT", ChangeAction::Add)
            ),
            DriftSeverity::Critical
        );
        assert_eq!(
            options.classify(SecurableType::Table, &change("row_filter", ChangeAction::Add)),
            DriftSeverity::Critical
        );
    }

    #[test]
    fn owner_severity_depends_on_tier() {
        let options = DriftOptions::default();
        assert_eq!(
            options.classify(SecurableType::Catalog, &change("owner", ChangeAction::Modify)),
            DriftSeverity::Critical
        );
        assert_eq!(
            options.classify(SecurableType::Table, &change("owner", ChangeAction::Modify)),
            DriftSeverity::Warning
        );
    }

    #[test]
    fn tag_severity_follows_convention_lists() {
        let options = DriftOptions {
            security_sensitive_tags: BTreeSet::from(["pii".to_string()]),
            required_tags: BTreeSet::from(["cost_center".to_string()]),
        };
        assert_eq!(
            options.classify(SecurableType::Table, &change("tag.pii", ChangeAction::Modify)),
            DriftSeverity::Critical
        );
        assert_eq!(
            options.classify(
                SecurableType::Table,
                &change("tag.cost_center", ChangeAction::Add)
            ),
            DriftSeverity::Warning
        );
        assert_eq!(
            options.classify(SecurableType::Table, &change("tag.notes", ChangeAction::Add)),
            DriftSeverity::Info
        );
        assert_eq!(
            options.classify(SecurableType::Table, &change("comment", ChangeAction::Modify)),
            DriftSeverity::Info
        );
    }

    #[test]
    fn report_buckets_missing_drifted_and_compliant() {
        let options = DriftOptions::default();
        let mut report = DriftReport::new(Environment::Dev, Utc::now());

        report.record(
            &Diff {
                securable_type: SecurableType::Catalog,
                resource_name: "analytics_dev".into(),
                changes: vec![],
            },
            &options,
        );
        report.record(
            &Diff {
                securable_type: SecurableType::Schema,
                resource_name: "analytics_dev.customers_dev".into(),
                changes: vec![change("resource", ChangeAction::Add)],
            },
            &options,
        );
        report.record(
            &Diff {
                securable_type: SecurableType::Table,
                resource_name: "analytics_dev.customers_dev.orders_dev".into(),
                changes: vec![change("grant.bob.SELECT", ChangeAction::Remove)],
            },
            &options,
        );
        report.record_unmanaged("analytics_dev.scratch_dev");

        assert_eq!(report.compliant, vec!["analytics_dev"]);
        assert_eq!(report.missing, vec!["analytics_dev.customers_dev"]);
        assert_eq!(report.drifted.len(), 1);
        assert_eq!(report.drifted[0].severity, DriftSeverity::Critical);
        assert_eq!(report.unmanaged, vec!["analytics_dev.scratch_dev"]);
        assert!(!report.is_clean());
    }
}
