//! Attribute-based access control policies.
//!
//! An ABAC policy attaches a row filter or column mask to every table (or
//! column) inside a container whose tags match the policy's conditions.
//! The filtering itself is implemented by a catalog function the policy
//! references; the engine only ensures the function exists and the policy
//! is materialized.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::principal::Principal;
use crate::tag::TagSet;

/// Maximum number of match conditions per policy.
pub const MAX_MATCH_CONDITIONS: usize = 3;

/// What the policy applies to matching tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbacPolicyType {
    /// Filters rows through the referenced predicate function.
    RowFilter,
    /// Masks a column through the referenced masking function.
    ColumnMask,
}

/// A tag condition selecting target tables (or columns).
///
/// A condition with only a key matches any value of that tag; with a
/// value it matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    /// Tag key to match.
    pub tag_key: String,
    /// Exact tag value to match; `None` matches any value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_value: Option<String>,
}

impl MatchCondition {
    /// Matches any value of `tag_key`.
    #[must_use]
    pub fn has_tag(tag_key: impl Into<String>) -> Self {
        Self {
            tag_key: tag_key.into(),
            tag_value: None,
        }
    }

    /// Matches `tag_key` with exactly `tag_value`.
    #[must_use]
    pub fn has_tag_value(tag_key: impl Into<String>, tag_value: impl Into<String>) -> Self {
        Self {
            tag_key: tag_key.into(),
            tag_value: Some(tag_value.into()),
        }
    }

    /// Evaluates the condition against a tag set.
    #[must_use]
    pub fn matches(&self, tags: &TagSet) -> bool {
        match (&self.tag_value, tags.get(&self.tag_key)) {
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
            (_, None) => false,
        }
    }
}

/// A declarative row-filter or column-mask policy on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbacPolicy {
    /// Policy name, unique within its container.
    pub name: String,
    /// Row filter or column mask.
    pub policy_type: AbacPolicyType,
    /// Name of the function implementing the filter/mask. Either a bare
    /// name (resolved inside the container) or a fully qualified name.
    pub function_ref: String,
    /// Principals the policy applies to; empty means everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_principals: Vec<Principal>,
    /// Principals exempt from the policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except_principals: Vec<Principal>,
    /// Tag conditions selecting target tables; all must match.
    pub match_conditions: Vec<MatchCondition>,
    /// Masked column, required for column masks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
}

impl AbacPolicy {
    /// Validates structural constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the policy carries more than
    /// [`MAX_MATCH_CONDITIONS`] conditions, has no condition at all, or is
    /// a column mask without a target column.
    pub fn validate(&self) -> Result<()> {
        if self.match_conditions.is_empty() {
            return Err(Error::validation(
                "abac_match_conditions",
                &self.name,
                "policy must declare at least one match condition",
            ));
        }
        if self.match_conditions.len() > MAX_MATCH_CONDITIONS {
            return Err(Error::validation(
                "abac_match_conditions",
                &self.name,
                format!(
                    "policy declares {} match conditions, maximum is {MAX_MATCH_CONDITIONS}",
                    self.match_conditions.len()
                ),
            ));
        }
        if self.policy_type == AbacPolicyType::ColumnMask && self.target_column.is_none() {
            return Err(Error::validation(
                "abac_target_column",
                &self.name,
                "column mask policies must name a target column",
            ));
        }
        Ok(())
    }

    /// Evaluates whether a table with `tags` is selected by this policy.
    #[must_use]
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.match_conditions.iter().all(|c| c.matches(tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;

    fn pii_policy() -> AbacPolicy {
        AbacPolicy {
            name: "hide_pii_rows".into(),
            policy_type: AbacPolicyType::RowFilter,
            function_ref: "pii_row_filter".into(),
            target_principals: vec![],
            except_principals: vec![Principal::group("privacy_office")],
            match_conditions: vec![MatchCondition::has_tag_value("pii", "true")],
            target_column: None,
        }
    }

    #[test]
    fn condition_matching() {
        let tags = TagSet::from_tags(&[Tag::new("pii", "true"), Tag::new("team", "quant")]);
        assert!(MatchCondition::has_tag("pii").matches(&tags));
        assert!(MatchCondition::has_tag_value("pii", "true").matches(&tags));
        assert!(!MatchCondition::has_tag_value("pii", "false").matches(&tags));
        assert!(!MatchCondition::has_tag("classification").matches(&tags));
    }

    #[test]
    fn policy_selects_matching_tables() {
        let policy = pii_policy();
        assert!(policy.matches(&TagSet::from_tags(&[Tag::new("pii", "true")])));
        assert!(!policy.matches(&TagSet::from_tags(&[Tag::new("pii", "false")])));
    }

    #[test]
    fn validation_limits_conditions_and_requires_mask_column() {
        let mut policy = pii_policy();
        policy.match_conditions = vec![
            MatchCondition::has_tag("a"),
            MatchCondition::has_tag("b"),
            MatchCondition::has_tag("c"),
            MatchCondition::has_tag("d"),
        ];
        assert!(policy.validate().is_err());

        let mut mask = pii_policy();
        mask.policy_type = AbacPolicyType::ColumnMask;
        assert!(mask.validate().is_err());
        mask.target_column = Some("ssn".into());
        assert!(mask.validate().is_ok());
    }
}
