//! Structured convention documents.
//!
//! Conventions are typically maintained as YAML documents. The document
//! schema is strict: unrecognized top-level keys are a load-time
//! validation error, rule names must resolve against the rule registry,
//! and ownership/environment keys must parse.
//!
//! ```yaml
//! version: "1.0"
//! convention: financial_services
//!
//! naming:
//!   pattern: "{env}_{team}_{name}"
//!   team: quant
//!
//! ownership:
//!   catalog: { type: SERVICE_PRINCIPAL, name: spn_trading_platform }
//!   default: { type: GROUP, name: grp_quant_team }
//!
//! rules:
//!   - rule: catalog_must_have_sp_owner
//!     mode: enforced
//!   - rule: require_tags
//!     tags: [cost_center, team]
//!     mode: advisory
//!
//! tags:
//!   cost_center: CC-TRD-4521
//!   team: quant
//!
//! tag_overrides:
//!   prd:
//!     environment: production
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use brickkit_core::{
    AbacPolicyType, Environment, Error, MatchCondition, Principal, PrincipalType, Result,
    SecurableType,
};

use crate::convention::{AbacPolicyTemplate, Convention, OwnershipSpec, TagDefault};
use crate::naming::NamingSpec;
use crate::rules::{RuleMode, RuleParams, RuleSpec, RulesRegistry};

/// Naming section of a convention document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingDoc {
    /// Name template with placeholders.
    #[serde(default)]
    pub pattern: String,
    /// Value for the `{team}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Value for the `{product}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Regex for validation-only mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_pattern: Option<String>,
}

/// Ownership entry of a convention document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnershipDoc {
    /// Principal type: USER, GROUP, or SERVICE_PRINCIPAL.
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
    /// Principal base name.
    pub name: String,
    /// Whether to append the environment suffix.
    #[serde(default = "default_true")]
    pub add_environment_suffix: bool,
}

fn default_true() -> bool {
    true
}

/// Rule entry of a convention document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDoc {
    /// Registered rule name.
    pub rule: String,
    /// Enforced or advisory; defaults to enforced.
    #[serde(default)]
    pub mode: RuleMode,
    /// Required tag keys, for `require_tags`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Regex pattern, for `naming_pattern`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Securable types the rule applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
}

/// Match condition entry of an ABAC policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConditionDoc {
    /// Tag key to match.
    pub tag_key: String,
    /// Exact value to match; omitted matches any value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_value: Option<String>,
}

/// ABAC policy entry of a convention document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbacPolicyDoc {
    /// Policy name.
    pub name: String,
    /// `row_filter` or `column_mask`.
    pub policy_type: AbacPolicyType,
    /// Function implementing the filter or mask.
    pub function: String,
    /// Group names the policy applies to; empty means everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_principals: Vec<String>,
    /// Group names exempt from the policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except_principals: Vec<String>,
    /// Tag conditions selecting target tables.
    pub match_conditions: Vec<MatchConditionDoc>,
    /// Masked column, required for column masks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    /// Container types the policy is stamped onto; defaults to schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
}

/// Root schema of a convention document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConventionDocument {
    /// Schema version of the document.
    #[serde(default = "default_version")]
    pub version: String,
    /// Convention name.
    pub convention: String,
    /// Naming configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming: Option<NamingDoc>,
    /// Ownership by securable type (`catalog`, `schema`, …) plus
    /// `default` as the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership: Option<BTreeMap<String, OwnershipDoc>>,
    /// Governance rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleDoc>,
    /// Default tags applied to all securable types.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Per-environment overrides merged into `tags`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_overrides: BTreeMap<String, BTreeMap<String, String>>,
    /// ABAC policy templates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abac_policies: Vec<AbacPolicyDoc>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl ConventionDocument {
    /// Parses a document from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed YAML or unrecognized
    /// keys.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::validation("convention_document", "<yaml>", e.to_string())
        })
    }

    /// Resolves the document into a [`Convention`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a rule references an
    /// unregistered name, an ownership key is not a securable type or
    /// `default`, or a tag-override environment does not parse.
    pub fn into_convention(self, registry: &RulesRegistry) -> Result<Convention> {
        let mut convention = Convention::named(&self.convention);

        if let Some(naming) = self.naming {
            convention.naming = Some(NamingSpec {
                pattern: naming.pattern,
                team: naming.team,
                product: naming.product,
                applies_to: None,
                validation_pattern: naming.validation_pattern,
            });
        }

        if let Some(ownership) = self.ownership {
            for (key, doc) in ownership {
                let spec = OwnershipSpec {
                    principal_type: doc.principal_type,
                    name: doc.name,
                    add_environment_suffix: doc.add_environment_suffix,
                };
                if key.eq_ignore_ascii_case("default") {
                    convention.default_ownership = Some(spec);
                    continue;
                }
                let securable_type = parse_securable_type(&key)?;
                convention.ownership.insert(securable_type, spec);
            }
        }

        for doc in self.rules {
            if !registry.has_rule(&doc.rule) {
                return Err(Error::validation(
                    "unknown_rule",
                    &self.convention,
                    format!("rule '{}' is not registered", doc.rule),
                ));
            }
            convention.rules.push(RuleSpec {
                rule: doc.rule,
                mode: doc.mode,
                params: RuleParams {
                    tags: doc.tags.unwrap_or_default(),
                    pattern: doc.pattern,
                    applies_to: doc.applies_to,
                },
            });
        }

        for (key, value) in self.tags {
            convention.default_tags.push(TagDefault::all(key, value));
        }

        for (env_key, overrides) in self.tag_overrides {
            let env: Environment = env_key.parse()?;
            convention.tag_overrides.insert(env, overrides);
        }

        for doc in self.abac_policies {
            let policy = brickkit_core::AbacPolicy {
                name: doc.name,
                policy_type: doc.policy_type,
                function_ref: doc.function,
                target_principals: doc
                    .target_principals
                    .into_iter()
                    .map(Principal::group)
                    .collect(),
                except_principals: doc
                    .except_principals
                    .into_iter()
                    .map(Principal::group)
                    .collect(),
                match_conditions: doc
                    .match_conditions
                    .into_iter()
                    .map(|c| match c.tag_value {
                        Some(value) => MatchCondition::has_tag_value(c.tag_key, value),
                        None => MatchCondition::has_tag(c.tag_key),
                    })
                    .collect(),
                target_column: doc.target_column,
            };
            policy.validate()?;
            convention.abac_policies.push(AbacPolicyTemplate {
                applies_to: doc.applies_to,
                policy,
            });
        }

        Ok(convention)
    }
}

fn parse_securable_type(key: &str) -> Result<SecurableType> {
    let normalized = key.to_ascii_uppercase();
    serde_json::from_value(serde_json::Value::String(normalized)).map_err(|_| {
        Error::validation(
            "ownership_key",
            key,
            format!("'{key}' is not a securable type or 'default'"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
version: "1.0"
convention: financial_services

naming:
  pattern: "{env}_{team}_{name}"
  team: quant

ownership:
  catalog: { type: SERVICE_PRINCIPAL, name: spn_trading_platform }
  default: { type: GROUP, name: grp_quant_team }

rules:
  - rule: catalog_must_have_sp_owner
    mode: enforced
  - rule: require_tags
    tags: [cost_center, team]
    mode: advisory

tags:
  cost_center: CC-TRD-4521
  team: quant

tag_overrides:
  prd:
    team: quant-production

abac_policies:
  - name: hide_pii_rows
    policy_type: row_filter
    function: pii_row_filter
    match_conditions:
      - tag_key: pii
        tag_value: "true"
"#;

    #[test]
    fn parses_and_resolves_a_full_document() {
        let document = ConventionDocument::from_yaml(DOC).unwrap();
        let registry = RulesRegistry::default();
        let convention = document.into_convention(&registry).unwrap();

        assert_eq!(convention.name, "financial_services");
        assert_eq!(convention.rules.len(), 2);
        assert_eq!(convention.default_tags.len(), 2);
        assert_eq!(convention.abac_policies.len(), 1);
        assert!(convention.ownership.contains_key(&SecurableType::Catalog));
        assert!(convention.default_ownership.is_some());
        assert_eq!(
            convention
                .tag_overrides
                .get(&Environment::Prd)
                .and_then(|map| map.get("team"))
                .map(String::as_str),
            Some("quant-production")
        );
    }

    #[test]
    fn unknown_top_level_key_fails() {
        let text = "convention: x\nunexpected_key: true\n";
        assert!(ConventionDocument::from_yaml(text).is_err());
    }

    #[test]
    fn unknown_rule_fails_resolution() {
        let text = "convention: x\nrules:\n  - rule: does_not_exist\n";
        let document = ConventionDocument::from_yaml(text).unwrap();
        let registry = RulesRegistry::default();
        assert!(document.into_convention(&registry).is_err());
    }

    #[test]
    fn bad_environment_key_fails_resolution() {
        let text = "convention: x\ntag_overrides:\n  staging:\n    a: b\n";
        let document = ConventionDocument::from_yaml(text).unwrap();
        let registry = RulesRegistry::default();
        assert!(document.into_convention(&registry).is_err());
    }

    #[test]
    fn bad_ownership_key_fails_resolution() {
        let text = "convention: x\nownership:\n  warehouse: { type: GROUP, name: g }\n";
        let document = ConventionDocument::from_yaml(text).unwrap();
        let registry = RulesRegistry::default();
        assert!(document.into_convention(&registry).is_err());
    }
}
