//! Conventions: organizational standards that propagate through the
//! hierarchy.
//!
//! A convention bundles default tags, required tags, naming rules,
//! ownership defaults, governance rules, and ABAC policy templates.
//! Applying one to a tree fills missing defaults on every resource in the
//! subtree and installs an attach hook so later children inherit the same
//! defaults. Application is idempotent and never overwrites declared
//! values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use brickkit_core::{
    AbacPolicy, AttachHook, Environment, NodeId, Principal, PrincipalType, Resource, ResourceTree,
    SecurableType, TagSet,
};

use crate::naming::NamingSpec;
use crate::rules::{RuleContext, RuleMode, RuleSpec, RulesRegistry};

/// A default tag applied when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefault {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
    /// Securable types the default applies to; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
}

impl TagDefault {
    /// Creates a default applying to every securable type.
    #[must_use]
    pub fn all(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            applies_to: None,
        }
    }

    /// Creates a default restricted to the given types.
    #[must_use]
    pub fn for_types(
        key: impl Into<String>,
        value: impl Into<String>,
        types: impl IntoIterator<Item = SecurableType>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            applies_to: Some(types.into_iter().collect()),
        }
    }

    /// Returns true when the default applies to the type.
    #[must_use]
    pub fn applies_to(&self, securable_type: SecurableType) -> bool {
        self.applies_to
            .as_ref()
            .is_none_or(|set| set.contains(&securable_type))
    }
}

/// A tag that must be present after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTag {
    /// Tag key.
    pub key: String,
    /// Allowed values; `None` accepts any value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    /// Securable types the requirement applies to; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
    /// Custom message reported on violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RequiredTag {
    /// Requires `key` on the given types, any value.
    #[must_use]
    pub fn for_types(
        key: impl Into<String>,
        types: impl IntoIterator<Item = SecurableType>,
    ) -> Self {
        Self {
            key: key.into(),
            allowed_values: None,
            applies_to: Some(types.into_iter().collect()),
            error_message: None,
        }
    }

    /// Returns true when the requirement applies to the type.
    #[must_use]
    pub fn applies_to(&self, securable_type: SecurableType) -> bool {
        self.applies_to
            .as_ref()
            .is_none_or(|set| set.contains(&securable_type))
    }
}

/// Default ownership for one securable type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSpec {
    /// Principal type of the owner.
    #[serde(rename = "type")]
    pub principal_type: PrincipalType,
    /// Base principal name.
    pub name: String,
    /// Whether the owner name gets the environment suffix.
    #[serde(default = "default_true")]
    pub add_environment_suffix: bool,
}

fn default_true() -> bool {
    true
}

impl OwnershipSpec {
    /// Materializes the owner principal.
    #[must_use]
    pub fn to_principal(&self) -> Principal {
        let mut principal = match self.principal_type {
            PrincipalType::User => Principal::user(&self.name),
            PrincipalType::Group => Principal::group(&self.name),
            PrincipalType::ServicePrincipal => Principal::service_principal(&self.name),
        };
        principal.add_environment_suffix =
            self.add_environment_suffix && self.principal_type != PrincipalType::User;
        principal
    }
}

/// An ABAC policy template stamped onto matching containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbacPolicyTemplate {
    /// Container types the template applies to; `None` means schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
    /// The policy to attach.
    #[serde(flatten)]
    pub policy: AbacPolicy,
}

impl AbacPolicyTemplate {
    fn applies_to(&self, securable_type: SecurableType) -> bool {
        match &self.applies_to {
            Some(set) => set.contains(&securable_type),
            None => securable_type == SecurableType::Schema,
        }
    }
}

/// A structured finding from convention validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    /// The rule or check that was violated.
    pub rule: String,
    /// The resource the violation was found on (FQN).
    pub resource: String,
    /// Description of the violation.
    pub detail: String,
    /// Enforced violations are errors; advisory ones are warnings.
    pub severity: RuleMode,
}

/// Outcome of validating a subtree against a convention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Enforced violations.
    pub errors: Vec<RuleViolation>,
    /// Advisory violations.
    pub warnings: Vec<RuleViolation>,
}

impl ValidationReport {
    /// Returns true when no enforced violation was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, violation: RuleViolation) {
        match violation.severity {
            RuleMode::Enforced => self.errors.push(violation),
            RuleMode::Advisory => self.warnings.push(violation),
        }
    }
}

/// A named bundle of governance standards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Convention {
    /// Convention identifier, used in reports and logs.
    pub name: String,
    /// Tags applied when absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_tags: Vec<TagDefault>,
    /// Tags that must be present after defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<RequiredTag>,
    /// Naming configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming: Option<NamingSpec>,
    /// Default ownership per securable type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ownership: BTreeMap<SecurableType, OwnershipSpec>,
    /// Fallback ownership when no per-type entry matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ownership: Option<OwnershipSpec>,
    /// Governance rules evaluated by [`Convention::validate`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleSpec>,
    /// ABAC policy templates stamped onto matching containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abac_policies: Vec<AbacPolicyTemplate>,
    /// Per-environment value overrides merged into `default_tags`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_overrides: BTreeMap<Environment, BTreeMap<String, String>>,
    /// Tag keys whose drift is security-impactful (e.g. `pii`). Used by
    /// the drift detector to escalate severity.
    #[serde(default, skip_serializing_if = "std::collections::BTreeSet::is_empty")]
    pub security_sensitive_tags: std::collections::BTreeSet<String>,
}

impl Convention {
    /// Creates an empty convention with a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the default tag set for a securable type at `env`,
    /// environment overrides already merged.
    #[must_use]
    pub fn default_tags_for(&self, securable_type: SecurableType, env: Environment) -> TagSet {
        let overrides = self.tag_overrides.get(&env);
        let mut tags = TagSet::new();
        for default in &self.default_tags {
            if !default.applies_to(securable_type) {
                continue;
            }
            let value = overrides
                .and_then(|map| map.get(&default.key))
                .unwrap_or(&default.value);
            tags.insert(default.key.clone(), value.clone());
        }
        tags
    }

    /// Returns the required tags applying to a securable type.
    #[must_use]
    pub fn required_tags_for(&self, securable_type: SecurableType) -> Vec<&RequiredTag> {
        self.required_tags
            .iter()
            .filter(|required| required.applies_to(securable_type))
            .collect()
    }

    /// Generates a name from the naming pattern.
    ///
    /// # Errors
    ///
    /// Returns [`brickkit_core::Error::Validation`] when no naming
    /// configuration exists or the pattern cannot be filled.
    pub fn generate_name(
        &self,
        securable_type: SecurableType,
        base_name: &str,
        env: Environment,
    ) -> brickkit_core::Result<String> {
        let Some(naming) = &self.naming else {
            return Err(brickkit_core::Error::validation(
                "naming_pattern",
                base_name,
                format!("convention '{}' has no naming configuration", self.name),
            ));
        };
        naming.generate_name(securable_type, base_name, env)
    }

    /// Fills defaults on one resource. Idempotent; declared values win.
    pub fn apply_defaults(&self, resource: &mut Resource, env: Environment) {
        let securable_type = resource.securable_type();

        if resource.owner.is_none() {
            let ownership = self
                .ownership
                .get(&securable_type)
                .or(self.default_ownership.as_ref());
            if let Some(ownership) = ownership {
                resource.owner = Some(ownership.to_principal());
            }
        }

        let mut tags = TagSet::from_tags(&resource.tags);
        for (key, value) in self.default_tags_for(securable_type, env).iter() {
            tags.insert_if_absent(key, value);
        }
        resource.tags = tags.to_tags();

        if securable_type.is_container() {
            for template in &self.abac_policies {
                if !template.applies_to(securable_type) {
                    continue;
                }
                let already = resource
                    .abac_policies
                    .iter()
                    .any(|policy| policy.name == template.policy.name);
                if !already {
                    resource.abac_policies.push(template.policy.clone());
                }
            }
        }
    }

    /// Applies the convention to `root` and its descendants, and installs
    /// the attach hook so future children inherit it.
    ///
    /// Propagation copies the convention reference, not its contents:
    /// `self` must already be wrapped in an [`Arc`].
    pub fn apply_to(self: &Arc<Self>, tree: &mut ResourceTree, root: NodeId, env: Environment) {
        tracing::debug!(convention = %self.name, root = root.index(), "applying convention");
        for id in tree.subtree(root) {
            self.apply_defaults(tree.resource_mut(id), env);
        }
        tree.set_attach_hook(self.clone(), env);
    }

    /// Validates `root` and its descendants against required tags and the
    /// convention's rules.
    ///
    /// Deterministic: evaluating the same tree twice yields the same
    /// report. Enforced violations land in `errors`, advisory ones in
    /// `warnings`.
    ///
    /// # Errors
    ///
    /// Returns [`brickkit_core::Error::Validation`] when a rule spec
    /// references an unregistered rule.
    pub fn validate(
        &self,
        tree: &ResourceTree,
        root: NodeId,
        env: Environment,
        registry: &RulesRegistry,
    ) -> brickkit_core::Result<ValidationReport> {
        let mut report = ValidationReport::default();
        for id in tree.subtree(root) {
            let resource = tree.resource(id);
            let fqn = tree.fqn(id, env);
            let securable_type = resource.securable_type();
            let effective = tree.effective_tags(id);

            for required in self.required_tags_for(securable_type) {
                match effective.get(&required.key) {
                    None => report.push(RuleViolation {
                        rule: "require_tags".into(),
                        resource: fqn.clone(),
                        detail: required.error_message.clone().unwrap_or_else(|| {
                            format!("missing required tag: {}", required.key)
                        }),
                        severity: RuleMode::Enforced,
                    }),
                    Some(value) => {
                        if let Some(allowed) = &required.allowed_values {
                            if !allowed.iter().any(|candidate| candidate == value) {
                                report.push(RuleViolation {
                                    rule: "require_tags".into(),
                                    resource: fqn.clone(),
                                    detail: format!(
                                        "tag '{}' has value '{value}', allowed: {allowed:?}",
                                        required.key
                                    ),
                                    severity: RuleMode::Enforced,
                                });
                            }
                        }
                    }
                }
            }

            if let Some(naming) = &self.naming {
                if naming.applies_to(securable_type)
                    && !naming.validate_name(&resource.name)?
                {
                    report.push(RuleViolation {
                        rule: "naming_pattern".into(),
                        resource: fqn.clone(),
                        detail: format!(
                            "name '{}' violates the convention naming pattern",
                            resource.name
                        ),
                        severity: RuleMode::Enforced,
                    });
                }
            }

            for spec in &self.rules {
                let ctx = RuleContext {
                    resource,
                    tree,
                    id,
                    env,
                    params: &spec.params,
                };
                for detail in registry.evaluate(&spec.rule, &ctx)? {
                    report.push(RuleViolation {
                        rule: spec.rule.clone(),
                        resource: fqn.clone(),
                        detail,
                        severity: spec.mode,
                    });
                }
            }
        }
        Ok(report)
    }
}

impl AttachHook for Convention {
    fn on_attach(&self, resource: &mut Resource, env: Environment) {
        self.apply_defaults(resource, env);
    }
}
