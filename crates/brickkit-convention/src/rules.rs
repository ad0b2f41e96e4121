//! Governance rule registry.
//!
//! Rules are named predicates evaluated against a resource in its tree
//! context. Conventions reference rules by name; the registry maps names
//! to implementations. Four rules ship built in, and callers may register
//! their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use brickkit_core::{
    Environment, Error, NodeId, PrincipalType, Resource, ResourceTree, Result, SecurableType,
};

/// Execution mode of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// Violations are returned as errors.
    #[default]
    Enforced,
    /// Violations are returned as warnings.
    Advisory,
}

/// Parameters a convention passes to a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleParams {
    /// Tag keys, for `require_tags`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Regex pattern, for `naming_pattern`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Securable types the rule applies to; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<BTreeSet<SecurableType>>,
}

/// A rule invocation inside a convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Registered rule name.
    pub rule: String,
    /// Enforced or advisory.
    #[serde(default)]
    pub mode: RuleMode,
    /// Rule parameters.
    #[serde(flatten)]
    pub params: RuleParams,
}

/// Everything a rule may inspect.
pub struct RuleContext<'a> {
    /// The resource under evaluation.
    pub resource: &'a Resource,
    /// The tree the resource belongs to.
    pub tree: &'a ResourceTree,
    /// The resource's node id.
    pub id: NodeId,
    /// Current environment.
    pub env: Environment,
    /// Parameters from the rule spec.
    pub params: &'a RuleParams,
}

/// A rule implementation: returns one message per violation.
pub type RuleFn = Arc<dyn Fn(&RuleContext<'_>) -> Vec<String> + Send + Sync>;

/// Registry mapping rule names to implementations.
#[derive(Clone)]
pub struct RulesRegistry {
    rules: BTreeMap<String, RuleFn>,
}

impl std::fmt::Debug for RulesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RulesRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) a rule under `name`.
    pub fn register(&mut self, name: impl Into<String>, rule: RuleFn) {
        self.rules.insert(name.into(), rule);
    }

    /// Looks up a rule by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown rule names.
    pub fn get(&self, name: &str) -> Result<&RuleFn> {
        self.rules.get(name).ok_or_else(|| {
            Error::validation(
                "unknown_rule",
                name,
                format!(
                    "rule '{name}' is not registered; known rules: {}",
                    self.rules.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
        })
    }

    /// Evaluates a rule by name against a context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown rule names.
    pub fn evaluate(&self, name: &str, ctx: &RuleContext<'_>) -> Result<Vec<String>> {
        let rule = self.get(name)?;
        Ok(rule.as_ref()(ctx))
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Lists registered rule names.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}

impl Default for RulesRegistry {
    /// Builds a registry with the built-in rules.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("catalog_must_have_sp_owner", Arc::new(catalog_must_have_sp_owner));
        registry.register("owner_must_be_sp_or_group", Arc::new(owner_must_be_sp_or_group));
        registry.register("require_tags", Arc::new(require_tags));
        registry.register("naming_pattern", Arc::new(naming_pattern));
        registry
    }
}

fn applies(ctx: &RuleContext<'_>) -> bool {
    ctx.params
        .applies_to
        .as_ref()
        .is_none_or(|set| set.contains(&ctx.resource.securable_type()))
}

fn catalog_must_have_sp_owner(ctx: &RuleContext<'_>) -> Vec<String> {
    if ctx.resource.securable_type() != SecurableType::Catalog {
        return Vec::new();
    }
    match ctx.tree.effective_owner(ctx.id) {
        Some(owner) if owner.principal_type == PrincipalType::ServicePrincipal => Vec::new(),
        Some(owner) => vec![format!(
            "catalog owner '{}' is a {}, expected a service principal",
            owner.name,
            owner.principal_type.as_str()
        )],
        None => vec!["catalog has no owner; a service principal owner is required".to_string()],
    }
}

fn owner_must_be_sp_or_group(ctx: &RuleContext<'_>) -> Vec<String> {
    if !applies(ctx) {
        return Vec::new();
    }
    match ctx.tree.effective_owner(ctx.id) {
        Some(owner) if owner.principal_type == PrincipalType::User => vec![format!(
            "owner '{}' is an individual user; use a group or service principal",
            owner.name
        )],
        _ => Vec::new(),
    }
}

fn require_tags(ctx: &RuleContext<'_>) -> Vec<String> {
    if !applies(ctx) {
        return Vec::new();
    }
    let effective = ctx.tree.effective_tags(ctx.id);
    ctx.params
        .tags
        .iter()
        .filter(|key| !effective.contains_key(key))
        .map(|key| format!("missing required tag: {key}"))
        .collect()
}

fn naming_pattern(ctx: &RuleContext<'_>) -> Vec<String> {
    if !applies(ctx) {
        return Vec::new();
    }
    let Some(pattern) = &ctx.params.pattern else {
        return vec!["naming_pattern rule configured without a pattern".to_string()];
    };
    match Regex::new(pattern) {
        Ok(regex) if regex.is_match(&ctx.resource.name) => Vec::new(),
        Ok(_) => vec![format!(
            "name '{}' does not match pattern '{pattern}'",
            ctx.resource.name
        )],
        Err(e) => vec![format!("invalid naming pattern '{pattern}': {e}")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickkit_core::Principal;

    const ENV: Environment = Environment::Dev;

    fn catalog_tree(owner: Principal) -> (ResourceTree, NodeId) {
        let mut tree = ResourceTree::new();
        let id = tree
            .add_root(Resource::catalog("analytics").with_owner(owner), ENV)
            .unwrap();
        (tree, id)
    }

    fn eval(registry: &RulesRegistry, name: &str, tree: &ResourceTree, id: NodeId, params: &RuleParams) -> Vec<String> {
        let ctx = RuleContext {
            resource: tree.resource(id),
            tree,
            id,
            env: ENV,
            params,
        };
        registry.evaluate(name, &ctx).unwrap()
    }

    #[test]
    fn sp_owner_rule_flags_user_and_group_owners() {
        let registry = RulesRegistry::default();
        let params = RuleParams::default();

        let (tree, id) = catalog_tree(Principal::user("alice@example.com"));
        assert_eq!(eval(&registry, "catalog_must_have_sp_owner", &tree, id, &params).len(), 1);

        let (tree, id) = catalog_tree(Principal::group("data_owners"));
        assert_eq!(eval(&registry, "catalog_must_have_sp_owner", &tree, id, &params).len(), 1);

        let (tree, id) = catalog_tree(Principal::service_principal("spn_platform"));
        assert!(eval(&registry, "catalog_must_have_sp_owner", &tree, id, &params).is_empty());
    }

    #[test]
    fn require_tags_checks_effective_tags() {
        let registry = RulesRegistry::default();
        let params = RuleParams {
            tags: vec!["cost_center".into(), "team".into()],
            ..RuleParams::default()
        };
        let mut tree = ResourceTree::new();
        let id = tree
            .add_root(Resource::catalog("analytics").with_tag("team", "quant"), ENV)
            .unwrap();
        let violations = eval(&registry, "require_tags", &tree, id, &params);
        assert_eq!(violations, vec!["missing required tag: cost_center"]);
    }

    #[test]
    fn naming_pattern_matches_base_name() {
        let registry = RulesRegistry::default();
        let params = RuleParams {
            pattern: Some(r"^[a-z][a-z0-9_]*$".into()),
            ..RuleParams::default()
        };
        let (tree, id) = catalog_tree(Principal::group("g"));
        assert!(eval(&registry, "naming_pattern", &tree, id, &params).is_empty());
    }

    #[test]
    fn unknown_rule_is_a_load_error() {
        let registry = RulesRegistry::default();
        assert!(registry.get("require_rfa").is_err());
    }

    #[test]
    fn custom_rules_can_be_registered() {
        let mut registry = RulesRegistry::default();
        registry.register(
            "no_tmp_names",
            Arc::new(|ctx: &RuleContext<'_>| {
                if ctx.resource.name.starts_with("tmp_") {
                    vec!["temporary names are not allowed".to_string()]
                } else {
                    Vec::new()
                }
            }),
        );
        assert!(registry.has_rule("no_tmp_names"));
    }
}
