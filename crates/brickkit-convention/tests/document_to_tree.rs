//! Convention-document → tree application contract.
//!
//! Loads a YAML document, resolves it against the default rule registry,
//! applies it to a declared tree, and checks the combined outcome:
//! ownership defaults, merged tags, generated names, and validation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use brickkit_core::{
    set_environment, Environment, PrincipalType, Resource, ResourceTree, SecurableType, TableSpec,
    TagSet,
};
use brickkit_convention::{ConventionDocument, RulesRegistry};

const DOC: &str = r#"
convention: trading_standards

naming:
  pattern: "{team}_{acronym}_{name}"
  team: quant
  validation_pattern: "^[a-z][a-z0-9_]*$"

ownership:
  catalog: { type: SERVICE_PRINCIPAL, name: spn_trading }
  default: { type: GROUP, name: grp_quant }

rules:
  - rule: catalog_must_have_sp_owner
    mode: enforced
  - rule: require_tags
    tags: [cost_center]
    mode: advisory

tags:
  cost_center: CC-TRD-4521

tag_overrides:
  acc:
    cost_center: CC-TRD-ACC
"#;

#[test]
fn document_drives_defaults_and_validation() {
    set_environment(Environment::Dev);
    let env = Environment::Dev;
    let registry = RulesRegistry::default();
    let convention = Arc::new(
        ConventionDocument::from_yaml(DOC)
            .unwrap()
            .into_convention(&registry)
            .unwrap(),
    );

    let mut tree = ResourceTree::new();
    let catalog = tree.add_root(Resource::catalog("risk"), env).unwrap();
    let schema = tree
        .attach_child(catalog, Resource::schema("positions"), env)
        .unwrap();
    convention.apply_to(&mut tree, catalog, env);

    // Ownership defaults: catalog gets the service principal, schema the
    // group fallback.
    let catalog_owner = tree.resource(catalog).owner.as_ref().unwrap();
    assert_eq!(catalog_owner.principal_type, PrincipalType::ServicePrincipal);
    assert_eq!(catalog_owner.resolved_name(env), "spn_trading_dev");
    let schema_owner = tree.resource(schema).owner.as_ref().unwrap();
    assert_eq!(schema_owner.resolved_name(env), "grp_quant_dev");

    // Flat document tags apply everywhere; children attached later
    // inherit through the hook.
    let table = tree
        .attach_child(schema, Resource::table("orders", TableSpec::default()), env)
        .unwrap();
    let tags = TagSet::from_tags(&tree.resource(table).tags);
    assert_eq!(tags.get("cost_center"), Some("CC-TRD-4521"));

    // Environment overrides change the default value per environment.
    let acc_defaults = convention.default_tags_for(SecurableType::Table, Environment::Acc);
    assert_eq!(acc_defaults.get("cost_center"), Some("CC-TRD-ACC"));

    // Generated names follow the pattern.
    assert_eq!(
        convention
            .generate_name(SecurableType::Catalog, "risk", env)
            .unwrap(),
        "quant_cat_risk"
    );

    // Validation passes: the SP owner rule is satisfied by the default
    // owner the convention itself applied.
    let report = convention.validate(&tree, catalog, env, &registry).unwrap();
    assert!(report.is_ok(), "{report:?}");
}

#[test]
fn enforced_rule_failure_surfaces_after_manual_override() {
    let env = Environment::Dev;
    let registry = RulesRegistry::default();
    let convention = Arc::new(
        ConventionDocument::from_yaml(DOC)
            .unwrap()
            .into_convention(&registry)
            .unwrap(),
    );

    let mut tree = ResourceTree::new();
    let catalog = tree
        .add_root(
            Resource::catalog("risk")
                .with_owner(brickkit_core::Principal::user("alice@example.com")),
            env,
        )
        .unwrap();
    convention.apply_to(&mut tree, catalog, env);

    // The declared user owner wins over the convention default, which the
    // enforced rule then rejects.
    let report = convention.validate(&tree, catalog, env, &registry).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.errors[0].rule, "catalog_must_have_sp_owner");
    // The advisory rule lands in warnings, not errors.
    assert!(report
        .warnings
        .iter()
        .all(|violation| violation.rule == "require_tags"));
}
