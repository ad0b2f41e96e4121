//! Field-level diffing between declared and observed state.
//!
//! The differ compares a resource's *declared view* (effective values
//! after inheritance and convention defaults) against the observed
//! [`StateRecord`] and emits one [`Change`] per divergent field. An empty
//! change list means the resource is compliant.
//!
//! Fields only the backend can populate (ids, timestamps, properties) are
//! excluded from comparison. When the observed record is partial
//! (permission-denied fragments), removals are suppressed so unknown is
//! never treated as absent.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use brickkit_core::{
    Environment, NodeId, Privilege, Resource, ResourceKind, ResourceTree, SecurableType, TagSet,
};
use brickkit_convention::Convention;

use crate::backend::{GrantMap, PolicyRecord, StateRecord};

/// What a change does to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Field (or element) is declared but not observed.
    Add,
    /// Field (or element) is observed but not declared.
    Remove,
    /// Field differs between declared and observed.
    Modify,
}

/// One field-level divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Dotted field path (`owner`, `tag.pii`, `grant.alice.SELECT`, …).
    pub field_path: String,
    /// Declared value, `null` for removals.
    pub declared: Value,
    /// Observed value, `null` for additions.
    pub observed: Value,
    /// What the reconciler must do.
    pub action: ChangeAction,
}

impl Change {
    fn add(field_path: impl Into<String>, declared: Value) -> Self {
        Self {
            field_path: field_path.into(),
            declared,
            observed: Value::Null,
            action: ChangeAction::Add,
        }
    }

    fn remove(field_path: impl Into<String>, observed: Value) -> Self {
        Self {
            field_path: field_path.into(),
            declared: Value::Null,
            observed,
            action: ChangeAction::Remove,
        }
    }

    fn modify(field_path: impl Into<String>, declared: Value, observed: Value) -> Self {
        Self {
            field_path: field_path.into(),
            declared,
            observed,
            action: ChangeAction::Modify,
        }
    }
}

/// The diff of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Securable type.
    pub securable_type: SecurableType,
    /// Fully qualified name.
    pub resource_name: String,
    /// Field-level changes; empty means compliant.
    pub changes: Vec<Change>,
}

impl Diff {
    /// Returns true when declared and observed agree.
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns true when the resource must be created.
    #[must_use]
    pub fn needs_create(&self) -> bool {
        self.changes
            .iter()
            .any(|change| change.field_path == "resource" && change.action == ChangeAction::Add)
    }
}

/// A resource's effective declared values, ready for comparison.
#[derive(Debug, Clone)]
pub struct DeclaredState {
    /// Environment the view was resolved for.
    pub env: Environment,
    /// Securable type.
    pub securable_type: SecurableType,
    /// Fully qualified name.
    pub full_name: String,
    /// Whether this is a reference to an externally-managed securable.
    pub reference: bool,
    /// Resolved effective owner.
    pub owner: Option<String>,
    /// Declared comment.
    pub comment: Option<String>,
    /// Effective tags, convention defaults included.
    pub tags: TagSet,
    /// Effective grants by resolved principal.
    pub grants: GrantMap,
    /// Declared isolation mode.
    pub isolation_mode: Option<brickkit_core::IsolationMode>,
    /// Declared workspace bindings.
    pub workspace_bindings: Vec<brickkit_core::WorkspaceBinding>,
    /// Declared row filter, for tables.
    pub row_filter: Option<brickkit_core::RowFilterSpec>,
    /// Declared column masks, for tables.
    pub column_masks: Vec<brickkit_core::ColumnMaskSpec>,
    /// Declared ABAC policies in backend form, for containers.
    pub policies: Vec<PolicyRecord>,
    /// The raw declared resource.
    pub resource: Resource,
}

/// Builds the declared view of one node.
///
/// Effective owner/tags/grants come from the ancestor walk; convention
/// defaults for the securable type count as declared even when the user
/// did not attach them, so a drifted default is forced back through the
/// convention.
#[must_use]
pub fn declared_state(
    tree: &ResourceTree,
    id: NodeId,
    env: Environment,
    convention: Option<&Convention>,
) -> DeclaredState {
    let resource = tree.resource(id);
    let securable_type = resource.securable_type();

    let mut tags = convention
        .map(|c| c.default_tags_for(securable_type, env))
        .unwrap_or_default();
    tags = tags.merged_with(&tree.effective_tags(id));

    let mut grants: GrantMap = GrantMap::new();
    for grant in tree.effective_grants(id, env) {
        let entry = grants
            .entry(grant.principal.resolved_name(env))
            .or_default();
        entry.extend(expand_privileges(&grant.privileges, securable_type));
    }

    let (row_filter, column_masks) = match &resource.kind {
        ResourceKind::Table(spec) => (spec.row_filter.clone(), spec.column_masks.clone()),
        _ => (None, Vec::new()),
    };

    let policies = resource
        .abac_policies
        .iter()
        .map(|policy| PolicyRecord {
            name: policy.name.clone(),
            policy_type: policy.policy_type,
            function_ref: policy.function_ref.clone(),
            target_principals: policy
                .target_principals
                .iter()
                .map(|p| p.resolved_name(env))
                .collect(),
            except_principals: policy
                .except_principals
                .iter()
                .map(|p| p.resolved_name(env))
                .collect(),
            match_conditions: policy.match_conditions.clone(),
            target_column: policy.target_column.clone(),
        })
        .collect();

    DeclaredState {
        env,
        securable_type,
        full_name: tree.fqn(id, env),
        reference: resource.reference,
        owner: tree.effective_owner(id).map(|p| p.resolved_name(env)),
        comment: resource.comment.clone(),
        tags,
        grants,
        isolation_mode: resource.isolation_mode,
        workspace_bindings: resource.workspace_bindings.clone(),
        row_filter,
        column_masks,
        policies,
        resource: resource.clone(),
    }
}

fn expand_privileges(
    privileges: &BTreeSet<Privilege>,
    securable_type: SecurableType,
) -> BTreeSet<Privilege> {
    let mut expanded = BTreeSet::new();
    for privilege in privileges {
        if *privilege == Privilege::AllPrivileges {
            expanded.extend(Privilege::all_privileges_expansion(securable_type));
        } else {
            expanded.insert(*privilege);
        }
    }
    expanded
}

/// Computes the field-level diff for one resource.
#[must_use]
pub fn diff_resource(declared: &DeclaredState, observed: Option<&StateRecord>) -> Diff {
    let mut changes = Vec::new();

    let Some(observed) = observed else {
        changes.push(Change::add(
            "resource",
            Value::String(declared.full_name.clone()),
        ));
        return Diff {
            securable_type: declared.securable_type,
            resource_name: declared.full_name.clone(),
            changes,
        };
    };

    if let Some(owner) = &declared.owner {
        if observed.owner.as_deref() != Some(owner.as_str()) {
            changes.push(Change::modify(
                "owner",
                Value::String(owner.clone()),
                observed
                    .owner
                    .clone()
                    .map_or(Value::Null, Value::String),
            ));
        }
    }

    if let Some(comment) = &declared.comment {
        if observed.comment.as_deref() != Some(comment.as_str()) {
            changes.push(Change::modify(
                "comment",
                Value::String(comment.clone()),
                observed
                    .comment
                    .clone()
                    .map_or(Value::Null, Value::String),
            ));
        }
    }

    diff_tags(declared, observed, &mut changes);
    diff_grants(declared, observed, &mut changes);

    if let Some(mode) = declared.isolation_mode {
        if observed.isolation_mode != Some(mode) {
            changes.push(Change::modify(
                "isolation_mode",
                serde_json::to_value(mode).unwrap_or_default(),
                serde_json::to_value(observed.isolation_mode).unwrap_or_default(),
            ));
        }
    }
    diff_bindings(declared, observed, &mut changes);
    diff_row_filter(declared, observed, &mut changes);
    diff_column_masks(declared, observed, &mut changes);
    diff_policies(declared, observed, &mut changes);

    Diff {
        securable_type: declared.securable_type,
        resource_name: declared.full_name.clone(),
        changes,
    }
}

fn diff_tags(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    for (key, value) in declared.tags.iter() {
        match observed.tags.get(key) {
            None => changes.push(Change::add(
                format!("tag.{key}"),
                Value::String(value.to_string()),
            )),
            Some(observed_value) if observed_value != value => changes.push(Change::modify(
                format!("tag.{key}"),
                Value::String(value.to_string()),
                Value::String(observed_value.to_string()),
            )),
            Some(_) => {}
        }
    }
    if !observed.partial {
        for (key, value) in observed.tags.iter() {
            if !declared.tags.contains_key(key) {
                changes.push(Change::remove(
                    format!("tag.{key}"),
                    Value::String(value.to_string()),
                ));
            }
        }
    }
}

fn diff_grants(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    for (principal, privileges) in &declared.grants {
        let observed_privileges = observed.grants.get(principal);
        for privilege in privileges {
            let present = observed_privileges.is_some_and(|set| set.contains(privilege));
            if !present {
                changes.push(Change::add(
                    format!("grant.{principal}.{privilege}"),
                    Value::String(privilege.as_str().to_string()),
                ));
            }
        }
    }
    if !observed.partial {
        for (principal, privileges) in &observed.grants {
            let declared_privileges = declared.grants.get(principal);
            for privilege in privileges {
                let wanted = declared_privileges.is_some_and(|set| set.contains(privilege));
                if !wanted {
                    changes.push(Change::remove(
                        format!("grant.{principal}.{privilege}"),
                        Value::String(privilege.as_str().to_string()),
                    ));
                }
            }
        }
    }
}

fn diff_bindings(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    let declared_set: BTreeSet<_> = declared.workspace_bindings.iter().copied().collect();
    let observed_set: BTreeSet<_> = observed.workspace_bindings.iter().copied().collect();
    for binding in declared_set.difference(&observed_set) {
        changes.push(Change::add(
            format!("workspace_binding.{}", binding.workspace_id),
            serde_json::to_value(binding).unwrap_or_default(),
        ));
    }
    if !observed.partial {
        for binding in observed_set.difference(&declared_set) {
            changes.push(Change::remove(
                format!("workspace_binding.{}", binding.workspace_id),
                serde_json::to_value(binding).unwrap_or_default(),
            ));
        }
    }
}

fn diff_row_filter(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    match (&declared.row_filter, &observed.row_filter) {
        (Some(declared_filter), Some(observed_filter)) if declared_filter != observed_filter => {
            // Replacement is expressed as remove + add in one run.
            changes.push(Change::remove(
                "row_filter",
                serde_json::to_value(observed_filter).unwrap_or_default(),
            ));
            changes.push(Change::add(
                "row_filter",
                serde_json::to_value(declared_filter).unwrap_or_default(),
            ));
        }
        (Some(declared_filter), None) => changes.push(Change::add(
            "row_filter",
            serde_json::to_value(declared_filter).unwrap_or_default(),
        )),
        (None, Some(observed_filter)) if !observed.partial => changes.push(Change::remove(
            "row_filter",
            serde_json::to_value(observed_filter).unwrap_or_default(),
        )),
        _ => {}
    }
}

fn diff_column_masks(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    for mask in &declared.column_masks {
        let observed_mask = observed
            .column_masks
            .iter()
            .find(|candidate| candidate.column == mask.column);
        match observed_mask {
            None => changes.push(Change::add(
                format!("column_mask.{}", mask.column),
                serde_json::to_value(mask).unwrap_or_default(),
            )),
            Some(observed_mask) if observed_mask != mask => {
                changes.push(Change::remove(
                    format!("column_mask.{}", mask.column),
                    serde_json::to_value(observed_mask).unwrap_or_default(),
                ));
                changes.push(Change::add(
                    format!("column_mask.{}", mask.column),
                    serde_json::to_value(mask).unwrap_or_default(),
                ));
            }
            Some(_) => {}
        }
    }
    if !observed.partial {
        for mask in &observed.column_masks {
            if !declared
                .column_masks
                .iter()
                .any(|candidate| candidate.column == mask.column)
            {
                changes.push(Change::remove(
                    format!("column_mask.{}", mask.column),
                    serde_json::to_value(mask).unwrap_or_default(),
                ));
            }
        }
    }
}

fn diff_policies(declared: &DeclaredState, observed: &StateRecord, changes: &mut Vec<Change>) {
    for policy in &declared.policies {
        let observed_policy = observed
            .policies
            .iter()
            .find(|candidate| candidate.name == policy.name);
        match observed_policy {
            None => changes.push(Change::add(
                format!("abac_policy.{}", policy.name),
                serde_json::to_value(policy).unwrap_or_default(),
            )),
            Some(observed_policy) if observed_policy != policy => {
                changes.push(Change::remove(
                    format!("abac_policy.{}", policy.name),
                    serde_json::to_value(observed_policy).unwrap_or_default(),
                ));
                changes.push(Change::add(
                    format!("abac_policy.{}", policy.name),
                    serde_json::to_value(policy).unwrap_or_default(),
                ));
            }
            Some(_) => {}
        }
    }
    if !observed.partial {
        for policy in &observed.policies {
            if !declared
                .policies
                .iter()
                .any(|candidate| candidate.name == policy.name)
            {
                changes.push(Change::remove(
                    format!("abac_policy.{}", policy.name),
                    serde_json::to_value(policy).unwrap_or_default(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickkit_core::{Grant, Principal, Resource, Tag};

    const ENV: Environment = Environment::Dev;

    fn schema_tree() -> (ResourceTree, NodeId) {
        let mut tree = ResourceTree::new();
        let catalog = tree.add_root(Resource::catalog("analytics"), ENV).unwrap();
        let schema = tree
            .attach_child(catalog, Resource::schema("customers"), ENV)
            .unwrap();
        (tree, schema)
    }

    #[test]
    fn absent_observed_state_yields_create() {
        let (tree, schema) = schema_tree();
        let declared = declared_state(&tree, schema, ENV, None);
        let diff = diff_resource(&declared, None);
        assert!(diff.needs_create());
        assert_eq!(diff.changes.len(), 1);
    }

    #[test]
    fn grant_diff_adds_missing_and_removes_extra() {
        let (mut tree, schema) = schema_tree();
        tree.resource_mut(schema).grants.push(Grant::new(
            Principal::user("alice@example.com"),
            [Privilege::Select, Privilege::Modify],
        ));
        tree.resource_mut(schema).grants.push(Grant::new(
            Principal::user("bob@example.com"),
            [Privilege::Select],
        ));

        let mut observed = StateRecord::named(SecurableType::Schema, "analytics_dev.customers_dev");
        observed
            .grants
            .entry("alice@example.com".into())
            .or_default()
            .insert(Privilege::Select);
        observed
            .grants
            .entry("carol@example.com".into())
            .or_default()
            .insert(Privilege::Select);

        let declared = declared_state(&tree, schema, ENV, None);
        let diff = diff_resource(&declared, Some(&observed));

        let adds: Vec<_> = diff
            .changes
            .iter()
            .filter(|c| c.action == ChangeAction::Add)
            .map(|c| c.field_path.as_str())
            .collect();
        let removes: Vec<_> = diff
            .changes
            .iter()
            .filter(|c| c.action == ChangeAction::Remove)
            .map(|c| c.field_path.as_str())
            .collect();
        assert_eq!(
            adds,
            vec![
                "grant.alice@example.com.MODIFY",
                "grant.bob@example.com.SELECT"
            ]
        );
        assert_eq!(removes, vec!["grant.carol@example.com.SELECT"]);
    }

    #[test]
    fn convention_defaults_count_as_declared() {
        use brickkit_convention::TagDefault;
        let (tree, schema) = schema_tree();
        let convention = Convention {
            default_tags: vec![TagDefault::all("managed_by", "brickkit")],
            ..Convention::named("defaults")
        };
        // Convention not applied to the tree: the differ itself must
        // still treat the default as declared.
        let declared = declared_state(&tree, schema, ENV, Some(&convention));
        let observed = StateRecord::named(SecurableType::Schema, "analytics_dev.customers_dev");
        let diff = diff_resource(&declared, Some(&observed));
        assert!(diff
            .changes
            .iter()
            .any(|c| c.field_path == "tag.managed_by" && c.action == ChangeAction::Add));
    }

    #[test]
    fn partial_records_suppress_removals() {
        let (mut tree, schema) = schema_tree();
        tree.resource_mut(schema).tags.push(Tag::new("team", "quant"));
        let declared = declared_state(&tree, schema, ENV, None);

        let mut observed = StateRecord::named(SecurableType::Schema, "analytics_dev.customers_dev");
        observed.tags.insert("stray", "value");
        observed.partial = true;
        let diff = diff_resource(&declared, Some(&observed));
        assert!(diff
            .changes
            .iter()
            .all(|c| c.action != ChangeAction::Remove));
    }

    #[test]
    fn row_filter_replacement_is_remove_then_add() {
        use brickkit_core::{RowFilterSpec, TableSpec};
        let mut tree = ResourceTree::new();
        let catalog = tree.add_root(Resource::catalog("analytics"), ENV).unwrap();
        let schema = tree
            .attach_child(catalog, Resource::schema("customers"), ENV)
            .unwrap();
        let table = tree
            .attach_child(
                schema,
                Resource::table(
                    "orders",
                    TableSpec {
                        row_filter: Some(RowFilterSpec {
                            function: "new_filter".into(),
                            input_columns: vec![],
                        }),
                        ..TableSpec::default()
                    },
                ),
                ENV,
            )
            .unwrap();

        let declared = declared_state(&tree, table, ENV, None);
        let mut observed = StateRecord::named(
            SecurableType::Table,
            "analytics_dev.customers_dev.orders_dev",
        );
        observed.row_filter = Some(RowFilterSpec {
            function: "old_filter".into(),
            input_columns: vec![],
        });
        let diff = diff_resource(&declared, Some(&observed));
        let actions: Vec<_> = diff
            .changes
            .iter()
            .filter(|c| c.field_path == "row_filter")
            .map(|c| c.action)
            .collect();
        assert_eq!(actions, vec![ChangeAction::Remove, ChangeAction::Add]);
    }

    #[test]
    fn identical_states_are_compliant() {
        let (mut tree, schema) = schema_tree();
        tree.resource_mut(schema).tags.push(Tag::new("team", "quant"));
        let declared = declared_state(&tree, schema, ENV, None);
        let mut observed = StateRecord::named(SecurableType::Schema, declared.full_name.clone());
        observed.tags.insert("team", "quant");
        let diff = diff_resource(&declared, Some(&observed));
        assert!(diff.is_compliant());
    }
}
