//! The declared resource hierarchy.
//!
//! Resources live in an arena indexed by [`NodeId`]; parent links are set
//! exactly once at attach time, which makes cycles unrepresentable.
//! Effective state (owner, tags, grants, location) is computed by ancestor
//! walk on demand — raw declarations are never mutated by inheritance.
//!
//! A tree may carry an attach hook: once a convention has been applied to
//! the tree, every subsequently attached child passes through the hook so
//! new resources pick up the same defaults.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::abac::AbacPolicyType;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::grant::Grant;
use crate::principal::Principal;
use crate::resource::{Resource, ResourceKind};
use crate::tag::TagSet;

/// Index of a resource inside a [`ResourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Hook invoked for every resource added to the tree.
///
/// The convention engine implements this to auto-apply defaults to
/// children attached after the convention was applied.
pub trait AttachHook: Send + Sync {
    /// Applies defaults to a freshly attached resource.
    fn on_attach(&self, resource: &mut Resource, env: Environment);
}

/// The declared resource hierarchy of one reconciliation run.
#[derive(Default)]
pub struct ResourceTree {
    nodes: Vec<Resource>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    attach_hook: Option<Arc<dyn AttachHook>>,
}

impl std::fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTree")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots.len())
            .field("has_attach_hook", &self.attach_hook.is_some())
            .finish()
    }
}

impl ResourceTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the attach hook and replays it over every existing node.
    pub fn set_attach_hook(&mut self, hook: Arc<dyn AttachHook>, env: Environment) {
        for resource in &mut self.nodes {
            hook.on_attach(resource, env);
        }
        self.attach_hook = Some(hook);
    }

    /// Adds a root resource (metastore, top-level infrastructure, or a
    /// catalog declared without an explicit metastore).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the resource fails standalone
    /// validation or duplicates an existing FQN.
    pub fn add_root(&mut self, resource: Resource, env: Environment) -> Result<NodeId> {
        resource.validate()?;
        self.insert(resource, None, env)
    }

    /// Attaches a child under `parent`, fixing up linkage fields.
    ///
    /// The child's `catalog_name`/`schema_name` are derived from the
    /// parent chain; declaring a child under a reference parent is
    /// allowed (the parent is required to exist, not created).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the child's type is not a valid
    /// child of the parent's type, when the child fails standalone
    /// validation, or when the resulting FQN already exists.
    pub fn attach_child(
        &mut self,
        parent: NodeId,
        mut child: Resource,
        env: Environment,
    ) -> Result<NodeId> {
        child.validate()?;
        let parent_resource = self.resource(parent);
        let parent_type = parent_resource.securable_type();
        if !child.securable_type().valid_parents().contains(&parent_type) {
            return Err(Error::validation(
                "parent_child_type",
                &child.name,
                format!(
                    "{} cannot be a child of {parent_type}",
                    child.securable_type()
                ),
            ));
        }
        match parent_resource.kind {
            ResourceKind::Catalog(_) => {
                child.catalog_name = Some(parent_resource.name.clone());
                child.schema_name = None;
            }
            ResourceKind::Schema(_) => {
                child.catalog_name = parent_resource.catalog_name.clone();
                child.schema_name = Some(parent_resource.name.clone());
            }
            _ => {}
        }
        self.insert(child, Some(parent.0), env)
    }

    fn insert(&mut self, mut resource: Resource, parent: Option<usize>, env: Environment) -> Result<NodeId> {
        if let Some(hook) = &self.attach_hook {
            hook.on_attach(&mut resource, env);
        }
        self.nodes.push(resource);
        self.parents.push(parent);
        self.children.push(Vec::new());
        let index = self.nodes.len() - 1;
        match parent {
            Some(parent_index) => self.children[parent_index].push(index),
            None => self.roots.push(index),
        }
        let id = NodeId(index);
        let fqn = self.fqn(id, env);
        for other in 0..index {
            if self.fqn(NodeId(other), env) == fqn {
                // Roll the insertion back before reporting.
                self.nodes.pop();
                self.parents.pop();
                self.children.pop();
                match parent {
                    Some(parent_index) => {
                        self.children[parent_index].pop();
                    }
                    None => {
                        self.roots.pop();
                    }
                }
                return Err(Error::validation(
                    "fqn_unique",
                    fqn,
                    "fully qualified name already declared",
                ));
            }
        }
        Ok(id)
    }

    /// Returns the resource at `id`.
    ///
    /// # Panics
    ///
    /// Never panics for ids produced by this tree.
    #[must_use]
    pub fn resource(&self, id: NodeId) -> &Resource {
        &self.nodes[id.0]
    }

    /// Returns a mutable reference to the resource at `id`.
    #[must_use]
    pub fn resource_mut(&mut self, id: NodeId) -> &mut Resource {
        &mut self.nodes[id.0]
    }

    /// Returns the parent of `id`, if any.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.0].map(NodeId)
    }

    /// Returns the children of `id` in attach order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.children[id.0].iter().copied().map(NodeId).collect()
    }

    /// Returns the root ids in attach order.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        self.roots.iter().copied().map(NodeId).collect()
    }

    /// Iterates over every node id in attach order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Returns `root` followed by all descendants, pre-order.
    #[must_use]
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        let mut stack = vec![root.0];
        while let Some(index) = stack.pop() {
            ordered.push(NodeId(index));
            // Reverse keeps pre-order matching attach order.
            for child in self.children[index].iter().rev() {
                stack.push(*child);
            }
        }
        ordered
    }

    /// Computes the fully qualified, environment-resolved dotted name.
    ///
    /// Metastores and top-level infrastructure are not part of the dotted
    /// path; the FQN of a catalog is its own resolved name.
    #[must_use]
    pub fn fqn(&self, id: NodeId, env: Environment) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            let resource = &self.nodes[index];
            if !matches!(resource.kind, ResourceKind::Metastore(_)) {
                segments.push(resource.resolved_name(env));
            }
            cursor = self.parents[index];
        }
        segments.reverse();
        segments.join(".")
    }

    /// Returns the effective owner: the resource's own, or the nearest
    /// ancestor's.
    #[must_use]
    pub fn effective_owner(&self, id: NodeId) -> Option<&Principal> {
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            if let Some(owner) = &self.nodes[index].owner {
                return Some(owner);
            }
            cursor = self.parents[index];
        }
        None
    }

    /// Returns the effective storage location: the resource's own, or the
    /// nearest ancestor's.
    #[must_use]
    pub fn effective_location(&self, id: NodeId) -> Option<String> {
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            if let Some(location) = self.nodes[index].kind.storage_location() {
                return Some(location.to_string());
            }
            cursor = self.parents[index];
        }
        None
    }

    /// Returns the effective tag set: ancestor tags merged root-down with
    /// descendants overriding on identical keys.
    #[must_use]
    pub fn effective_tags(&self, id: NodeId) -> TagSet {
        let mut chain = Vec::new();
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            chain.push(index);
            cursor = self.parents[index];
        }
        let mut tags = TagSet::new();
        for index in chain.into_iter().rev() {
            tags = tags.merged_with(&TagSet::from_tags(&self.nodes[index].tags));
        }
        tags
    }

    /// Returns the effective grants for `id` at `env`.
    ///
    /// Every ancestor grant applies to the descendant unless the
    /// descendant declares its own grant for the same principal, which
    /// overrides the inherited set wholesale. Privileges are filtered to
    /// those valid on the descendant's securable type.
    #[must_use]
    pub fn effective_grants(&self, id: NodeId, env: Environment) -> Vec<Grant> {
        let securable_type = self.nodes[id.0].securable_type();
        let mut by_principal: BTreeMap<String, Grant> = BTreeMap::new();
        let mut chain = Vec::new();
        let mut cursor = Some(id.0);
        while let Some(index) = cursor {
            chain.push(index);
            cursor = self.parents[index];
        }
        // Root-down so nearer declarations override farther ones.
        for index in chain.into_iter().rev() {
            for grant in &self.nodes[index].grants {
                let filtered: std::collections::BTreeSet<_> = grant
                    .privileges
                    .iter()
                    .copied()
                    .filter(|p| p.is_valid_for(securable_type))
                    .collect();
                let key = grant.principal.resolved_name(env);
                if filtered.is_empty() && index != id.0 {
                    continue;
                }
                by_principal.insert(
                    key,
                    Grant {
                        principal: grant.principal.clone(),
                        privileges: filtered,
                    },
                );
            }
        }
        by_principal
            .into_values()
            .filter(|grant| !grant.privileges.is_empty())
            .collect()
    }

    /// Materializes ancestor grants onto every descendant of `root`.
    ///
    /// Propagation is recorded, not just implied, so reconciliation can
    /// apply or revoke concrete grants per resource.
    pub fn propagate_grants(&mut self, root: NodeId, env: Environment) {
        for id in self.subtree(root) {
            let effective = self.effective_grants(id, env);
            self.nodes[id.0].grants = effective;
        }
    }

    /// Validates cross-resource invariants over the whole tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a table declares a direct row
    /// filter while a container ABAC row-filter policy matches its
    /// effective tags (at most one row filter resolves per table), or
    /// when linkage fields disagree with the parent chain.
    pub fn validate(&self, env: Environment) -> Result<()> {
        for id in self.ids() {
            let resource = self.resource(id);
            // Linkage must match the parent chain set at attach time.
            if let Some(parent) = self.parent(id) {
                let parent_resource = self.resource(parent);
                if let ResourceKind::Schema(_) = parent_resource.kind {
                    if resource.schema_name.as_deref() != Some(parent_resource.name.as_str()) {
                        return Err(Error::invariant(format!(
                            "{} has schema_name {:?}, expected {:?}",
                            resource.name, resource.schema_name, parent_resource.name
                        )));
                    }
                }
            }
            let ResourceKind::Table(spec) = &resource.kind else {
                continue;
            };
            if spec.row_filter.is_none() {
                continue;
            }
            let tags = self.effective_tags(id);
            let mut cursor = self.parent(id);
            while let Some(ancestor) = cursor {
                for policy in &self.resource(ancestor).abac_policies {
                    if policy.policy_type == AbacPolicyType::RowFilter && policy.matches(&tags) {
                        return Err(Error::validation(
                            "single_row_filter",
                            self.fqn(id, env),
                            format!(
                                "table declares a direct row filter while policy '{}' also \
                                 targets it; at most one row filter resolves per table",
                                policy.name
                            ),
                        ));
                    }
                }
                cursor = self.parent(ancestor);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abac::{AbacPolicy, MatchCondition};
    use crate::privilege::Privilege;
    use crate::resource::TableSpec;

    const ENV: Environment = Environment::Dev;

    fn tree_with_catalog_schema() -> (ResourceTree, NodeId, NodeId) {
        let mut tree = ResourceTree::new();
        let catalog = tree
            .add_root(
                Resource::catalog("analytics").with_owner(Principal::group("data_owners")),
                ENV,
            )
            .unwrap();
        let schema = tree
            .attach_child(catalog, Resource::schema("customers"), ENV)
            .unwrap();
        (tree, catalog, schema)
    }

    #[test]
    fn fqn_concatenates_resolved_names() {
        let (mut tree, _, schema) = tree_with_catalog_schema();
        let table = tree
            .attach_child(schema, Resource::table("orders", TableSpec::default()), ENV)
            .unwrap();
        assert_eq!(
            tree.fqn(table, ENV),
            "analytics_dev.customers_dev.orders_dev"
        );
    }

    #[test]
    fn attach_rejects_invalid_parent_type() {
        let (mut tree, catalog, _) = tree_with_catalog_schema();
        let err = tree
            .attach_child(catalog, Resource::table("orders", TableSpec::default()), ENV)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn duplicate_fqn_rejected() {
        let (mut tree, catalog, _) = tree_with_catalog_schema();
        let err = tree
            .attach_child(catalog, Resource::schema("customers"), ENV)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        // The failed attach must not leave a dangling node behind.
        assert_eq!(tree.ids().count(), 2);
    }

    #[test]
    fn owner_and_location_inherit_from_nearest_ancestor() {
        let (mut tree, _, schema) = tree_with_catalog_schema();
        let table = tree
            .attach_child(schema, Resource::table("orders", TableSpec::default()), ENV)
            .unwrap();
        assert_eq!(
            tree.effective_owner(table).map(|p| p.name.as_str()),
            Some("data_owners")
        );

        tree.resource_mut(schema).kind =
            ResourceKind::Schema(crate::resource::SchemaSpec {
                storage_root: Some("s3://bucket/customers".into()),
            });
        assert_eq!(
            tree.effective_location(table).as_deref(),
            Some("s3://bucket/customers")
        );
    }

    #[test]
    fn tag_merge_lets_children_override() {
        let (mut tree, catalog, schema) = tree_with_catalog_schema();
        tree.resource_mut(catalog).tags.push(crate::tag::Tag::new("pii", "true"));
        tree.resource_mut(schema).tags.push(crate::tag::Tag::new("pii", "false"));
        let tags = tree.effective_tags(schema);
        assert_eq!(tags.get("pii"), Some("false"));
    }

    #[test]
    fn effective_grants_filter_and_override() {
        let (mut tree, catalog, schema) = tree_with_catalog_schema();
        tree.resource_mut(catalog).grants.push(Grant::new(
            Principal::group("analysts"),
            [Privilege::UseCatalog, Privilege::Select],
        ));
        let table = tree
            .attach_child(schema, Resource::table("orders", TableSpec::default()), ENV)
            .unwrap();

        // Inherited grant keeps only table-valid privileges.
        let grants = tree.effective_grants(table, ENV);
        assert_eq!(grants.len(), 1);
        assert_eq!(
            grants[0].privileges,
            std::collections::BTreeSet::from([Privilege::Select])
        );

        // A leaf declaration for the same principal overrides wholesale.
        tree.resource_mut(table)
            .grants
            .push(Grant::new(Principal::group("analysts"), [Privilege::Modify]));
        let grants = tree.effective_grants(table, ENV);
        assert_eq!(grants.len(), 1);
        assert_eq!(
            grants[0].privileges,
            std::collections::BTreeSet::from([Privilege::Modify])
        );
    }

    #[test]
    fn propagation_materializes_grants() {
        let (mut tree, catalog, schema) = tree_with_catalog_schema();
        tree.resource_mut(catalog).grants.push(Grant::new(
            Principal::group("analysts"),
            [Privilege::UseCatalog, Privilege::UseSchema],
        ));
        tree.propagate_grants(catalog, ENV);
        assert!(!tree.resource(schema).grants.is_empty());
        assert_eq!(
            tree.resource(schema).grants[0].privileges,
            std::collections::BTreeSet::from([Privilege::UseSchema])
        );
    }

    #[test]
    fn direct_row_filter_conflicts_with_matching_policy() {
        let (mut tree, _, schema) = tree_with_catalog_schema();
        tree.resource_mut(schema).abac_policies.push(AbacPolicy {
            name: "hide_pii_rows".into(),
            policy_type: crate::abac::AbacPolicyType::RowFilter,
            function_ref: "pii_row_filter".into(),
            target_principals: vec![],
            except_principals: vec![],
            match_conditions: vec![MatchCondition::has_tag_value("pii", "true")],
            target_column: None,
        });
        let spec = TableSpec {
            row_filter: Some(crate::resource::RowFilterSpec {
                function: "region_filter".into(),
                input_columns: vec![],
            }),
            ..TableSpec::default()
        };
        let table = Resource::table("orders", spec).with_tag("pii", "true");
        tree.attach_child(schema, table, ENV).unwrap();
        let err = tree.validate(ENV).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn attach_hook_applies_to_new_children() {
        struct StampHook;
        impl AttachHook for StampHook {
            fn on_attach(&self, resource: &mut Resource, _env: Environment) {
                if !resource.tags.iter().any(|t| t.key == "managed_by") {
                    resource.tags.push(crate::tag::Tag::new("managed_by", "brickkit"));
                }
            }
        }
        let (mut tree, _, schema) = tree_with_catalog_schema();
        tree.set_attach_hook(Arc::new(StampHook), ENV);
        // Replay covered existing nodes.
        assert!(tree
            .resource(schema)
            .tags
            .iter()
            .any(|t| t.key == "managed_by"));
        // New children pass through the hook automatically.
        let table = tree
            .attach_child(schema, Resource::table("orders", TableSpec::default()), ENV)
            .unwrap();
        assert!(tree
            .resource(table)
            .tags
            .iter()
            .any(|t| t.key == "managed_by"));
    }
}
