//! Backend abstractions the engine reconciles against.
//!
//! Two interfaces cover everything: [`CatalogClient`] for the catalog
//! control plane (securables, grants, tags, policies, bindings) and
//! [`SqlExecutor`] for the warehouse (DDL, row filters, column masks, and
//! state the control plane does not expose). The engine depends on these
//! traits only; real SDK/warehouse implementations live with the caller.
//!
//! Reads return `Ok(None)` for absent securables: not-found is absence,
//! not an error. Every other failure is a structured [`Error`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brickkit_core::{
    AbacPolicyType, ColumnMaskSpec, ColumnSpec, CreateParams, Error, FunctionParameter,
    IsolationMode, MatchCondition, Privilege, Result, RowFilterSpec, SecurableType, Tag, TagSet,
    UpdateParams, WorkspaceBinding,
};

/// Grants keyed by resolved principal name.
pub type GrantMap = BTreeMap<String, BTreeSet<Privilege>>;

/// One result row from the SQL backend.
pub type Row = BTreeMap<String, serde_json::Value>;

/// Observed state of one securable, normalized for diffing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Securable type.
    pub securable_type: Option<SecurableType>,
    /// Fully qualified name.
    pub full_name: String,
    /// Current owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Current comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Current tags.
    #[serde(default, skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
    /// Current grants by resolved principal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub grants: GrantMap,
    /// Isolation mode, for containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_mode: Option<IsolationMode>,
    /// Workspace bindings, for containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspace_bindings: Vec<WorkspaceBinding>,
    /// Columns, for tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSpec>,
    /// Row filter, for tables (read via `DESCRIBE … EXTENDED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<RowFilterSpec>,
    /// Column masks, for tables (read via `DESCRIBE … EXTENDED`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_masks: Vec<ColumnMaskSpec>,
    /// ABAC policies, for containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyRecord>,
    /// Storage location or root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    /// Backend properties, excluded from comparison.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// Set when parts of the record could not be read (permission
    /// denied); the differ must not treat missing fields as absent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl StateRecord {
    /// Creates an empty record for a securable.
    #[must_use]
    pub fn named(securable_type: SecurableType, full_name: impl Into<String>) -> Self {
        Self {
            securable_type: Some(securable_type),
            full_name: full_name.into(),
            ..Self::default()
        }
    }
}

/// Backend form of an ABAC policy, principals resolved to names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Policy name, unique per container.
    pub name: String,
    /// Row filter or column mask.
    pub policy_type: AbacPolicyType,
    /// Function implementing the filter or mask.
    pub function_ref: String,
    /// Resolved principal names the policy applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_principals: Vec<String>,
    /// Resolved principal names exempt from the policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except_principals: Vec<String>,
    /// Tag conditions selecting target tables.
    pub match_conditions: Vec<MatchCondition>,
    /// Masked column, for column masks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
}

/// A grant change for one principal on one securable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDelta {
    /// Privileges to add, by resolved principal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: GrantMap,
    /// Privileges to remove, by resolved principal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remove: GrantMap,
}

impl GrantDelta {
    /// Returns true when the delta carries no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.values().all(BTreeSet::is_empty) && self.remove.values().all(BTreeSet::is_empty)
    }
}

/// Table state only the warehouse exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableExtendedInfo {
    /// Row filter currently applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<RowFilterSpec>,
    /// Column masks currently applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_masks: Vec<ColumnMaskSpec>,
    /// Table properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Function state only the warehouse exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Implementation language.
    pub language: String,
    /// SQL return type.
    pub return_type: String,
    /// Declared parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<FunctionParameter>,
    /// Function body.
    pub body: String,
}

/// The catalog control-plane interface the engine consumes.
///
/// Implementations must be safe for concurrent use by the engine's
/// workers; callers wrap non-thread-safe clients in a pool.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches a securable; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] for any failure other than absence.
    async fn get(
        &self,
        securable_type: SecurableType,
        full_name: &str,
    ) -> Result<Option<StateRecord>>;

    /// Creates a securable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the securable already exists.
    async fn create(&self, params: &CreateParams) -> Result<StateRecord>;

    /// Updates the fields carried by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the securable is absent.
    async fn update(&self, params: &UpdateParams) -> Result<StateRecord>;

    /// Deletes a securable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the securable is absent.
    async fn delete(&self, securable_type: SecurableType, full_name: &str) -> Result<()>;

    /// Lists children of a container (e.g. schemas of a catalog).
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn list_children(
        &self,
        child_type: SecurableType,
        parent_full_name: &str,
    ) -> Result<Vec<StateRecord>>;

    /// Transfers ownership.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the securable is absent.
    async fn set_owner(
        &self,
        securable_type: SecurableType,
        full_name: &str,
        owner: &str,
    ) -> Result<()>;

    /// Fetches current grants.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn get_grants(
        &self,
        securable_type: SecurableType,
        full_name: &str,
    ) -> Result<GrantMap>;

    /// Applies a grant delta. Granting an already-granted privilege is a
    /// no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when a principal does not exist; the
    /// failure is scoped to that principal's entry.
    async fn update_grants(
        &self,
        securable_type: SecurableType,
        full_name: &str,
        delta: &GrantDelta,
    ) -> Result<()>;

    /// Sets (creates or updates) tags on a securable.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn set_tags(
        &self,
        securable_type: SecurableType,
        full_name: &str,
        tags: &[Tag],
    ) -> Result<()>;

    /// Removes tags by key.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn unset_tags(
        &self,
        securable_type: SecurableType,
        full_name: &str,
        keys: &[String],
    ) -> Result<()>;

    /// Lists ABAC policies declared on a container.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn list_policies(&self, container_full_name: &str) -> Result<Vec<PolicyRecord>>;

    /// Creates an ABAC policy on a container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when the policy quota is exceeded.
    async fn create_policy(
        &self,
        container_full_name: &str,
        policy: &PolicyRecord,
    ) -> Result<()>;

    /// Replaces an ABAC policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the policy is absent.
    async fn update_policy(
        &self,
        container_full_name: &str,
        policy: &PolicyRecord,
    ) -> Result<()>;

    /// Drops an ABAC policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the policy is absent.
    async fn delete_policy(&self, container_full_name: &str, name: &str) -> Result<()>;

    /// Fetches workspace bindings of a container.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn get_bindings(&self, full_name: &str) -> Result<Vec<WorkspaceBinding>>;

    /// Adds and removes workspace bindings.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn update_bindings(
        &self,
        full_name: &str,
        add: &[WorkspaceBinding],
        remove: &[WorkspaceBinding],
    ) -> Result<()>;

    /// Sets the isolation mode of a container. Bindings must already be
    /// in place before ISOLATED is set.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    async fn set_isolation_mode(&self, full_name: &str, mode: IsolationMode) -> Result<()>;
}

/// The SQL warehouse interface the engine consumes.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executes a statement and returns result rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sql`] with the backend's SQLSTATE on failure.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;

    /// Reads table state the control plane does not expose.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the table is absent.
    async fn describe_table_extended(&self, full_name: &str) -> Result<TableExtendedInfo>;

    /// Reads function state the control plane does not expose.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the function is absent.
    async fn describe_function(&self, full_name: &str) -> Result<FunctionInfo>;
}

/// Maps a not-found error to absence, passing other errors through.
///
/// # Errors
///
/// Propagates every error except [`Error::NotFound`].
pub fn absent_on_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
