//! The per-resource executor.
//!
//! One executor covers every securable type; a single dispatch on
//! [`SecurableType`] at the backend boundary selects the SDK or SQL
//! strategy per operation. Tables and functions are created through SQL
//! DDL; everything else goes through the catalog client. Row filters and
//! column masks are always SQL; ABAC policies go through the policies
//! API.
//!
//! Every mutating method honors dry-run: the planned changes are
//! computed and returned, nothing is sent to the backend.

use std::sync::Arc;

use brickkit_core::{
    Error, IsolationMode, Privilege, ResourceKind, Result, SecurableType, Tag, WorkspaceBinding,
};

use crate::backend::{CatalogClient, GrantDelta, GrantMap, SqlExecutor, StateRecord};
use crate::differ::{diff_resource, Change, ChangeAction, DeclaredState, Diff};
use crate::metrics;
use crate::result::ReconcileResult;
use crate::retry::RetryPolicy;
use crate::sql;
use crate::state::StateReader;

/// Field-path partition used to route changes to backend calls.
fn is_tag_path(path: &str) -> bool {
    path.starts_with("tag.")
}

fn is_grant_path(path: &str) -> bool {
    path.starts_with("grant.")
}

fn is_policy_path(path: &str) -> bool {
    path == "row_filter" || path.starts_with("column_mask.") || path.starts_with("abac_policy.")
}

fn is_binding_path(path: &str) -> bool {
    path.starts_with("workspace_binding.")
}

/// Executes backend operations for a single resource.
pub struct ResourceExecutor {
    client: Arc<dyn CatalogClient>,
    sql: Arc<dyn SqlExecutor>,
    reader: Arc<StateReader>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl std::fmt::Debug for ResourceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceExecutor")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl ResourceExecutor {
    /// Creates an executor over the two backends.
    #[must_use]
    pub fn new(
        client: Arc<dyn CatalogClient>,
        sql: Arc<dyn SqlExecutor>,
        reader: Arc<StateReader>,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            sql,
            reader,
            retry,
            dry_run,
        }
    }

    /// Returns true when the securable exists on the backend.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    pub async fn exists(&self, securable_type: SecurableType, full_name: &str) -> Result<bool> {
        Ok(self.reader.read(securable_type, full_name).await?.is_some())
    }

    /// Reads observed state through the shared reader.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    pub async fn read_state(
        &self,
        securable_type: SecurableType,
        full_name: &str,
    ) -> Result<Option<StateRecord>> {
        self.reader.read(securable_type, full_name).await
    }

    /// Composes the reader and the differ.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    pub async fn diff(&self, declared: &DeclaredState) -> Result<Diff> {
        let observed = self
            .read_state(declared.securable_type, &declared.full_name)
            .await?;
        Ok(diff_resource(declared, observed.as_ref()))
    }

    /// Creates the securable.
    ///
    /// Tables and functions are created through SQL DDL; other types go
    /// through the catalog client. References are never created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an absent reference, or the
    /// backend's structured error.
    pub async fn create(&self, declared: &DeclaredState) -> Result<()> {
        if declared.reference {
            return Err(Error::not_found(
                declared.securable_type.as_str(),
                &declared.full_name,
            ));
        }
        if self.dry_run {
            tracing::info!(
                resource = %declared.full_name,
                securable_type = %declared.securable_type,
                "dry-run: would create"
            );
            return Ok(());
        }
        match &declared.resource.kind {
            ResourceKind::Table(spec) => {
                let statement =
                    sql::create_table(&declared.full_name, spec, declared.comment.as_deref());
                self.execute_sql("create_table", &statement).await?;
            }
            ResourceKind::Function(spec) => {
                let statement = sql::create_function(&declared.full_name, spec);
                self.execute_sql("create_function", &statement).await?;
            }
            _ => {
                let params = declared.resource.to_create_params(
                    declared.env,
                    &declared.full_name,
                    declared.resource.owner.as_ref(),
                )?;
                let client = self.client.clone();
                self.retry
                    .run("create", self.retry.sdk_timeout, || {
                        let client = client.clone();
                        let params = params.clone();
                        async move { client.create(&params).await }
                    })
                    .await?;
            }
        }
        // Ownership is set separately: create APIs run as the caller.
        if let Some(owner) = &declared.owner {
            self.set_owner(declared, owner).await?;
        }
        self.reader.invalidate(&declared.full_name);
        metrics::record_operation("create", declared.securable_type.as_str());
        Ok(())
    }

    /// Applies structural changes: owner, comment, kind fields, workspace
    /// bindings, and isolation mode. Bindings are applied **before**
    /// ISOLATED is set; reverting to OPEN precedes binding removal.
    ///
    /// # Errors
    ///
    /// Returns the backend's structured error.
    pub async fn update_structure(
        &self,
        declared: &DeclaredState,
        diff: &Diff,
    ) -> Result<Vec<Change>> {
        let changes: Vec<Change> = diff
            .changes
            .iter()
            .filter(|change| {
                let path = change.field_path.as_str();
                path != "resource"
                    && !is_tag_path(path)
                    && !is_grant_path(path)
                    && !is_policy_path(path)
            })
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            return Ok(changes);
        }

        let mut field_paths = Vec::new();
        let mut owner_change = None;
        let mut isolation_change = None;
        let mut binding_add = Vec::new();
        let mut binding_remove = Vec::new();
        for change in &changes {
            match change.field_path.as_str() {
                "owner" => owner_change = Some(change),
                "isolation_mode" => isolation_change = Some(change),
                path if is_binding_path(path) => {
                    let binding: WorkspaceBinding = match change.action {
                        ChangeAction::Remove => serde_json::from_value(change.observed.clone()),
                        _ => serde_json::from_value(change.declared.clone()),
                    }
                    .map_err(|e| Error::invariant(format!("malformed binding change: {e}")))?;
                    if change.action == ChangeAction::Remove {
                        binding_remove.push(binding);
                    } else {
                        binding_add.push(binding);
                    }
                }
                path => field_paths.push(path.to_string()),
            }
        }

        if let Some(change) = owner_change {
            let serde_json::Value::String(owner) = &change.declared else {
                return Err(Error::invariant("owner change without declared value"));
            };
            self.set_owner(declared, owner).await?;
        }

        if !field_paths.is_empty() {
            let params = declared.resource.to_update_params(
                declared.env,
                &declared.full_name,
                declared.resource.owner.as_ref(),
                &field_paths,
            );
            let client = self.client.clone();
            self.retry
                .run("update", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let params = params.clone();
                    async move { client.update(&params).await }
                })
                .await?;
        }

        // Leaving ISOLATED must happen before bindings are torn down.
        if isolation_change.is_some() && declared.isolation_mode == Some(IsolationMode::Open) {
            self.set_isolation(declared, IsolationMode::Open).await?;
            isolation_change = None;
        }

        if !binding_add.is_empty() || !binding_remove.is_empty() {
            let client = self.client.clone();
            let full_name = declared.full_name.clone();
            self.retry
                .run("update_bindings", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let full_name = full_name.clone();
                    let add = binding_add.clone();
                    let remove = binding_remove.clone();
                    async move { client.update_bindings(&full_name, &add, &remove).await }
                })
                .await?;
        }

        // Bindings are in place; ISOLATED may now be set.
        if isolation_change.is_some() {
            if let Some(mode) = declared.isolation_mode {
                self.set_isolation(declared, mode).await?;
            }
        }

        self.reader.invalidate(&declared.full_name);
        metrics::record_operation("update", declared.securable_type.as_str());
        Ok(changes)
    }

    /// Applies tag changes: set added/modified keys, unset removed keys.
    ///
    /// # Errors
    ///
    /// Returns the backend's structured error.
    pub async fn apply_tags(&self, declared: &DeclaredState, diff: &Diff) -> Result<Vec<Change>> {
        let changes: Vec<Change> = diff
            .changes
            .iter()
            .filter(|change| is_tag_path(&change.field_path))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            return Ok(changes);
        }

        let mut to_set = Vec::new();
        let mut to_unset = Vec::new();
        for change in &changes {
            let Some(key) = change.field_path.strip_prefix("tag.") else {
                continue;
            };
            match change.action {
                ChangeAction::Add | ChangeAction::Modify => {
                    if let serde_json::Value::String(value) = &change.declared {
                        to_set.push(Tag::new(key, value.clone()));
                    }
                }
                ChangeAction::Remove => to_unset.push(key.to_string()),
            }
        }

        let client = self.client.clone();
        let full_name = declared.full_name.clone();
        let securable_type = declared.securable_type;
        if !to_set.is_empty() {
            self.retry
                .run("set_tags", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let full_name = full_name.clone();
                    let tags = to_set.clone();
                    async move { client.set_tags(securable_type, &full_name, &tags).await }
                })
                .await?;
        }
        if !to_unset.is_empty() {
            self.retry
                .run("unset_tags", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let full_name = full_name.clone();
                    let keys = to_unset.clone();
                    async move { client.unset_tags(securable_type, &full_name, &keys).await }
                })
                .await?;
        }

        self.reader.invalidate(&declared.full_name);
        metrics::record_operation("tags", declared.securable_type.as_str());
        Ok(changes)
    }

    /// Applies grant changes. Additions are sent **before** removals so a
    /// principal keeping a privilege never sees it transiently revoked.
    ///
    /// # Errors
    ///
    /// Returns the backend's structured error; a missing principal fails
    /// only that principal's entry.
    pub async fn apply_grants(&self, declared: &DeclaredState, diff: &Diff) -> Result<Vec<Change>> {
        let changes: Vec<Change> = diff
            .changes
            .iter()
            .filter(|change| is_grant_path(&change.field_path))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            return Ok(changes);
        }

        let mut add: GrantMap = GrantMap::new();
        let mut remove: GrantMap = GrantMap::new();
        for change in &changes {
            let Some(rest) = change.field_path.strip_prefix("grant.") else {
                continue;
            };
            let Some((principal, privilege)) = rest.rsplit_once('.') else {
                continue;
            };
            let Ok(privilege) = serde_json::from_value::<Privilege>(serde_json::Value::String(
                privilege.to_string(),
            )) else {
                return Err(Error::invariant(format!(
                    "unknown privilege in change path: {}",
                    change.field_path
                )));
            };
            match change.action {
                ChangeAction::Remove => {
                    remove.entry(principal.to_string()).or_default().insert(privilege);
                }
                _ => {
                    add.entry(principal.to_string()).or_default().insert(privilege);
                }
            }
        }

        let client = self.client.clone();
        let full_name = declared.full_name.clone();
        let securable_type = declared.securable_type;
        if !add.is_empty() {
            let delta = GrantDelta {
                add,
                remove: GrantMap::new(),
            };
            self.retry
                .run("grants.add", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let full_name = full_name.clone();
                    let delta = delta.clone();
                    async move { client.update_grants(securable_type, &full_name, &delta).await }
                })
                .await?;
        }
        if !remove.is_empty() {
            let delta = GrantDelta {
                add: GrantMap::new(),
                remove,
            };
            self.retry
                .run("grants.remove", self.retry.sdk_timeout, || {
                    let client = client.clone();
                    let full_name = full_name.clone();
                    let delta = delta.clone();
                    async move { client.update_grants(securable_type, &full_name, &delta).await }
                })
                .await?;
        }

        self.reader.invalidate(&declared.full_name);
        metrics::record_operation("grants", declared.securable_type.as_str());
        Ok(changes)
    }

    /// Applies row filters, column masks, and ABAC policies.
    ///
    /// # Errors
    ///
    /// Returns the backend's structured error.
    pub async fn apply_policies(
        &self,
        declared: &DeclaredState,
        diff: &Diff,
    ) -> Result<Vec<Change>> {
        let changes: Vec<Change> = diff
            .changes
            .iter()
            .filter(|change| is_policy_path(&change.field_path))
            .cloned()
            .collect();
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            return Ok(changes);
        }

        for change in &changes {
            let path = change.field_path.as_str();
            if path == "row_filter" {
                match change.action {
                    ChangeAction::Remove => {
                        // A remove paired with an add in the same diff is a
                        // replacement; SET ROW FILTER overwrites in place.
                        let replaced = changes.iter().any(|other| {
                            other.field_path == "row_filter"
                                && other.action == ChangeAction::Add
                        });
                        if !replaced {
                            let statement = sql::drop_row_filter(&declared.full_name);
                            self.execute_sql("drop_row_filter", &statement).await?;
                        }
                    }
                    _ => {
                        let filter: brickkit_core::RowFilterSpec =
                            serde_json::from_value(change.declared.clone()).map_err(|e| {
                                Error::invariant(format!("malformed row filter change: {e}"))
                            })?;
                        let statement = sql::set_row_filter(&declared.full_name, &filter);
                        self.execute_sql("set_row_filter", &statement).await?;
                    }
                }
            } else if let Some(column) = path.strip_prefix("column_mask.") {
                match change.action {
                    ChangeAction::Remove => {
                        let replaced = changes.iter().any(|other| {
                            other.field_path == path && other.action == ChangeAction::Add
                        });
                        if !replaced {
                            let statement = sql::drop_column_mask(&declared.full_name, column);
                            self.execute_sql("drop_column_mask", &statement).await?;
                        }
                    }
                    _ => {
                        let mask: brickkit_core::ColumnMaskSpec =
                            serde_json::from_value(change.declared.clone()).map_err(|e| {
                                Error::invariant(format!("malformed column mask change: {e}"))
                            })?;
                        let statement = sql::set_column_mask(&declared.full_name, &mask);
                        self.execute_sql("set_column_mask", &statement).await?;
                    }
                }
            } else if let Some(name) = path.strip_prefix("abac_policy.") {
                self.apply_policy_change(declared, name, change, &changes)
                    .await?;
            }
        }

        self.reader.invalidate(&declared.full_name);
        metrics::record_operation("policies", declared.securable_type.as_str());
        Ok(changes)
    }

    async fn apply_policy_change(
        &self,
        declared: &DeclaredState,
        name: &str,
        change: &Change,
        all_changes: &[Change],
    ) -> Result<()> {
        let client = self.client.clone();
        let full_name = declared.full_name.clone();
        match change.action {
            ChangeAction::Remove => {
                let replaced = all_changes.iter().any(|other| {
                    other.field_path == change.field_path && other.action == ChangeAction::Add
                });
                if replaced {
                    // The paired add becomes an update below.
                    return Ok(());
                }
                let name = name.to_string();
                self.retry
                    .run("delete_policy", self.retry.sdk_timeout, || {
                        let client = client.clone();
                        let full_name = full_name.clone();
                        let name = name.clone();
                        async move { client.delete_policy(&full_name, &name).await }
                    })
                    .await
            }
            _ => {
                let policy: crate::backend::PolicyRecord =
                    serde_json::from_value(change.declared.clone()).map_err(|e| {
                        Error::invariant(format!("malformed policy change: {e}"))
                    })?;
                let replacing = all_changes.iter().any(|other| {
                    other.field_path == change.field_path && other.action == ChangeAction::Remove
                });
                let operation = if replacing { "update_policy" } else { "create_policy" };
                self.retry
                    .run(operation, self.retry.sdk_timeout, || {
                        let client = client.clone();
                        let full_name = full_name.clone();
                        let policy = policy.clone();
                        async move {
                            if replacing {
                                client.update_policy(&full_name, &policy).await
                            } else {
                                client.create_policy(&full_name, &policy).await
                            }
                        }
                    })
                    .await
            }
        }
    }

    /// Deletes a securable by name. References are never deleted; callers
    /// check the declared resource before authorizing a delete.
    ///
    /// # Errors
    ///
    /// Returns the backend's structured error.
    pub async fn delete(&self, securable_type: SecurableType, full_name: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!(resource = full_name, "dry-run: would delete");
            return Ok(());
        }
        let client = self.client.clone();
        let owned_name = full_name.to_string();
        self.retry
            .run("delete", self.retry.sdk_timeout, || {
                let client = client.clone();
                let full_name = owned_name.clone();
                async move { client.delete(securable_type, &full_name).await }
            })
            .await?;
        self.reader.invalidate(full_name);
        metrics::record_operation("delete", securable_type.as_str());
        Ok(())
    }

    /// Full single-resource pass: read, diff, apply every phase in order
    /// (structure, tags, grants, policies). Idempotent: a second call
    /// with unchanged declared state applies nothing.
    ///
    /// # Errors
    ///
    /// Never returns an error for per-resource failures; they are
    /// captured in the result. Invariant violations propagate.
    pub async fn reconcile(&self, declared: &DeclaredState) -> Result<ReconcileResult> {
        let started = std::time::Instant::now();
        let mut result = ReconcileResult {
            resource_name: declared.full_name.clone(),
            ..ReconcileResult::default()
        };

        let diff = match self.diff(declared).await {
            Ok(diff) => diff,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                result.errors.push(e.to_string());
                return Ok(result);
            }
        };

        if diff.needs_create() {
            match self.create(declared).await {
                Ok(()) => {
                    if self.dry_run {
                        result.changes_skipped.extend(diff.changes.clone());
                    } else {
                        result.changes_applied.extend(diff.changes.clone());
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    result.errors.push(e.to_string());
                    return Ok(result);
                }
            }
            // Tags, grants, and policies for a fresh securable are applied
            // against its empty observed state.
            let fresh_diff = match self.diff(declared).await {
                Ok(diff) => diff,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    result.errors.push(e.to_string());
                    return Ok(result);
                }
            };
            self.apply_phases(declared, &fresh_diff, &mut result).await?;
        } else {
            self.apply_phases(declared, &diff, &mut result).await?;
        }

        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::record_reconcile_duration(
            declared.securable_type.as_str(),
            started.elapsed().as_secs_f64(),
        );
        Ok(result)
    }

    async fn apply_phases(
        &self,
        declared: &DeclaredState,
        diff: &Diff,
        result: &mut ReconcileResult,
    ) -> Result<()> {
        let phases: [(&str, _); 4] = [
            ("structure", PhaseKind::Structure),
            ("tags", PhaseKind::Tags),
            ("grants", PhaseKind::Grants),
            ("policies", PhaseKind::Policies),
        ];
        for (name, phase) in phases {
            let outcome = match phase {
                PhaseKind::Structure => self.update_structure(declared, diff).await,
                PhaseKind::Tags => self.apply_tags(declared, diff).await,
                PhaseKind::Grants => self.apply_grants(declared, diff).await,
                PhaseKind::Policies => self.apply_policies(declared, diff).await,
            };
            match outcome {
                Ok(changes) => {
                    if self.dry_run {
                        result.changes_skipped.extend(changes);
                    } else {
                        result.changes_applied.extend(changes);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        resource = %declared.full_name,
                        phase = name,
                        error = %e,
                        "phase failed"
                    );
                    metrics::record_failure(name, declared.securable_type.as_str());
                    result.errors.push(format!("{name}: {e}"));
                }
            }
        }
        Ok(())
    }

    async fn set_owner(&self, declared: &DeclaredState, owner: &str) -> Result<()> {
        let client = self.client.clone();
        let full_name = declared.full_name.clone();
        let securable_type = declared.securable_type;
        let owner = owner.to_string();
        self.retry
            .run("set_owner", self.retry.sdk_timeout, || {
                let client = client.clone();
                let full_name = full_name.clone();
                let owner = owner.clone();
                async move { client.set_owner(securable_type, &full_name, &owner).await }
            })
            .await
    }

    async fn set_isolation(&self, declared: &DeclaredState, mode: IsolationMode) -> Result<()> {
        let client = self.client.clone();
        let full_name = declared.full_name.clone();
        self.retry
            .run("set_isolation_mode", self.retry.sdk_timeout, || {
                let client = client.clone();
                let full_name = full_name.clone();
                async move { client.set_isolation_mode(&full_name, mode).await }
            })
            .await
    }

    async fn execute_sql(&self, operation: &str, statement: &str) -> Result<()> {
        let sql = self.sql.clone();
        let statement_owned = statement.to_string();
        self.retry
            .run(operation, self.retry.sql_timeout, || {
                let sql = sql.clone();
                let statement = statement_owned.clone();
                async move { sql.execute(&statement).await.map(|_| ()) }
            })
            .await
    }
}

#[derive(Clone, Copy)]
enum PhaseKind {
    Structure,
    Tags,
    Grants,
    Policies,
}
