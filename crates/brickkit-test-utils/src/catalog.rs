//! In-memory catalog client with operation tracing.
//!
//! Records every control-plane call for test assertions, applies
//! mutations to the shared [`CatalogStore`], and supports failure
//! injection (fail the next N calls of an operation) plus optional
//! simulated latency.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use brickkit_core::{
    CreateParams, Error, IsolationMode, Result, SecurableType, Tag, UpdateParams,
    WorkspaceBinding,
};
use brickkit_engine::{CatalogClient, GrantDelta, GrantMap, PolicyRecord, StateRecord};

use crate::store::CatalogStore;

/// Record of one control-plane call.
#[derive(Debug, Clone)]
pub enum CatalogOp {
    /// Read of one securable.
    Get {
        /// Name that was read.
        full_name: String,
    },
    /// Securable creation.
    Create {
        /// Name that was created.
        full_name: String,
    },
    /// Field update.
    Update {
        /// Name that was updated.
        full_name: String,
        /// Field paths that were sent.
        fields: Vec<String>,
    },
    /// Securable deletion.
    Delete {
        /// Name that was deleted.
        full_name: String,
    },
    /// Child listing.
    ListChildren {
        /// Parent container name.
        parent: String,
    },
    /// Ownership transfer.
    SetOwner {
        /// Securable name.
        full_name: String,
        /// New owner.
        owner: String,
    },
    /// Grant read.
    GetGrants {
        /// Securable name.
        full_name: String,
    },
    /// Grant delta application.
    UpdateGrants {
        /// Securable name.
        full_name: String,
        /// The delta that was sent.
        delta: GrantDelta,
    },
    /// Tag set/update.
    SetTags {
        /// Securable name.
        full_name: String,
        /// Tags that were set.
        tags: Vec<Tag>,
    },
    /// Tag removal.
    UnsetTags {
        /// Securable name.
        full_name: String,
        /// Keys that were removed.
        keys: Vec<String>,
    },
    /// Policy creation.
    CreatePolicy {
        /// Container name.
        full_name: String,
        /// Policy name.
        name: String,
    },
    /// Policy replacement.
    UpdatePolicy {
        /// Container name.
        full_name: String,
        /// Policy name.
        name: String,
    },
    /// Policy deletion.
    DeletePolicy {
        /// Container name.
        full_name: String,
        /// Policy name.
        name: String,
    },
    /// Workspace binding update.
    UpdateBindings {
        /// Container name.
        full_name: String,
    },
    /// Isolation mode change.
    SetIsolation {
        /// Container name.
        full_name: String,
        /// The new mode.
        mode: IsolationMode,
    },
}

/// What an injected failure returns.
#[derive(Debug, Clone, Copy)]
pub enum FailKind {
    /// Retriable backend failure.
    Transient,
    /// Terminal permission failure.
    PermissionDenied,
    /// Not-found failure.
    NotFound,
}

#[derive(Debug)]
struct Injection {
    operation: String,
    remaining: u32,
    kind: FailKind,
}

/// In-memory [`CatalogClient`] with tracing and failure injection.
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    store: CatalogStore,
    operations: Arc<Mutex<Vec<CatalogOp>>>,
    injections: Arc<Mutex<Vec<Injection>>>,
    known_principals: Arc<Mutex<Option<BTreeSet<String>>>>,
    latency: Option<Duration>,
}

impl InMemoryCatalog {
    /// Creates a client over a shared store.
    #[must_use]
    pub fn new(store: CatalogStore) -> Self {
        Self {
            store,
            operations: Arc::new(Mutex::new(Vec::new())),
            injections: Arc::new(Mutex::new(Vec::new())),
            known_principals: Arc::new(Mutex::new(None)),
            latency: None,
        }
    }

    /// Creates a client with simulated latency per call.
    #[must_use]
    pub fn with_latency(store: CatalogStore, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new(store)
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<CatalogOp> {
        lock(&self.operations).clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        lock(&self.operations).clear();
    }

    /// Fails the next `times` calls of `operation` with `kind`.
    pub fn inject_failure(&self, operation: impl Into<String>, times: u32, kind: FailKind) {
        lock(&self.injections).push(Injection {
            operation: operation.into(),
            remaining: times,
            kind,
        });
    }

    /// Restricts grants to a known principal set; granting to anyone else
    /// fails with not-found for that principal.
    pub fn set_known_principals(&self, principals: impl IntoIterator<Item = String>) {
        *lock(&self.known_principals) = Some(principals.into_iter().collect());
    }

    fn record(&self, op: CatalogOp) {
        lock(&self.operations).push(op);
    }

    fn maybe_fail(&self, operation: &str, full_name: &str) -> Result<()> {
        let mut injections = lock(&self.injections);
        if let Some(position) = injections
            .iter()
            .position(|i| i.operation == operation && i.remaining > 0)
        {
            injections[position].remaining -= 1;
            let kind = injections[position].kind;
            if injections[position].remaining == 0 {
                injections.remove(position);
            }
            return Err(match kind {
                FailKind::Transient => Error::transient(format!("injected failure on {operation}")),
                FailKind::PermissionDenied => {
                    Error::permission_denied(format!("injected denial on {operation}"))
                }
                FailKind::NotFound => Error::not_found("INJECTED", full_name),
            });
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
    ) -> Result<Option<StateRecord>> {
        self.simulate_latency().await;
        self.record(CatalogOp::Get {
            full_name: full_name.to_string(),
        });
        self.maybe_fail("get", full_name)?;
        Ok(self.store.get(full_name))
    }

    async fn create(&self, params: &CreateParams) -> Result<StateRecord> {
        self.simulate_latency().await;
        self.record(CatalogOp::Create {
            full_name: params.full_name.clone(),
        });
        self.maybe_fail("create", &params.full_name)?;
        if self.store.contains(&params.full_name) {
            return Err(Error::conflict(format!(
                "{} already exists",
                params.full_name
            )));
        }
        let mut record = StateRecord::named(params.securable_type(), &params.full_name);
        record.owner = params.owner.clone();
        record.comment = params.comment.clone();
        record.storage_location = params.kind.storage_location().map(str::to_string);
        self.store.put(record.clone());
        Ok(record)
    }

    async fn update(&self, params: &UpdateParams) -> Result<StateRecord> {
        self.simulate_latency().await;
        self.record(CatalogOp::Update {
            full_name: params.full_name.clone(),
            fields: params.fields.keys().cloned().collect(),
        });
        self.maybe_fail("update", &params.full_name)?;
        let updated = self.store.update(&params.full_name, |record| {
            for (path, value) in &params.fields {
                match path.as_str() {
                    "owner" => record.owner = value.as_str().map(str::to_string),
                    "comment" => record.comment = value.as_str().map(str::to_string),
                    "storage_location" | "storage_root" | "url" => {
                        record.storage_location = value.as_str().map(str::to_string);
                    }
                    _ => {
                        if let Some(text) = value.as_str() {
                            record
                                .properties
                                .insert(path.clone(), text.to_string());
                        }
                    }
                }
            }
        });
        if !updated {
            return Err(Error::not_found("SECURABLE", &params.full_name));
        }
        self.store
            .get(&params.full_name)
            .ok_or_else(|| Error::not_found("SECURABLE", &params.full_name))
    }

    async fn delete(&self, _securable_type: SecurableType, full_name: &str) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::Delete {
            full_name: full_name.to_string(),
        });
        self.maybe_fail("delete", full_name)?;
        self.store
            .remove(full_name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("SECURABLE", full_name))
    }

    async fn list_children(
        &self,
        child_type: SecurableType,
        parent_full_name: &str,
    ) -> Result<Vec<StateRecord>> {
        self.simulate_latency().await;
        self.record(CatalogOp::ListChildren {
            parent: parent_full_name.to_string(),
        });
        self.maybe_fail("list_children", parent_full_name)?;
        Ok(self
            .store
            .children_of(parent_full_name)
            .into_iter()
            .filter(|record| record.securable_type == Some(child_type))
            .collect())
    }

    async fn set_owner(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
        owner: &str,
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::SetOwner {
            full_name: full_name.to_string(),
            owner: owner.to_string(),
        });
        self.maybe_fail("set_owner", full_name)?;
        if self
            .store
            .update(full_name, |record| record.owner = Some(owner.to_string()))
        {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", full_name))
        }
    }

    async fn get_grants(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
    ) -> Result<GrantMap> {
        self.simulate_latency().await;
        self.record(CatalogOp::GetGrants {
            full_name: full_name.to_string(),
        });
        self.maybe_fail("get_grants", full_name)?;
        Ok(self
            .store
            .get(full_name)
            .map(|record| record.grants)
            .unwrap_or_default())
    }

    async fn update_grants(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
        delta: &GrantDelta,
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::UpdateGrants {
            full_name: full_name.to_string(),
            delta: delta.clone(),
        });
        self.maybe_fail("update_grants", full_name)?;
        if let Some(known) = lock(&self.known_principals).as_ref() {
            for principal in delta.add.keys().chain(delta.remove.keys()) {
                if !known.contains(principal) {
                    return Err(Error::not_found("PRINCIPAL", principal));
                }
            }
        }
        let updated = self.store.update(full_name, |record| {
            for (principal, privileges) in &delta.add {
                record
                    .grants
                    .entry(principal.clone())
                    .or_default()
                    .extend(privileges.iter().copied());
            }
            for (principal, privileges) in &delta.remove {
                if let Some(existing) = record.grants.get_mut(principal) {
                    for privilege in privileges {
                        existing.remove(privilege);
                    }
                    if existing.is_empty() {
                        record.grants.remove(principal);
                    }
                }
            }
        });
        if updated {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", full_name))
        }
    }

    async fn set_tags(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
        tags: &[Tag],
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::SetTags {
            full_name: full_name.to_string(),
            tags: tags.to_vec(),
        });
        self.maybe_fail("set_tags", full_name)?;
        if self.store.update(full_name, |record| {
            for tag in tags {
                record.tags.insert(tag.key.clone(), tag.value.clone());
            }
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", full_name))
        }
    }

    async fn unset_tags(
        &self,
        _securable_type: SecurableType,
        full_name: &str,
        keys: &[String],
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::UnsetTags {
            full_name: full_name.to_string(),
            keys: keys.to_vec(),
        });
        self.maybe_fail("unset_tags", full_name)?;
        if self.store.update(full_name, |record| {
            for key in keys {
                record.tags.remove(key);
            }
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", full_name))
        }
    }

    async fn list_policies(&self, container_full_name: &str) -> Result<Vec<PolicyRecord>> {
        self.simulate_latency().await;
        self.maybe_fail("list_policies", container_full_name)?;
        Ok(self
            .store
            .get(container_full_name)
            .map(|record| record.policies)
            .unwrap_or_default())
    }

    async fn create_policy(
        &self,
        container_full_name: &str,
        policy: &PolicyRecord,
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::CreatePolicy {
            full_name: container_full_name.to_string(),
            name: policy.name.clone(),
        });
        self.maybe_fail("create_policy", container_full_name)?;
        if self.store.update(container_full_name, |record| {
            record.policies.retain(|existing| existing.name != policy.name);
            record.policies.push(policy.clone());
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", container_full_name))
        }
    }

    async fn update_policy(
        &self,
        container_full_name: &str,
        policy: &PolicyRecord,
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::UpdatePolicy {
            full_name: container_full_name.to_string(),
            name: policy.name.clone(),
        });
        self.maybe_fail("update_policy", container_full_name)?;
        if self.store.update(container_full_name, |record| {
            record.policies.retain(|existing| existing.name != policy.name);
            record.policies.push(policy.clone());
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", container_full_name))
        }
    }

    async fn delete_policy(&self, container_full_name: &str, name: &str) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::DeletePolicy {
            full_name: container_full_name.to_string(),
            name: name.to_string(),
        });
        self.maybe_fail("delete_policy", container_full_name)?;
        if self.store.update(container_full_name, |record| {
            record.policies.retain(|existing| existing.name != name);
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", container_full_name))
        }
    }

    async fn get_bindings(&self, full_name: &str) -> Result<Vec<WorkspaceBinding>> {
        self.simulate_latency().await;
        self.maybe_fail("get_bindings", full_name)?;
        Ok(self
            .store
            .get(full_name)
            .map(|record| record.workspace_bindings)
            .unwrap_or_default())
    }

    async fn update_bindings(
        &self,
        full_name: &str,
        add: &[WorkspaceBinding],
        remove: &[WorkspaceBinding],
    ) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::UpdateBindings {
            full_name: full_name.to_string(),
        });
        self.maybe_fail("update_bindings", full_name)?;
        if self.store.update(full_name, |record| {
            for binding in add {
                if !record.workspace_bindings.contains(binding) {
                    record.workspace_bindings.push(*binding);
                }
            }
            record
                .workspace_bindings
                .retain(|binding| !remove.contains(binding));
        }) {
            Ok(())
        } else {
            Err(Error::not_found("SECURABLE", full_name))
        }
    }

    async fn set_isolation_mode(&self, full_name: &str, mode: IsolationMode) -> Result<()> {
        self.simulate_latency().await;
        self.record(CatalogOp::SetIsolation {
            full_name: full_name.to_string(),
            mode,
        });
        self.maybe_fail("set_isolation_mode", full_name)?;
        let record = self
            .store
            .get(full_name)
            .ok_or_else(|| Error::not_found("SECURABLE", full_name))?;
        if mode == IsolationMode::Isolated && record.workspace_bindings.is_empty() {
            return Err(Error::validation(
                "isolation_requires_bindings",
                full_name,
                "cannot isolate a container with no workspace bindings",
            ));
        }
        self.store.update(full_name, |record| {
            record.isolation_mode = Some(mode);
        });
        Ok(())
    }
}
