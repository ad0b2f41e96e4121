//! The reconciler: ordered, idempotent application of declared state.
//!
//! Within one subtree the phases are strict:
//!
//! 1. infrastructure (credentials, locations, connections)
//! 2. containers (bindings before ISOLATED)
//! 3. functions (row filters and masks depend on them)
//! 4. data assets (tables, volumes, models, spaces, vector endpoints,
//!    then indexes)
//! 5. tags
//! 6. grants (additive before subtractive)
//! 7. row filters / column masks / ABAC policies
//! 8. deletions, leaf-to-root, only when explicitly authorized
//!
//! Independent subtrees run concurrently on a bounded worker pool; the
//! caller can request sequential mode for deterministic output. A run is
//! cancelled cooperatively: the flag is checked before each resource, and
//! unreached resources are reported `not_attempted`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use brickkit_core::{
    AccessRequest, Environment, NodeId, ResourceTree, Result, SecurableType, TimeBoundGrant,
};
use brickkit_convention::{Convention, RuleMode, RuleViolation, RulesRegistry};

use crate::backend::{CatalogClient, SqlExecutor};
use crate::differ::{declared_state, diff_resource, DeclaredState};
use crate::drift::{DriftOptions, DriftReport};
use crate::executor::ResourceExecutor;
use crate::result::{ExecutionResult, Operation, RunReport};
use crate::retry::RetryPolicy;
use crate::state::StateReader;

/// Environment variable forcing dry-run mode.
pub const DRY_RUN_VAR: &str = "BRICKKIT_DRY_RUN";

/// Cooperative cancellation flag shared with workers.
///
/// In-flight backend calls are not interrupted; the engine waits for them
/// before exiting so backend state stays well-defined.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true when cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reconciler behavior switches.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Plan and log only; never mutate.
    pub dry_run: bool,
    /// Record per-resource errors and keep going, instead of aborting the
    /// subtree on first failure.
    pub continue_on_error: bool,
    /// Process subtrees one at a time, in declaration order.
    pub sequential: bool,
    /// Authorize the deletion phase.
    pub allow_deletes: bool,
    /// Let the engine mutate resources it observed but that are not
    /// declared. Off by default: unmanaged state is only reported.
    pub manage_unmanaged: bool,
    /// Concurrent subtree limit.
    pub max_concurrency: usize,
    /// Retry and timeout policy for backend calls.
    pub retry: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        let dry_run = std::env::var(DRY_RUN_VAR)
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            dry_run,
            continue_on_error: false,
            sequential: false,
            allow_deletes: false,
            manage_unmanaged: false,
            max_concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Merges time-bounded grants into declared state before a run.
///
/// Unexpired grants are added to their resource's declared grants, so the
/// differ applies them; expired grants are left out, so the differ
/// revokes them. Approved requests whose window lapsed transition to
/// `expired`.
pub fn apply_time_bound_grants(
    tree: &mut ResourceTree,
    assignments: &[(NodeId, TimeBoundGrant)],
    requests: &mut [AccessRequest],
    now: DateTime<Utc>,
) {
    for (id, time_bound) in assignments {
        if !time_bound.is_expired(now) {
            tree.resource_mut(*id).grants.push(time_bound.grant.clone());
        }
    }
    let expired = brickkit_core::revoke_expired(requests, now);
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "expired access requests");
    }
}

/// The reconciliation engine.
pub struct Reconciler {
    executor: Arc<ResourceExecutor>,
    reader: Arc<StateReader>,
    options: ReconcileOptions,
    cancel: CancellationToken,
    registry: RulesRegistry,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over the two backends.
    #[must_use]
    pub fn new(
        client: Arc<dyn CatalogClient>,
        sql: Arc<dyn SqlExecutor>,
        options: ReconcileOptions,
    ) -> Self {
        let reader = Arc::new(StateReader::new(
            client.clone(),
            sql.clone(),
            options.retry,
        ));
        let executor = Arc::new(ResourceExecutor::new(
            client,
            sql,
            reader.clone(),
            options.retry,
            options.dry_run,
        ));
        Self {
            executor,
            reader,
            options,
            cancel: CancellationToken::new(),
            registry: RulesRegistry::default(),
        }
    }

    /// Replaces the rule registry used for pre-deploy validation, e.g. to
    /// make custom convention rules available.
    #[must_use]
    pub fn with_registry(mut self, registry: RulesRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns a handle that cancels this reconciler's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validates declared state against model invariants and the
    /// convention. Runs before any backend call.
    fn validate(
        &self,
        tree: &ResourceTree,
        convention: Option<&Convention>,
        env: Environment,
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        if let Err(e) = tree.validate(env) {
            violations.push(RuleViolation {
                rule: "model_invariants".into(),
                resource: String::new(),
                detail: e.to_string(),
                severity: RuleMode::Enforced,
            });
        }
        if let Some(convention) = convention {
            for root in tree.roots() {
                match convention.validate(tree, root, env, &self.registry) {
                    Ok(report) => {
                        violations.extend(report.errors);
                        violations.extend(report.warnings);
                    }
                    Err(e) => violations.push(RuleViolation {
                        rule: "convention".into(),
                        resource: tree.fqn(root, env),
                        detail: e.to_string(),
                        severity: RuleMode::Enforced,
                    }),
                }
            }
        }
        // Individual-user grants work but concentrate access on people
        // instead of groups; surface them as advisories.
        for id in tree.ids() {
            for grant in &tree.resource(id).grants {
                if grant.principal.is_user() {
                    violations.push(RuleViolation {
                        rule: "individual_user_grant".into(),
                        resource: tree.fqn(id, env),
                        detail: format!(
                            "grant to individual user '{}'; prefer a group",
                            grant.principal.name
                        ),
                        severity: RuleMode::Advisory,
                    });
                }
            }
        }
        violations
    }

    /// Applies declared state: every subtree, all phases, in order.
    ///
    /// Independent subtrees run concurrently up to `max_concurrency`
    /// unless sequential mode is requested.
    pub async fn deploy(
        &self,
        tree: &ResourceTree,
        convention: Option<&Convention>,
        env: Environment,
    ) -> RunReport {
        let mut report = RunReport::new(false);

        // Declared state must hold before the first backend call.
        report.validation = self.validate(tree, convention, env);
        if report
            .validation
            .iter()
            .any(|violation| violation.severity == RuleMode::Enforced)
        {
            tracing::error!(
                violations = report.validation.len(),
                "declared state failed validation, nothing deployed"
            );
            return report;
        }

        let roots = tree.roots();

        // Infrastructure roots reconcile before container roots; the two
        // groups are otherwise independent.
        let (infra, containers): (Vec<NodeId>, Vec<NodeId>) = roots
            .into_iter()
            .partition(|root| tree.resource(*root).securable_type().is_infrastructure());

        for group in [infra, containers] {
            let results = if self.options.sequential || self.options.max_concurrency <= 1 {
                let mut results = Vec::new();
                for root in group {
                    results.push(self.run_subtree(tree, root, convention, env).await);
                }
                results
            } else {
                futures::stream::iter(group)
                    .map(|root| self.run_subtree(tree, root, convention, env))
                    .buffer_unordered(self.options.max_concurrency)
                    .collect::<Vec<_>>()
                    .await
            };
            for subtree_results in results {
                report.results.extend(subtree_results);
            }
        }
        report
    }

    /// Batch deployment over independently declared trees.
    ///
    /// Trees are processed in order; within each tree, independent
    /// subtrees still run concurrently per [`Reconciler::deploy`].
    pub async fn deploy_all(
        &self,
        trees: &[ResourceTree],
        convention: Option<&Convention>,
        env: Environment,
    ) -> RunReport {
        let mut merged = RunReport::new(false);
        for tree in trees {
            let report = self.deploy(tree, convention, env).await;
            merged.results.extend(report.results);
            merged.validation.extend(report.validation);
        }
        merged
    }

    /// Detect-only pass: reads observed state, computes diffs, classifies
    /// drift, discovers unmanaged children. No mutations.
    pub async fn detect(
        &self,
        tree: &ResourceTree,
        convention: Option<&Convention>,
        env: Environment,
        now: DateTime<Utc>,
    ) -> RunReport {
        let mut report = RunReport::new(true);
        let mut drift = DriftReport::new(env, now);
        let options = drift_options(convention);

        let mut declared_fqns = BTreeSet::new();
        for id in tree.ids() {
            declared_fqns.insert(tree.fqn(id, env));
        }

        for id in tree.ids() {
            if self.cancel.is_cancelled() {
                break;
            }
            let declared = declared_state(tree, id, env, convention);
            match self
                .reader
                .read(declared.securable_type, &declared.full_name)
                .await
            {
                Ok(observed) => {
                    let diff = diff_resource(&declared, observed.as_ref());
                    drift.record(&diff, &options);
                }
                Err(e) => {
                    report.results.push(ExecutionResult::failed(
                        Operation::Error,
                        declared.securable_type,
                        declared.full_name.clone(),
                        e,
                    ));
                }
            }

            // Unmanaged discovery: observed children with no declared
            // counterpart. Reported, never mutated.
            let container_type = tree.resource(id).securable_type();
            for child_type in child_types(container_type) {
                let parent_fqn = tree.fqn(id, env);
                match self.reader.read_children(*child_type, &parent_fqn).await {
                    Ok(children) => {
                        for child in children {
                            if !declared_fqns.contains(&child.full_name) {
                                drift.record_unmanaged(child.full_name);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            parent = %parent_fqn,
                            child_type = %child_type,
                            error = %e,
                            "cannot list children for unmanaged discovery"
                        );
                    }
                }
            }
        }

        drift.emit_metrics();
        report.drift = Some(drift);
        report
    }

    /// Runs all phases for one subtree, returning per-operation results.
    async fn run_subtree(
        &self,
        tree: &ResourceTree,
        root: NodeId,
        convention: Option<&Convention>,
        env: Environment,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        let nodes = tree.subtree(root);

        let phase_order = [
            Phase::Infrastructure,
            Phase::Containers,
            Phase::Functions,
            Phase::Assets,
            Phase::Tags,
            Phase::Grants,
            Phase::Policies,
        ];
        let mut aborted = false;
        for phase in phase_order {
            if aborted {
                break;
            }
            for id in &nodes {
                let securable_type = tree.resource(*id).securable_type();
                if !phase.covers(securable_type) {
                    continue;
                }
                if self.cancel.is_cancelled() || aborted {
                    results.push(ExecutionResult::ok(
                        Operation::NotAttempted,
                        securable_type,
                        tree.fqn(*id, env),
                        "run cancelled before this resource",
                    ));
                    continue;
                }
                let declared = declared_state(tree, *id, env, convention);
                let result = self.run_phase(phase, &declared).await;
                let failed = !result.success;
                results.push(result);
                if failed && !self.options.continue_on_error {
                    tracing::error!(
                        subtree = %tree.fqn(root, env),
                        "aborting subtree after failure"
                    );
                    aborted = true;
                }
            }
        }

        if self.options.allow_deletes && self.options.manage_unmanaged && !aborted {
            results.extend(self.delete_unmanaged(tree, &nodes, env).await);
        }

        results
    }

    /// Executes one phase for one resource.
    async fn run_phase(&self, phase: Phase, declared: &DeclaredState) -> ExecutionResult {
        let started = std::time::Instant::now();
        let operation_kind = if self.options.dry_run {
            Operation::DryRun
        } else {
            Operation::Update
        };

        let outcome: Result<ExecutionResult> = async {
            let diff = self.executor.diff(declared).await?;
            let result = match phase {
                Phase::Infrastructure | Phase::Containers | Phase::Functions | Phase::Assets => {
                    if diff.needs_create() {
                        self.executor.create(declared).await?;
                        let operation = if self.options.dry_run {
                            Operation::DryRun
                        } else {
                            Operation::Create
                        };
                        let mut result = ExecutionResult::ok(
                            operation,
                            declared.securable_type,
                            &declared.full_name,
                            "created",
                        );
                        result.changes_applied = diff.changes.clone();
                        // Creation leaves structural fields (bindings,
                        // isolation) to a follow-up pass against the
                        // fresh record.
                        if !self.options.dry_run {
                            let fresh = self.executor.diff(declared).await?;
                            let follow_up =
                                self.executor.update_structure(declared, &fresh).await?;
                            result.changes_applied.extend(follow_up);
                        }
                        result
                    } else {
                        let changes = self.executor.update_structure(declared, &diff).await?;
                        if changes.is_empty() {
                            ExecutionResult::ok(
                                Operation::Skip,
                                declared.securable_type,
                                &declared.full_name,
                                "compliant",
                            )
                        } else {
                            let mut result = ExecutionResult::ok(
                                operation_kind,
                                declared.securable_type,
                                &declared.full_name,
                                format!("{} structural changes", changes.len()),
                            );
                            result.changes_applied = changes;
                            result
                        }
                    }
                }
                Phase::Tags => {
                    let changes = self.executor.apply_tags(declared, &diff).await?;
                    phase_result(operation_kind, declared, changes, "tag changes")
                }
                Phase::Grants => {
                    let changes = self.executor.apply_grants(declared, &diff).await?;
                    phase_result(operation_kind, declared, changes, "grant changes")
                }
                Phase::Policies => {
                    let changes = self.executor.apply_policies(declared, &diff).await?;
                    phase_result(operation_kind, declared, changes, "policy changes")
                }
            };
            Ok(result)
        }
        .await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => ExecutionResult::failed(
                Operation::Error,
                declared.securable_type,
                &declared.full_name,
                e,
            ),
        };
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result
    }

    /// Deletes observed-but-undeclared children, leaf containers first.
    async fn delete_unmanaged(
        &self,
        tree: &ResourceTree,
        nodes: &[NodeId],
        env: Environment,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        let mut declared_fqns = BTreeSet::new();
        for id in tree.ids() {
            declared_fqns.insert(tree.fqn(id, env));
        }

        // Leaf-to-root: visit containers deepest-first.
        for id in nodes.iter().rev() {
            if self.cancel.is_cancelled() {
                break;
            }
            let container_type = tree.resource(*id).securable_type();
            let parent_fqn = tree.fqn(*id, env);
            for child_type in child_types(container_type) {
                let children = match self.reader.read_children(*child_type, &parent_fqn).await {
                    Ok(children) => children,
                    Err(e) => {
                        results.push(ExecutionResult::failed(
                            Operation::Error,
                            *child_type,
                            parent_fqn.clone(),
                            e,
                        ));
                        continue;
                    }
                };
                for child in children {
                    if declared_fqns.contains(&child.full_name) {
                        continue;
                    }
                    match self.executor.delete(*child_type, &child.full_name).await {
                        Ok(()) => results.push(ExecutionResult::ok(
                            if self.options.dry_run {
                                Operation::DryRun
                            } else {
                                Operation::Delete
                            },
                            *child_type,
                            child.full_name,
                            "deleted unmanaged resource",
                        )),
                        Err(e) => results.push(ExecutionResult::failed(
                            Operation::Error,
                            *child_type,
                            child.full_name,
                            e,
                        )),
                    }
                }
            }
        }
        results
    }
}

fn phase_result(
    operation: Operation,
    declared: &DeclaredState,
    changes: Vec<crate::differ::Change>,
    label: &str,
) -> ExecutionResult {
    if changes.is_empty() {
        ExecutionResult::ok(
            Operation::Skip,
            declared.securable_type,
            &declared.full_name,
            "compliant",
        )
    } else {
        let mut result = ExecutionResult::ok(
            operation,
            declared.securable_type,
            &declared.full_name,
            format!("{} {label}", changes.len()),
        );
        result.changes_applied = changes;
        result
    }
}

/// Derives drift classification options from a convention.
fn drift_options(convention: Option<&Convention>) -> DriftOptions {
    let mut options = DriftOptions::default();
    if let Some(convention) = convention {
        for required in &convention.required_tags {
            options.required_tags.insert(required.key.clone());
        }
        options
            .security_sensitive_tags
            .extend(convention.security_sensitive_tags.iter().cloned());
    }
    options
}

/// Which securable types a structural phase covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Infrastructure,
    Containers,
    Functions,
    Assets,
    Tags,
    Grants,
    Policies,
}

impl Phase {
    fn covers(self, securable_type: SecurableType) -> bool {
        match self {
            Self::Infrastructure => securable_type.is_infrastructure(),
            Self::Containers => securable_type.is_container(),
            Self::Functions => securable_type == SecurableType::Function,
            Self::Assets => matches!(
                securable_type,
                SecurableType::Table
                    | SecurableType::Volume
                    | SecurableType::Model
                    | SecurableType::Space
                    | SecurableType::VectorEndpoint
                    | SecurableType::VectorIndex
            ),
            // Cross-cutting phases cover every securable.
            Self::Tags | Self::Grants | Self::Policies => true,
        }
    }
}

/// Observed child types listed per container type during discovery.
fn child_types(container: SecurableType) -> &'static [SecurableType] {
    match container {
        SecurableType::Catalog => &[SecurableType::Schema],
        SecurableType::Schema => &[
            SecurableType::Table,
            SecurableType::Volume,
            SecurableType::Function,
            SecurableType::Model,
        ],
        _ => &[],
    }
}
