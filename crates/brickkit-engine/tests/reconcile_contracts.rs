//! Reconciler contract tests: idempotence, ordering, retries, failure
//! isolation, cancellation, and reference semantics.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use brickkit_core::{
    Environment, Grant, IsolationMode, Principal, Privilege, Resource, ResourceTree, TableSpec,
    VolumeSpec, WorkspaceBinding,
};
use brickkit_engine::{Operation, ReconcileOptions, Reconciler, StateRecord};
use brickkit_test_utils::{CatalogOp, FailKind, FakeBackend};

const ENV: Environment = Environment::Dev;

fn options() -> ReconcileOptions {
    ReconcileOptions {
        dry_run: false,
        sequential: true,
        ..ReconcileOptions::default()
    }
}

fn reconciler(backend: &FakeBackend, options: ReconcileOptions) -> Reconciler {
    Reconciler::new(backend.catalog.clone(), backend.sql.clone(), options)
}

fn full_tree() -> ResourceTree {
    let mut tree = ResourceTree::new();
    let catalog = tree
        .add_root(
            Resource::catalog("analytics")
                .with_owner(Principal::group("data_owners"))
                .with_grant(Grant::new(
                    Principal::group("analysts"),
                    [Privilege::UseCatalog, Privilege::UseSchema, Privilege::Select],
                )),
            ENV,
        )
        .unwrap();
    let schema = tree
        .attach_child(
            catalog,
            Resource::schema("customers").with_tag("team", "quant"),
            ENV,
        )
        .unwrap();
    tree.attach_child(
        schema,
        Resource::table("orders", TableSpec::default()).with_tag("pii", "false"),
        ENV,
    )
    .unwrap();
    tree.attach_child(
        schema,
        Resource::volume("raw_files", VolumeSpec::default()),
        ENV,
    )
    .unwrap();
    tree
}

/// Property 4: reconcile twice; the second run applies nothing.
#[tokio::test]
async fn reconciliation_is_idempotent() {
    let backend = FakeBackend::new();
    let tree = full_tree();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert!(
        report
            .results
            .iter()
            .all(|result| result.operation == Operation::Skip),
        "second deploy must be a no-op: {report:?}"
    );
}

/// Round-trip: observed state after apply is equivalent to declared
/// state under the model's comparison.
#[tokio::test]
async fn apply_then_read_matches_declared() {
    let backend = FakeBackend::new();
    let tree = full_tree();
    reconciler(&backend, options()).deploy(&tree, None, ENV).await;

    let catalog = backend.store.get("analytics_dev").unwrap();
    assert_eq!(catalog.owner.as_deref(), Some("data_owners_dev"));
    assert!(catalog.grants["analysts_dev"].contains(&Privilege::UseCatalog));

    let schema = backend.store.get("analytics_dev.customers_dev").unwrap();
    assert_eq!(schema.tags.get("team"), Some("quant"));
    // Cascaded grant materialized with only schema-valid privileges.
    assert!(schema.grants["analysts_dev"].contains(&Privilege::UseSchema));
    assert!(!schema.grants["analysts_dev"].contains(&Privilege::UseCatalog));

    let table = backend
        .store
        .get("analytics_dev.customers_dev.orders_dev")
        .unwrap();
    assert_eq!(table.tags.get("pii"), Some("false"));
    assert!(table.grants["analysts_dev"].contains(&Privilege::Select));

    assert!(backend
        .store
        .contains("analytics_dev.customers_dev.raw_files_dev"));
}

/// Containers are created before assets; tags precede grants.
#[tokio::test]
async fn phases_run_in_order() {
    let backend = FakeBackend::new();
    let tree = full_tree();
    reconciler(&backend, options()).deploy(&tree, None, ENV).await;

    let ops = backend.catalog.operations();
    let position = |predicate: &dyn Fn(&CatalogOp) -> bool| {
        ops.iter().position(|op| predicate(op)).unwrap()
    };

    let catalog_create = position(&|op| {
        matches!(op, CatalogOp::Create { full_name } if full_name == "analytics_dev")
    });
    let schema_create = position(&|op| {
        matches!(op, CatalogOp::Create { full_name } if full_name == "analytics_dev.customers_dev")
    });
    let first_tags = position(&|op| matches!(op, CatalogOp::SetTags { .. }));
    let first_grants = position(&|op| matches!(op, CatalogOp::UpdateGrants { .. }));

    assert!(catalog_create < schema_create, "parent before child");
    assert!(schema_create < first_tags, "structure before tags");
    assert!(first_tags < first_grants, "tags before grants");
}

/// Transient failures are retried until they succeed.
#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let backend = FakeBackend::new();
    backend
        .catalog
        .inject_failure("create", 2, FailKind::Transient);

    let mut tree = ResourceTree::new();
    tree.add_root(Resource::catalog("analytics"), ENV).unwrap();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");
    assert!(backend.store.contains("analytics_dev"));

    let creates = backend
        .catalog
        .operations()
        .iter()
        .filter(|op| matches!(op, CatalogOp::Create { .. }))
        .count();
    assert_eq!(creates, 3, "two failures plus the success");
}

/// Permission denials are terminal for the resource; without
/// continue-on-error the rest of the subtree is not attempted.
#[tokio::test]
async fn permission_denied_aborts_subtree() {
    let backend = FakeBackend::new();
    backend
        .catalog
        .inject_failure("create", 1, FailKind::PermissionDenied);

    let tree = full_tree();
    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;

    assert_eq!(report.exit_status(), 2);
    let failed: Vec<_> = report.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].resource_name, "analytics_dev");
    assert!(report
        .results
        .iter()
        .any(|result| result.operation == Operation::NotAttempted));

    // Exactly one create attempt: permission errors are not retried.
    let creates = backend
        .catalog
        .operations()
        .iter()
        .filter(|op| matches!(op, CatalogOp::Create { .. }))
        .count();
    assert_eq!(creates, 1);
}

/// With continue-on-error the engine records the failure and keeps
/// reconciling siblings.
#[tokio::test]
async fn continue_on_error_processes_siblings() {
    let backend = FakeBackend::new();
    backend
        .catalog
        .inject_failure("create", 1, FailKind::PermissionDenied);

    let tree = full_tree();
    let report = reconciler(
        &backend,
        ReconcileOptions {
            continue_on_error: true,
            ..options()
        },
    )
    .deploy(&tree, None, ENV)
    .await;

    assert_eq!(report.exit_status(), 2);
    // The schema was still created even though the catalog create failed.
    assert!(backend.store.contains("analytics_dev.customers_dev"));
    assert!(report
        .results
        .iter()
        .all(|result| result.operation != Operation::NotAttempted));
}

/// A cancelled run reports unreached resources as not attempted and
/// makes no further backend calls.
#[tokio::test]
async fn cancellation_marks_resources_not_attempted() {
    let backend = FakeBackend::new();
    let tree = full_tree();
    let engine = reconciler(&backend, options());
    engine.cancellation_token().cancel();

    let report = engine.deploy(&tree, None, ENV).await;
    assert!(report
        .results
        .iter()
        .all(|result| result.operation == Operation::NotAttempted));
    assert!(backend.catalog.operations().is_empty());
}

/// Property 6: when a principal both gains and loses privileges, the
/// additive delta is sent before the subtractive one, so privileges kept
/// across the run are never transiently absent.
#[tokio::test]
async fn grant_adds_are_sent_before_removes() {
    let backend = FakeBackend::new();
    backend.store.seed(StateRecord::named(
        brickkit_core::SecurableType::Catalog,
        "analytics_dev",
    ));
    let mut observed = StateRecord::named(
        brickkit_core::SecurableType::Schema,
        "analytics_dev.customers_dev",
    );
    observed
        .grants
        .entry("alice@example.com".into())
        .or_default()
        .extend([Privilege::Select, Privilege::Modify]);
    backend.store.seed(observed);

    let mut tree = ResourceTree::new();
    let catalog = tree.add_root(Resource::catalog("analytics"), ENV).unwrap();
    tree.attach_child(
        catalog,
        Resource::schema("customers").with_grant(Grant::new(
            Principal::user("alice@example.com"),
            [Privilege::Select, Privilege::UseSchema],
        )),
        ENV,
    )
    .unwrap();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");

    let deltas: Vec<_> = backend
        .catalog
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            CatalogOp::UpdateGrants { delta, .. } => Some(delta),
            _ => None,
        })
        .collect();
    assert_eq!(deltas.len(), 2);
    assert!(!deltas[0].add.is_empty() && deltas[0].remove.is_empty());
    assert!(deltas[1].add.is_empty() && !deltas[1].remove.is_empty());
    assert!(deltas[0].add["alice@example.com"].contains(&Privilege::UseSchema));
    assert!(deltas[1].remove["alice@example.com"].contains(&Privilege::Modify));

    let record = backend.store.get("analytics_dev.customers_dev").unwrap();
    assert_eq!(
        record.grants["alice@example.com"],
        [Privilege::Select, Privilege::UseSchema].into_iter().collect()
    );
}

/// Workspace bindings are applied before ISOLATED is set; the fake
/// backend rejects the opposite order.
#[tokio::test]
async fn bindings_precede_isolation() {
    let backend = FakeBackend::new();
    let mut tree = ResourceTree::new();
    tree.add_root(
        Resource::catalog("restricted").with_isolation(
            IsolationMode::Isolated,
            [WorkspaceBinding::read_write(101), WorkspaceBinding::read_only(202)],
        ),
        ENV,
    )
    .unwrap();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");

    let record = backend.store.get("restricted_dev").unwrap();
    assert_eq!(record.isolation_mode, Some(IsolationMode::Isolated));
    assert_eq!(record.workspace_bindings.len(), 2);

    let ops = backend.catalog.operations();
    let bindings = ops
        .iter()
        .position(|op| matches!(op, CatalogOp::UpdateBindings { .. }))
        .unwrap();
    let isolation = ops
        .iter()
        .position(|op| matches!(op, CatalogOp::SetIsolation { .. }))
        .unwrap();
    assert!(bindings < isolation);
}

/// References are governed but never created: tags and grants apply,
/// creation is skipped, and a missing reference is a per-resource error.
#[tokio::test]
async fn references_are_governed_not_created() {
    let backend = FakeBackend::new();
    backend.store.seed(StateRecord::named(
        brickkit_core::SecurableType::Catalog,
        "shared_reference_data",
    ));

    let mut tree = ResourceTree::new();
    tree.add_root(
        Resource::catalog("shared_reference_data")
            .as_reference()
            .with_tag("governed_by", "brickkit"),
        ENV,
    )
    .unwrap();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");
    assert!(backend
        .catalog
        .operations()
        .iter()
        .all(|op| !matches!(op, CatalogOp::Create { .. })));
    let record = backend.store.get("shared_reference_data").unwrap();
    assert_eq!(record.tags.get("governed_by"), Some("brickkit"));
}

/// A declared reference that does not exist fails its resource instead
/// of being created.
#[tokio::test]
async fn missing_reference_is_an_error() {
    let backend = FakeBackend::new();
    let mut tree = ResourceTree::new();
    tree.add_root(Resource::catalog("ghost").as_reference(), ENV)
        .unwrap();

    let report = reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 2);
    assert!(!backend.store.contains("ghost"));
}

/// The per-resource executor contract: `reconcile` composes read, diff,
/// and the phase applications for one resource, and is idempotent.
#[tokio::test]
async fn single_resource_reconcile_applies_and_settles() {
    use std::sync::Arc;

    use brickkit_core::Tag;
    use brickkit_engine::{declared_state, ResourceExecutor, RetryPolicy, StateReader};

    let backend = FakeBackend::new();
    let mut observed = StateRecord::named(brickkit_core::SecurableType::Catalog, "analytics_dev");
    observed.tags.insert("stale", "yes");
    backend.store.seed(observed);

    let mut tree = ResourceTree::new();
    let catalog = tree
        .add_root(
            Resource::catalog("analytics")
                .with_owner(Principal::group("data_owners"))
                .with_tag("team", "quant"),
            ENV,
        )
        .unwrap();
    let declared = declared_state(&tree, catalog, ENV, None);

    let reader = Arc::new(StateReader::new(
        backend.catalog.clone(),
        backend.sql.clone(),
        RetryPolicy::default(),
    ));
    let executor = ResourceExecutor::new(
        backend.catalog.clone(),
        backend.sql.clone(),
        reader,
        RetryPolicy::default(),
        false,
    );

    let result = executor.reconcile(&declared).await.unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert!(!result.changes_applied.is_empty());

    let record = backend.store.get("analytics_dev").unwrap();
    assert_eq!(record.owner.as_deref(), Some("data_owners_dev"));
    assert_eq!(record.tags.get("team"), Some("quant"));
    assert_eq!(record.tags.get("stale"), None, "extra tags are removed");
    assert_eq!(record.tags.to_tags(), vec![Tag::new("team", "quant")]);

    // Second pass applies nothing.
    let result = executor.reconcile(&declared).await.unwrap();
    assert!(result.changes_applied.is_empty(), "{result:?}");
}

/// Unmanaged resources are reported by detect and left untouched by
/// deploy unless explicitly opted in.
#[tokio::test]
async fn unmanaged_resources_are_reported_not_mutated() {
    let backend = FakeBackend::new();
    backend.store.seed(StateRecord::named(
        brickkit_core::SecurableType::Catalog,
        "analytics_dev",
    ));
    backend.store.seed(StateRecord::named(
        brickkit_core::SecurableType::Schema,
        "analytics_dev.scratch",
    ));

    let mut tree = ResourceTree::new();
    tree.add_root(Resource::catalog("analytics"), ENV).unwrap();

    let engine = reconciler(&backend, options());
    let report = engine
        .detect(&tree, None, ENV, chrono::Utc::now())
        .await;
    let drift = report.drift.unwrap();
    assert_eq!(drift.unmanaged, vec!["analytics_dev.scratch"]);

    // A plain deploy leaves the unmanaged schema alone.
    reconciler(&backend, options()).deploy(&tree, None, ENV).await;
    assert!(backend.store.contains("analytics_dev.scratch"));

    // Opting in deletes it.
    let opt_in = reconciler(
        &backend,
        ReconcileOptions {
            allow_deletes: true,
            manage_unmanaged: true,
            ..options()
        },
    );
    let report = opt_in.deploy(&tree, None, ENV).await;
    assert_eq!(report.exit_status(), 0, "{report:?}");
    assert!(!backend.store.contains("analytics_dev.scratch"));
}
