//! # brickkit-engine
//!
//! The reconciliation engine: reads observed state from a catalog
//! backend, diffs it against declared state, classifies drift, and
//! applies the minimal ordered set of changes.
//!
//! - **Backends**: [`backend::CatalogClient`] and [`backend::SqlExecutor`]
//!   are the only interfaces the engine invokes; implementations live
//!   with the caller
//! - **State Reader**: cached, singleflight-guarded observed-state reads
//! - **Differ**: field-level changes between declared and observed state
//! - **Drift Detector**: critical/warning/info classification and the
//!   missing/unmanaged/compliant inventory
//! - **Reconciler**: ordered phases, retries with backoff, dry-run,
//!   cooperative cancellation, bounded concurrency
//!
//! The engine is stateless between runs: observed state is re-read at the
//! start of every reconciliation, and declared state is never mutated
//! after the run starts.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod differ;
pub mod drift;
pub mod executor;
pub mod metrics;
pub mod reconciler;
pub mod result;
pub mod retry;
pub mod sql;
pub mod state;

pub use backend::{
    CatalogClient, FunctionInfo, GrantDelta, GrantMap, PolicyRecord, Row, SqlExecutor,
    StateRecord, TableExtendedInfo,
};
pub use differ::{declared_state, diff_resource, Change, ChangeAction, DeclaredState, Diff};
pub use drift::{DriftEntry, DriftOptions, DriftReport, DriftSeverity, DriftedChange};
pub use executor::ResourceExecutor;
pub use reconciler::{
    apply_time_bound_grants, CancellationToken, ReconcileOptions, Reconciler, DRY_RUN_VAR,
};
pub use result::{ExecutionResult, Operation, ReconcileResult, RunReport};
pub use retry::{RetryPolicy, MAX_RETRIES_VAR};
pub use state::StateReader;
