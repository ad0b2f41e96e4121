//! # brickkit-core
//!
//! Core governance model for the Brickkit reconciliation engine.
//!
//! This crate provides the foundational types used across all Brickkit
//! components:
//!
//! - **Identity & Environment**: the process-wide environment tag and
//!   principals with environment-aware name resolution
//! - **Resource Model**: typed descriptors for every governed securable,
//!   arranged in a single-parent hierarchy with inheritance semantics
//! - **Access Model**: privileges, grants, reusable access policies,
//!   access requests, and ABAC policies
//! - **Error Types**: the shared error taxonomy and result alias
//!
//! ## Crate Boundary
//!
//! `brickkit-core` is the only crate allowed to define shared governance
//! primitives. It performs no I/O: reading observed state and mutating the
//! backend belong to `brickkit-engine`.
//!
//! ## Example
//!
//! ```rust
//! use brickkit_core::prelude::*;
//!
//! let mut tree = ResourceTree::new();
//! let catalog = tree
//!     .add_root(
//!         Resource::catalog("analytics").with_owner(Principal::group("data_owners")),
//!         Environment::Dev,
//!     )
//!     .unwrap();
//! assert_eq!(tree.fqn(catalog, Environment::Dev), "analytics_dev");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod abac;
pub mod environment;
pub mod error;
pub mod grant;
pub mod principal;
pub mod privilege;
pub mod request;
pub mod resource;
pub mod securable;
pub mod tag;
pub mod tree;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use brickkit_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::abac::{AbacPolicy, AbacPolicyType, MatchCondition};
    pub use crate::environment::{current_environment, set_environment, Environment};
    pub use crate::error::{Error, Result};
    pub use crate::grant::{AccessPolicy, Grant, TimeBoundGrant};
    pub use crate::principal::{Principal, PrincipalType};
    pub use crate::privilege::Privilege;
    pub use crate::request::{AccessRequest, AccessRequestStatus};
    pub use crate::resource::{
        CreateParams, IsolationMode, Resource, ResourceKind, UpdateParams, WorkspaceBinding,
    };
    pub use crate::securable::SecurableType;
    pub use crate::tag::{Tag, TagSet};
    pub use crate::tree::{AttachHook, NodeId, ResourceTree};
}

// Re-export key types at crate root for ergonomics
pub use abac::{AbacPolicy, AbacPolicyType, MatchCondition};
pub use environment::{current_environment, set_environment, Environment};
pub use error::{Error, Result};
pub use grant::{AccessPolicy, Grant, TimeBoundGrant};
pub use principal::{Principal, PrincipalType};
pub use privilege::{validate_privilege_dependencies, Privilege};
pub use request::{revoke_expired, AccessRequest, AccessRequestStatus};
pub use resource::{
    BindingType, CatalogSpec, CloudCredential, ColumnMaskSpec, ColumnSpec, ConnectionSpec,
    ConnectionType, CreateParams, ExternalLocationSpec, FunctionKind, FunctionLanguage, FunctionParameter,
    FunctionSpec, IsolationMode, MetastoreSpec, ModelSpec, Resource, ResourceKind, RowFilterSpec,
    SchemaSpec, SpaceSpec, StorageCredentialSpec, TableSpec, TableType, UpdateParams,
    VectorEndpointSpec, VectorIndexSpec, VolumeSpec, VolumeType, WorkspaceBinding,
};
pub use securable::SecurableType;
pub use tag::{Tag, TagSet};
pub use tree::{AttachHook, NodeId, ResourceTree};
