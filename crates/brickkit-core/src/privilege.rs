//! Privileges and their validity per securable type.
//!
//! Privileges are always additive: multiple grants accumulate, and removal
//! requires an explicit revoke. `ALL_PRIVILEGES` expands at grant time to
//! the applicable set for the securable type (MANAGE excluded). `CAN_*`
//! levels and `IS_OWNER` are object-ACL permissions for the assistive
//! assets (spaces, vector endpoints/indexes) that are governed through the
//! permissions API rather than catalog grants.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::securable::SecurableType;

/// A grantable privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)] // variant names are the documentation; they mirror the backend vocabulary
pub enum Privilege {
    // General
    Access,
    AllPrivileges,
    ApplyTag,
    Browse,
    Manage,

    // Catalog
    UseCatalog,
    CreateCatalog,
    CreateSchema,
    CreateForeignCatalog,

    // Schema
    UseSchema,
    CreateTable,
    CreateVolume,
    CreateFunction,
    CreateModel,
    CreateMaterializedView,

    // Table / view
    Select,
    Modify,
    Refresh,

    // Volume
    ReadVolume,
    WriteVolume,

    // Function
    Execute,

    // Storage / external location
    CreateExternalTable,
    CreateExternalVolume,
    CreateExternalLocation,
    CreateStorageCredential,
    ReadFiles,
    WriteFiles,

    // Connection
    UseConnection,

    // Object ACL levels (compute-adjacent assets)
    CanRead,
    CanRun,
    CanManage,
    CanView,
    CanRestart,
    CanEdit,
    CanUse,
    CanBind,
    CanAttachTo,
    CanCreate,
    IsOwner,
}

impl Privilege {
    /// Returns the uppercase wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "ACCESS",
            Self::AllPrivileges => "ALL_PRIVILEGES",
            Self::ApplyTag => "APPLY_TAG",
            Self::Browse => "BROWSE",
            Self::Manage => "MANAGE",
            Self::UseCatalog => "USE_CATALOG",
            Self::CreateCatalog => "CREATE_CATALOG",
            Self::CreateSchema => "CREATE_SCHEMA",
            Self::CreateForeignCatalog => "CREATE_FOREIGN_CATALOG",
            Self::UseSchema => "USE_SCHEMA",
            Self::CreateTable => "CREATE_TABLE",
            Self::CreateVolume => "CREATE_VOLUME",
            Self::CreateFunction => "CREATE_FUNCTION",
            Self::CreateModel => "CREATE_MODEL",
            Self::CreateMaterializedView => "CREATE_MATERIALIZED_VIEW",
            Self::Select => "SELECT",
            Self::Modify => "MODIFY",
            Self::Refresh => "REFRESH",
            Self::ReadVolume => "READ_VOLUME",
            Self::WriteVolume => "WRITE_VOLUME",
            Self::Execute => "EXECUTE",
            Self::CreateExternalTable => "CREATE_EXTERNAL_TABLE",
            Self::CreateExternalVolume => "CREATE_EXTERNAL_VOLUME",
            Self::CreateExternalLocation => "CREATE_EXTERNAL_LOCATION",
            Self::CreateStorageCredential => "CREATE_STORAGE_CREDENTIAL",
            Self::ReadFiles => "READ_FILES",
            Self::WriteFiles => "WRITE_FILES",
            Self::UseConnection => "USE_CONNECTION",
            Self::CanRead => "CAN_READ",
            Self::CanRun => "CAN_RUN",
            Self::CanManage => "CAN_MANAGE",
            Self::CanView => "CAN_VIEW",
            Self::CanRestart => "CAN_RESTART",
            Self::CanEdit => "CAN_EDIT",
            Self::CanUse => "CAN_USE",
            Self::CanBind => "CAN_BIND",
            Self::CanAttachTo => "CAN_ATTACH_TO",
            Self::CanCreate => "CAN_CREATE",
            Self::IsOwner => "IS_OWNER",
        }
    }

    /// Returns the privileges valid on the given securable type.
    #[must_use]
    pub const fn valid_set(securable_type: SecurableType) -> &'static [Self] {
        match securable_type {
            SecurableType::Metastore => &[
                Self::CreateCatalog,
                Self::CreateExternalLocation,
                Self::CreateStorageCredential,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Catalog => &[
                Self::UseCatalog,
                Self::UseSchema,
                Self::CreateSchema,
                Self::CreateTable,
                Self::CreateVolume,
                Self::CreateFunction,
                Self::CreateModel,
                Self::CreateMaterializedView,
                Self::Select,
                Self::Modify,
                Self::Refresh,
                Self::Execute,
                Self::ReadVolume,
                Self::WriteVolume,
                Self::ApplyTag,
                Self::Browse,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Schema => &[
                Self::UseSchema,
                Self::CreateTable,
                Self::CreateVolume,
                Self::CreateFunction,
                Self::CreateModel,
                Self::CreateMaterializedView,
                Self::Select,
                Self::Modify,
                Self::Refresh,
                Self::Execute,
                Self::ReadVolume,
                Self::WriteVolume,
                Self::ApplyTag,
                Self::Browse,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Table => &[
                Self::Select,
                Self::Modify,
                Self::Refresh,
                Self::ApplyTag,
                Self::Browse,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Volume => &[
                Self::ReadVolume,
                Self::WriteVolume,
                Self::ApplyTag,
                Self::Browse,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Function => &[
                Self::Execute,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Model => &[
                Self::Execute,
                Self::ApplyTag,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::StorageCredential => &[
                Self::CreateExternalLocation,
                Self::CreateExternalTable,
                Self::CreateExternalVolume,
                Self::ReadFiles,
                Self::WriteFiles,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::ExternalLocation => &[
                Self::CreateExternalTable,
                Self::CreateExternalVolume,
                Self::ReadFiles,
                Self::WriteFiles,
                Self::Browse,
                Self::Manage,
                Self::AllPrivileges,
            ],
            SecurableType::Connection => &[
                Self::UseConnection,
                Self::CreateForeignCatalog,
                Self::AllPrivileges,
            ],
            SecurableType::Space => &[
                Self::Access,
                Self::Manage,
                Self::CanView,
                Self::CanEdit,
                Self::CanRun,
                Self::CanManage,
                Self::IsOwner,
            ],
            SecurableType::VectorEndpoint => &[
                Self::Access,
                Self::Manage,
                Self::CanUse,
                Self::CanRestart,
                Self::CanBind,
                Self::CanManage,
                Self::IsOwner,
            ],
            SecurableType::VectorIndex => &[
                Self::Access,
                Self::Manage,
                Self::CanRead,
                Self::CanAttachTo,
                Self::CanCreate,
                Self::CanManage,
                Self::IsOwner,
            ],
        }
    }

    /// Returns true when this privilege may be granted on the type.
    #[must_use]
    pub fn is_valid_for(self, securable_type: SecurableType) -> bool {
        Self::valid_set(securable_type).contains(&self)
    }

    /// Expands `ALL_PRIVILEGES` for a securable type.
    ///
    /// MANAGE is deliberately excluded from the expansion; it must be
    /// granted explicitly.
    #[must_use]
    pub const fn all_privileges_expansion(securable_type: SecurableType) -> &'static [Self] {
        match securable_type {
            SecurableType::Metastore => &[
                Self::CreateCatalog,
                Self::CreateExternalLocation,
                Self::CreateStorageCredential,
            ],
            SecurableType::Catalog => &[
                Self::UseCatalog,
                Self::CreateSchema,
                Self::CreateTable,
                Self::CreateVolume,
                Self::CreateFunction,
                Self::CreateModel,
                Self::Select,
                Self::Modify,
                Self::Refresh,
                Self::Execute,
                Self::ReadVolume,
                Self::WriteVolume,
            ],
            SecurableType::Schema => &[
                Self::UseSchema,
                Self::CreateTable,
                Self::CreateVolume,
                Self::CreateFunction,
                Self::CreateModel,
                Self::Select,
                Self::Modify,
                Self::Refresh,
                Self::Execute,
                Self::ReadVolume,
                Self::WriteVolume,
            ],
            SecurableType::Table => &[Self::Select, Self::Modify, Self::Refresh],
            SecurableType::Volume => &[Self::ReadVolume, Self::WriteVolume],
            SecurableType::Function => &[Self::Execute],
            SecurableType::Model => &[Self::Execute, Self::ApplyTag],
            SecurableType::StorageCredential => &[
                Self::CreateExternalLocation,
                Self::CreateExternalTable,
                Self::CreateExternalVolume,
                Self::ReadFiles,
                Self::WriteFiles,
            ],
            SecurableType::ExternalLocation => &[
                Self::CreateExternalTable,
                Self::CreateExternalVolume,
                Self::ReadFiles,
                Self::WriteFiles,
            ],
            SecurableType::Connection => &[Self::UseConnection, Self::CreateForeignCatalog],
            SecurableType::Space
            | SecurableType::VectorEndpoint
            | SecurableType::VectorIndex => &[Self::Access],
        }
    }

    /// Returns the privileges this privilege depends on.
    ///
    /// Granting SELECT on a table is useless without USE_SCHEMA and
    /// USE_CATALOG on the containers; the engine surfaces missing
    /// dependencies as advisory diagnostics.
    #[must_use]
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::CreateTable
            | Self::CreateVolume
            | Self::CreateFunction
            | Self::CreateModel
            | Self::CreateMaterializedView => &[Self::UseSchema, Self::UseCatalog],
            Self::Select | Self::Modify | Self::Execute | Self::ReadVolume => {
                &[Self::UseSchema, Self::UseCatalog]
            }
            Self::WriteVolume => &[Self::UseSchema, Self::UseCatalog, Self::ReadVolume],
            Self::CreateSchema => &[Self::UseCatalog],
            Self::CreateExternalLocation => &[Self::CreateStorageCredential],
            _ => &[],
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates privilege dependencies against an existing privilege set.
///
/// Returns one advisory message per privilege whose dependencies are not
/// covered by either the requested or the existing set.
#[must_use]
pub fn validate_privilege_dependencies(
    requested: &BTreeSet<Privilege>,
    existing: &BTreeSet<Privilege>,
) -> Vec<String> {
    let mut diagnostics = Vec::new();
    for privilege in requested {
        let missing: Vec<&str> = privilege
            .dependencies()
            .iter()
            .filter(|dep| !requested.contains(dep) && !existing.contains(dep))
            .map(|dep| dep.as_str())
            .collect();
        if !missing.is_empty() {
            diagnostics.push(format!(
                "privilege {privilege} requires: {}",
                missing.join(", ")
            ));
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_is_valid_on_tables_not_volumes() {
        assert!(Privilege::Select.is_valid_for(SecurableType::Table));
        assert!(!Privilege::Select.is_valid_for(SecurableType::Volume));
    }

    #[test]
    fn expansion_excludes_manage() {
        for securable_type in SecurableType::ALL {
            assert!(
                !Privilege::all_privileges_expansion(securable_type).contains(&Privilege::Manage),
                "MANAGE must not be part of the {securable_type} expansion"
            );
        }
    }

    #[test]
    fn dependency_validation_reports_missing_container_access() {
        let requested = BTreeSet::from([Privilege::Select]);
        let existing = BTreeSet::new();
        let diagnostics = validate_privilege_dependencies(&requested, &existing);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("USE_SCHEMA"));
        assert!(diagnostics[0].contains("USE_CATALOG"));
    }

    #[test]
    fn dependency_validation_accepts_covered_sets() {
        let requested = BTreeSet::from([Privilege::Select, Privilege::UseSchema]);
        let existing = BTreeSet::from([Privilege::UseCatalog]);
        assert!(validate_privilege_dependencies(&requested, &existing).is_empty());
    }
}
