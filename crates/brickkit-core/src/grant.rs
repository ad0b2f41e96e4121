//! Grants, reusable access policies, and time-bounded grants.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::principal::Principal;
use crate::privilege::Privilege;
use crate::securable::SecurableType;

/// A set of privileges attached to a principal on one securable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// The grantee.
    pub principal: Principal,
    /// The granted privileges.
    pub privileges: BTreeSet<Privilege>,
}

impl Grant {
    /// Creates a grant.
    #[must_use]
    pub fn new(principal: Principal, privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            principal,
            privileges: privileges.into_iter().collect(),
        }
    }

    /// Validates every privilege against the securable type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first privilege that is
    /// not in the valid set for `securable_type`.
    pub fn validate_for(&self, securable_type: SecurableType) -> Result<()> {
        for privilege in &self.privileges {
            if !privilege.is_valid_for(securable_type) {
                return Err(Error::validation(
                    "privilege_valid_for_type",
                    &self.principal.name,
                    format!("privilege {privilege} is not valid on {securable_type}"),
                ));
            }
        }
        Ok(())
    }

    /// Flattens to `(resolved principal, privilege)` pairs for comparison.
    ///
    /// Two grants are equal at the backend exactly when these pairs match.
    #[must_use]
    pub fn resolved_pairs(&self, env: Environment) -> Vec<(String, Privilege)> {
        let name = self.principal.resolved_name(env);
        self.privileges
            .iter()
            .map(|p| (name.clone(), *p))
            .collect()
    }
}

/// A named, reusable privilege bundle mapped per securable type.
///
/// Policies propagate through the hierarchy: granted at catalog level,
/// each descendant extracts the privileges relevant to its own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Policy name (READER, WRITER, OWNER_ADMIN, or a custom name).
    pub name: String,
    /// Privileges per securable type.
    pub privilege_map: BTreeMap<SecurableType, BTreeSet<Privilege>>,
}

impl AccessPolicy {
    /// Read access: USE on containers, SELECT/READ/EXECUTE on assets.
    #[must_use]
    pub fn reader() -> Self {
        Self::custom(
            "READER",
            [
                (
                    SecurableType::Catalog,
                    vec![Privilege::UseCatalog, Privilege::Browse],
                ),
                (
                    SecurableType::Schema,
                    vec![Privilege::UseSchema, Privilege::Select, Privilege::ReadVolume],
                ),
                (SecurableType::Table, vec![Privilege::Select]),
                (SecurableType::Volume, vec![Privilege::ReadVolume]),
                (SecurableType::Function, vec![Privilege::Execute]),
                (SecurableType::Model, vec![Privilege::Execute]),
                (SecurableType::Space, vec![Privilege::Access]),
                (SecurableType::VectorEndpoint, vec![Privilege::Access]),
                (SecurableType::VectorIndex, vec![Privilege::Access]),
            ],
        )
    }

    /// Read/write access: reader plus create and modify privileges.
    #[must_use]
    pub fn writer() -> Self {
        Self::custom(
            "WRITER",
            [
                (
                    SecurableType::Catalog,
                    vec![Privilege::UseCatalog, Privilege::CreateSchema],
                ),
                (
                    SecurableType::Schema,
                    vec![
                        Privilege::UseSchema,
                        Privilege::Select,
                        Privilege::Modify,
                        Privilege::CreateTable,
                        Privilege::CreateVolume,
                        Privilege::CreateFunction,
                        Privilege::CreateModel,
                    ],
                ),
                (
                    SecurableType::Table,
                    vec![Privilege::Select, Privilege::Modify],
                ),
                (
                    SecurableType::Volume,
                    vec![Privilege::ReadVolume, Privilege::WriteVolume],
                ),
                (SecurableType::Function, vec![Privilege::Execute]),
                (
                    SecurableType::Model,
                    vec![Privilege::Execute, Privilege::ApplyTag],
                ),
                (SecurableType::Space, vec![Privilege::Access]),
                (SecurableType::VectorEndpoint, vec![Privilege::Access]),
                (SecurableType::VectorIndex, vec![Privilege::Access]),
            ],
        )
    }

    /// Full management for owning teams: ALL_PRIVILEGES at catalog level,
    /// MANAGE everywhere below, management of infrastructure securables.
    #[must_use]
    pub fn owner_admin() -> Self {
        Self::custom(
            "OWNER_ADMIN",
            [
                (
                    SecurableType::Catalog,
                    vec![Privilege::AllPrivileges, Privilege::Manage],
                ),
                (
                    SecurableType::Schema,
                    vec![
                        Privilege::UseSchema,
                        Privilege::Select,
                        Privilege::Modify,
                        Privilege::CreateTable,
                        Privilege::CreateVolume,
                        Privilege::CreateFunction,
                        Privilege::Manage,
                    ],
                ),
                (
                    SecurableType::Table,
                    vec![Privilege::Select, Privilege::Modify, Privilege::Manage],
                ),
                (
                    SecurableType::Volume,
                    vec![
                        Privilege::ReadVolume,
                        Privilege::WriteVolume,
                        Privilege::Manage,
                    ],
                ),
                (
                    SecurableType::Function,
                    vec![Privilege::Execute, Privilege::Manage],
                ),
                (
                    SecurableType::StorageCredential,
                    vec![
                        Privilege::CreateExternalLocation,
                        Privilege::CreateExternalTable,
                        Privilege::CreateExternalVolume,
                        Privilege::Manage,
                    ],
                ),
                (
                    SecurableType::ExternalLocation,
                    vec![
                        Privilege::CreateExternalTable,
                        Privilege::CreateExternalVolume,
                        Privilege::Manage,
                    ],
                ),
                (
                    SecurableType::Connection,
                    vec![
                        Privilege::UseConnection,
                        Privilege::CreateForeignCatalog,
                        Privilege::Manage,
                    ],
                ),
                (
                    SecurableType::Space,
                    vec![Privilege::Access, Privilege::Manage],
                ),
                (
                    SecurableType::VectorEndpoint,
                    vec![Privilege::Access, Privilege::Manage],
                ),
                (
                    SecurableType::VectorIndex,
                    vec![Privilege::Access, Privilege::Manage],
                ),
            ],
        )
    }

    /// Builds a tunable policy from an explicit privilege map.
    #[must_use]
    pub fn custom(
        name: impl Into<String>,
        privilege_map: impl IntoIterator<Item = (SecurableType, Vec<Privilege>)>,
    ) -> Self {
        Self {
            name: name.into(),
            privilege_map: privilege_map
                .into_iter()
                .map(|(securable_type, privileges)| {
                    (securable_type, privileges.into_iter().collect())
                })
                .collect(),
        }
    }

    /// Resolves the concrete privilege set for a securable type.
    ///
    /// `ALL_PRIVILEGES` entries are expanded to the applicable set for the
    /// type. Types the policy does not cover resolve to the empty set.
    #[must_use]
    pub fn privileges_for(&self, securable_type: SecurableType) -> BTreeSet<Privilege> {
        let Some(bundle) = self.privilege_map.get(&securable_type) else {
            return BTreeSet::new();
        };
        let mut resolved = BTreeSet::new();
        for privilege in bundle {
            if *privilege == Privilege::AllPrivileges {
                resolved.extend(Privilege::all_privileges_expansion(securable_type));
            } else {
                resolved.insert(*privilege);
            }
        }
        resolved
    }

    /// Returns true when the policy defines privileges for the type.
    #[must_use]
    pub fn has_privileges_for(&self, securable_type: SecurableType) -> bool {
        self.privilege_map
            .get(&securable_type)
            .is_some_and(|set| !set.is_empty())
    }
}

/// A grant that expires at a fixed instant.
///
/// The reconciler revokes the underlying grant once `now >= expires_at`
/// and transitions the linked access request (if any) to expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBoundGrant {
    /// The underlying grant.
    pub grant: Grant,
    /// When the grant was issued.
    pub granted_at: DateTime<Utc>,
    /// When the grant stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Access request this grant was minted from, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<uuid::Uuid>,
}

impl TimeBoundGrant {
    /// Returns true when the grant has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn policy_resolves_per_type() {
        let reader = AccessPolicy::reader();
        assert_eq!(
            reader.privileges_for(SecurableType::Table),
            BTreeSet::from([Privilege::Select])
        );
        assert!(reader.privileges_for(SecurableType::Connection).is_empty());
    }

    #[test]
    fn all_privileges_expands_in_policy_resolution() {
        let admin = AccessPolicy::owner_admin();
        let catalog = admin.privileges_for(SecurableType::Catalog);
        assert!(catalog.contains(&Privilege::UseCatalog));
        assert!(catalog.contains(&Privilege::CreateSchema));
        assert!(catalog.contains(&Privilege::Manage));
        assert!(!catalog.contains(&Privilege::AllPrivileges));
    }

    #[test]
    fn grant_validation_rejects_wrong_type() {
        let grant = Grant::new(Principal::group("etl"), [Privilege::WriteVolume]);
        assert!(grant.validate_for(SecurableType::Volume).is_ok());
        assert!(grant.validate_for(SecurableType::Table).is_err());
    }

    #[test]
    fn time_bound_grant_expiry() {
        let now = Utc::now();
        let grant = TimeBoundGrant {
            grant: Grant::new(Principal::user("bob@example.com"), [Privilege::Select]),
            granted_at: now - Duration::hours(2),
            expires_at: now - Duration::hours(1),
            request_id: None,
        };
        assert!(grant.is_expired(now));
        assert!(!grant.is_expired(now - Duration::hours(2)));
    }
}
