//! Principals: users, groups, and service principals.
//!
//! Principal names resolve per environment. Groups and service principals
//! get an environment suffix by default (`data_owners` → `data_owners_dev`);
//! users never do. An explicit environment mapping always wins over the
//! suffix rule.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::environment::Environment;

/// Built-in group covering every account-level user.
pub const ACCOUNT_USERS: &str = "account users";

/// Built-in workspace administrators group.
pub const WORKSPACE_ADMINS: &str = "admins";

/// Built-in group covering every workspace user.
pub const WORKSPACE_USERS: &str = "users";

/// The kind of principal a grant or ownership refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    /// A human user, addressed by e-mail or username.
    User,
    /// An account or workspace group.
    Group,
    /// A service principal (application identity).
    ServicePrincipal,
}

impl PrincipalType {
    /// Returns the uppercase wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Group => "GROUP",
            Self::ServicePrincipal => "SERVICE_PRINCIPAL",
        }
    }
}

/// A user, group, or service principal referenced by declared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Base identifier without any environment decoration.
    pub name: String,
    /// The kind of principal.
    pub principal_type: PrincipalType,
    /// Whether the environment suffix is appended on resolution.
    ///
    /// Defaults to true for groups and service principals, false (and
    /// ignored) for users.
    pub add_environment_suffix: bool,
    /// Explicit per-environment resolved names; wins over the suffix rule.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_mapping: BTreeMap<Environment, String>,
}

impl Principal {
    /// Creates a user principal. Users never receive environment suffixes.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal_type: PrincipalType::User,
            add_environment_suffix: false,
            environment_mapping: BTreeMap::new(),
        }
    }

    /// Creates a group principal with suffixing enabled.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal_type: PrincipalType::Group,
            add_environment_suffix: true,
            environment_mapping: BTreeMap::new(),
        }
    }

    /// Creates a service principal with suffixing enabled.
    #[must_use]
    pub fn service_principal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal_type: PrincipalType::ServicePrincipal,
            add_environment_suffix: true,
            environment_mapping: BTreeMap::new(),
        }
    }

    /// The built-in `account users` group. Never suffixed.
    #[must_use]
    pub fn account_users() -> Self {
        Self::group(ACCOUNT_USERS).without_environment_suffix()
    }

    /// The built-in workspace `admins` group. Never suffixed.
    #[must_use]
    pub fn workspace_admins() -> Self {
        Self::group(WORKSPACE_ADMINS).without_environment_suffix()
    }

    /// The built-in workspace `users` group. Never suffixed.
    #[must_use]
    pub fn workspace_users() -> Self {
        Self::group(WORKSPACE_USERS).without_environment_suffix()
    }

    /// Disables the environment suffix (e.g. for pre-existing principals).
    #[must_use]
    pub fn without_environment_suffix(mut self) -> Self {
        self.add_environment_suffix = false;
        self
    }

    /// Pins an explicit resolved name for one environment.
    #[must_use]
    pub fn with_environment_mapping(mut self, env: Environment, name: impl Into<String>) -> Self {
        self.environment_mapping.insert(env, name.into());
        self
    }

    /// Returns true for user principals.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        matches!(self.principal_type, PrincipalType::User)
    }

    /// Resolves the principal name for the given environment.
    ///
    /// The explicit environment mapping wins when it carries the
    /// environment; otherwise the suffix rule applies. Pure function of
    /// the principal's fields and `env`.
    #[must_use]
    pub fn resolved_name(&self, env: Environment) -> String {
        if let Some(mapped) = self.environment_mapping.get(&env) {
            return mapped.clone();
        }
        if self.add_environment_suffix && !self.is_user() {
            return format!("{}_{}", self.name, env.suffix());
        }
        self.name.clone()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.principal_type.as_str())
    }
}
