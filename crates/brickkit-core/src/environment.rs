//! Deployment environment handling.
//!
//! The engine runs against exactly one environment per process: DEV, ACC,
//! or PRD. The environment is read once from `BRICKKIT_ENV` (falling back
//! to `DATABRICKS_ENV`) and is constant for the life of a run. Name
//! resolution takes the environment as an explicit argument to stay pure;
//! [`current_environment`] is the convenience accessor for declaration
//! code.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Primary environment variable consulted at startup.
pub const ENV_VAR: &str = "BRICKKIT_ENV";

/// Fallback environment variable for Databricks-hosted runs.
pub const ENV_VAR_FALLBACK: &str = "DATABRICKS_ENV";

/// Deployment environment.
///
/// Enum values serialize uppercase; name suffixes use the lowercase form
/// (`analytics` in DEV resolves to `analytics_dev`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    /// Development.
    #[default]
    Dev,
    /// Acceptance.
    Acc,
    /// Production.
    Prd,
}

impl Environment {
    /// Returns the uppercase wire form (`DEV`, `ACC`, `PRD`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "DEV",
            Self::Acc => "ACC",
            Self::Prd => "PRD",
        }
    }

    /// Returns the lowercase name suffix (`dev`, `acc`, `prd`).
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Acc => "acc",
            Self::Prd => "prd",
        }
    }

    /// Returns true for the production environment.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Prd)
    }

    /// Reads the environment from process environment variables.
    ///
    /// `BRICKKIT_ENV` wins over `DATABRICKS_ENV`; an unset or empty value
    /// defaults to [`Environment::Dev`]. An unparseable value also falls
    /// back to DEV rather than failing startup, with a warning.
    #[must_use]
    pub fn from_process_env() -> Self {
        let raw = std::env::var(ENV_VAR)
            .or_else(|_| std::env::var(ENV_VAR_FALLBACK))
            .unwrap_or_default();
        if raw.is_empty() {
            return Self::Dev;
        }
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "unrecognized environment value, defaulting to DEV");
            Self::Dev
        })
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "acc" => Ok(Self::Acc),
            "prd" => Ok(Self::Prd),
            other => Err(Error::validation(
                "environment",
                "process",
                format!("expected one of dev, acc, prd; got '{other}'"),
            )),
        }
    }
}

static CURRENT: RwLock<Option<Environment>> = RwLock::new(None);

/// Returns the process-wide current environment.
///
/// Initialized lazily from [`Environment::from_process_env`] on first
/// access and constant afterwards, unless overridden via
/// [`set_environment`].
pub fn current_environment() -> Environment {
    if let Some(env) = *read_current() {
        return env;
    }
    let env = Environment::from_process_env();
    *write_current() = Some(env);
    env
}

/// Overrides the process-wide environment.
///
/// Intended for tests and for callers that resolve the environment through
/// their own configuration; production runs normally rely on the
/// environment variable.
pub fn set_environment(env: Environment) {
    *write_current() = Some(env);
}

fn read_current() -> std::sync::RwLockReadGuard<'static, Option<Environment>> {
    match CURRENT.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_current() -> std::sync::RwLockWriteGuard<'static, Option<Environment>> {
    match CURRENT.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("ACC".parse::<Environment>().unwrap(), Environment::Acc);
        assert_eq!("Prd".parse::<Environment>().unwrap(), Environment::Prd);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn suffix_is_lowercase() {
        assert_eq!(Environment::Prd.as_str(), "PRD");
        assert_eq!(Environment::Prd.suffix(), "prd");
    }

    #[test]
    fn override_wins() {
        set_environment(Environment::Acc);
        assert_eq!(current_environment(), Environment::Acc);
        set_environment(Environment::Dev);
        assert_eq!(current_environment(), Environment::Dev);
    }
}
