//! Error types and result aliases for Brickkit.
//!
//! This module defines the shared error taxonomy used across all Brickkit
//! components. Errors are structured for programmatic handling: the
//! reconciler inspects [`Error::is_transient`] to decide whether an
//! operation enters the retry path, and [`Error::is_fatal`] to decide
//! whether a run must abort.

use std::fmt;

/// The result type used throughout Brickkit.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Brickkit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Declared state violates the convention or model invariants.
    ///
    /// Raised before any backend call. Never retried.
    #[error("validation failed ({rule}) on {resource}: {detail}")]
    Validation {
        /// The rule or invariant that was violated.
        rule: String,
        /// The resource the violation was detected on.
        resource: String,
        /// Description of the violation.
        detail: String,
    },

    /// The backend reports the resource absent.
    ///
    /// Not an error at the reader level (reads return `None`); an error
    /// only when an update or delete assumed presence.
    #[error("not found: {securable_type} {name}")]
    NotFound {
        /// The type of securable that was not found.
        securable_type: &'static str,
        /// The fully qualified name that was looked up.
        name: String,
    },

    /// The backend rejected the caller's credentials.
    ///
    /// Per-resource terminal; reported, not retried.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The backend reported a version conflict or a quota violation.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A transient backend failure (network, rate-limit, 5xx).
    ///
    /// Retried with exponential backoff.
    #[error("transient backend error: {message}")]
    TransientBackend {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A backend call exceeded its per-call timeout.
    ///
    /// Classified as transient and retried.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Elapsed time before the deadline fired, in milliseconds.
        elapsed_ms: u64,
    },

    /// The SQL backend returned a structured error.
    ///
    /// Classified by `sqlstate` into permission, validation, or transient.
    #[error("sql error [{sqlstate}]: {message}")]
    Sql {
        /// Five-character SQLSTATE code, or empty when unavailable.
        sqlstate: String,
        /// The backend's error message.
        message: String,
    },

    /// An internal bug (e.g. attach produced an inconsistent FQN).
    ///
    /// Always fatal to the run.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(
        rule: impl Into<String>,
        resource: impl fmt::Display,
        detail: impl Into<String>,
    ) -> Self {
        Self::Validation {
            rule: rule.into(),
            resource: resource.to_string(),
            detail: detail.into(),
        }
    }

    /// Creates a not-found error for a securable.
    #[must_use]
    pub fn not_found(securable_type: &'static str, name: impl fmt::Display) -> Self {
        Self::NotFound {
            securable_type,
            name: name.to_string(),
        }
    }

    /// Creates a permission-denied error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a transient backend error with the given message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientBackend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient backend error with a source cause.
    #[must_use]
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransientBackend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Creates a SQL backend error.
    #[must_use]
    pub fn sql(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sql {
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    /// Creates an invariant-violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true if the error should enter the retry path.
    ///
    /// Transient backend failures and timeouts are retriable. SQL errors
    /// are retriable when their SQLSTATE class indicates a connection
    /// failure (`08xxx`), an operator intervention (`57xxx`), or an
    /// insufficient-resources condition (`53xxx`).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientBackend { .. } | Self::Timeout { .. } => true,
            Self::Sql { sqlstate, .. } => {
                matches!(sqlstate.get(..2), Some("08" | "53" | "57"))
            }
            _ => false,
        }
    }

    /// Returns true if the error must abort the whole run.
    ///
    /// Only invariant violations are fatal; everything else is captured
    /// into the per-resource result.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::transient("rate limited").is_transient());
        assert!(Error::timeout("grants.update", 60_000).is_transient());
        assert!(Error::sql("08006", "connection failure").is_transient());
        assert!(Error::sql("57014", "query cancelled").is_transient());
        assert!(!Error::sql("42501", "insufficient privilege").is_transient());
        assert!(!Error::permission_denied("nope").is_transient());
        assert!(!Error::validation("require_tags", "cat", "missing").is_transient());
    }

    #[test]
    fn only_invariant_violations_are_fatal() {
        assert!(Error::invariant("inconsistent fqn").is_fatal());
        assert!(!Error::conflict("policy quota exceeded").is_fatal());
        assert!(!Error::transient("503").is_fatal());
    }
}
