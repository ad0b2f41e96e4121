//! Securable type taxonomy.
//!
//! Identifies the type of a governed catalog object for privilege
//! validation, parent/child checks, and naming.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The type of a Unity-style catalog securable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurableType {
    /// Root of the hierarchy.
    Metastore,
    /// Level-1 container of schemas.
    Catalog,
    /// Level-2 container of data assets.
    Schema,
    /// Tabular data asset.
    Table,
    /// File volume.
    Volume,
    /// User-defined function (including row filters and column masks).
    Function,
    /// Registered ML model.
    Model,
    /// Cloud storage credential (top-level infrastructure).
    StorageCredential,
    /// External storage location (top-level infrastructure).
    ExternalLocation,
    /// Foreign data connection (top-level infrastructure).
    Connection,
    /// Conversational-analytics space.
    Space,
    /// Vector-search endpoint.
    #[serde(rename = "VECTOR_SEARCH_ENDPOINT")]
    VectorEndpoint,
    /// Vector-search index.
    #[serde(rename = "VECTOR_SEARCH_INDEX")]
    VectorIndex,
}

impl SecurableType {
    /// Every securable type, in reconciliation tier order.
    pub const ALL: [Self; 13] = [
        Self::StorageCredential,
        Self::ExternalLocation,
        Self::Connection,
        Self::Metastore,
        Self::Catalog,
        Self::Schema,
        Self::Function,
        Self::Table,
        Self::Volume,
        Self::Model,
        Self::Space,
        Self::VectorEndpoint,
        Self::VectorIndex,
    ];

    /// Returns the uppercase wire form used by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metastore => "METASTORE",
            Self::Catalog => "CATALOG",
            Self::Schema => "SCHEMA",
            Self::Table => "TABLE",
            Self::Volume => "VOLUME",
            Self::Function => "FUNCTION",
            Self::Model => "MODEL",
            Self::StorageCredential => "STORAGE_CREDENTIAL",
            Self::ExternalLocation => "EXTERNAL_LOCATION",
            Self::Connection => "CONNECTION",
            Self::Space => "SPACE",
            Self::VectorEndpoint => "VECTOR_SEARCH_ENDPOINT",
            Self::VectorIndex => "VECTOR_SEARCH_INDEX",
        }
    }

    /// Returns the short acronym used by naming patterns.
    #[must_use]
    pub const fn acronym(self) -> &'static str {
        match self {
            Self::Metastore => "ms",
            Self::Catalog => "cat",
            Self::Schema => "sch",
            Self::Table => "tbl",
            Self::Volume => "vol",
            Self::Function => "fn",
            Self::Model => "mdl",
            Self::StorageCredential => "cred",
            Self::ExternalLocation => "loc",
            Self::Connection => "conn",
            Self::Space => "spc",
            Self::VectorEndpoint => "vse",
            Self::VectorIndex => "vsi",
        }
    }

    /// Returns the securable types a child of this type may have as parent.
    ///
    /// Top-level infrastructure and metastores have no parent. A vector
    /// index lives under a schema like other data assets; its endpoint
    /// linkage is a reference, not a parent.
    #[must_use]
    pub const fn valid_parents(self) -> &'static [Self] {
        match self {
            Self::Metastore
            | Self::StorageCredential
            | Self::ExternalLocation
            | Self::Connection => &[],
            Self::Catalog => &[Self::Metastore],
            Self::Schema => &[Self::Catalog],
            Self::Table
            | Self::Volume
            | Self::Function
            | Self::Model
            | Self::Space
            | Self::VectorEndpoint
            | Self::VectorIndex => &[Self::Schema],
        }
    }

    /// Returns true when this type may carry children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Metastore | Self::Catalog | Self::Schema)
    }

    /// Returns true for top-level infrastructure securables.
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(
            self,
            Self::StorageCredential | Self::ExternalLocation | Self::Connection
        )
    }

    /// Returns true for tier-1 securables where an owner change is
    /// security-impactful drift.
    #[must_use]
    pub const fn is_tier1(self) -> bool {
        matches!(
            self,
            Self::Metastore
                | Self::Catalog
                | Self::StorageCredential
                | Self::ExternalLocation
                | Self::Connection
        )
    }
}

impl fmt::Display for SecurableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_rules_follow_the_hierarchy() {
        assert!(SecurableType::Catalog.valid_parents().contains(&SecurableType::Metastore));
        assert!(SecurableType::Table.valid_parents().contains(&SecurableType::Schema));
        assert!(SecurableType::StorageCredential.valid_parents().is_empty());
    }

    #[test]
    fn tier1_covers_infrastructure_and_catalogs() {
        assert!(SecurableType::Catalog.is_tier1());
        assert!(SecurableType::StorageCredential.is_tier1());
        assert!(!SecurableType::Table.is_tier1());
    }
}
