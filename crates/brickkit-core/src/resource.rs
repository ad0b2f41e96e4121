//! Typed descriptors for every governed securable.
//!
//! A [`Resource`] couples the fields shared by all securables (name,
//! owner, tags, grants, bindings) with a [`ResourceKind`] carrying the
//! type-specific spec. The kinds form a closed set of tagged variants;
//! executors dispatch on [`SecurableType`] rather than through virtual
//! calls.
//!
//! Reference variants (`reference: true`) denote externally-managed
//! securables: the engine governs their tags, grants, and policies but
//! never creates or drops them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::abac::AbacPolicy;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::grant::{AccessPolicy, Grant};
use crate::principal::Principal;
use crate::privilege::Privilege;
use crate::securable::SecurableType;
use crate::tag::Tag;

/// Workspace visibility of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationMode {
    /// Accessible from all bound workspaces.
    Open,
    /// Restricted to explicitly bound workspaces.
    Isolated,
}

/// Access level of a workspace binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindingType {
    /// Read/write binding.
    BindingTypeReadWrite,
    /// Read-only binding.
    BindingTypeReadOnly,
}

/// Association between a container and a workspace that may reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceBinding {
    /// Workspace identifier.
    pub workspace_id: i64,
    /// Binding access level.
    pub binding_type: BindingType,
}

impl WorkspaceBinding {
    /// Creates a read/write binding.
    #[must_use]
    pub const fn read_write(workspace_id: i64) -> Self {
        Self {
            workspace_id,
            binding_type: BindingType::BindingTypeReadWrite,
        }
    }

    /// Creates a read-only binding.
    #[must_use]
    pub const fn read_only(workspace_id: i64) -> Self {
        Self {
            workspace_id,
            binding_type: BindingType::BindingTypeReadOnly,
        }
    }
}

// ============================================================================
// Per-kind specs
// ============================================================================

/// Column definition matching the backend's column info shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name (SQL identifier rules).
    pub name: String,
    /// SQL data type, normalized uppercase (STRING, BIGINT, DECIMAL(10,2)).
    pub type_name: String,
    /// Whether NULL values are allowed.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Column description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnSpec {
    /// Creates a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into().to_ascii_uppercase(),
            nullable: true,
            comment: None,
        }
    }
}

/// Table variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableType {
    /// Managed storage.
    #[default]
    Managed,
    /// External storage location.
    External,
    /// SQL view.
    View,
    /// Materialized view.
    MaterializedView,
    /// Streaming table.
    StreamingTable,
}

/// A direct (non-ABAC) row filter on one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilterSpec {
    /// Predicate function, bare or fully qualified.
    pub function: String,
    /// Columns passed to the predicate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_columns: Vec<String>,
}

/// A column mask bound to one column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMaskSpec {
    /// The masked column.
    pub column: String,
    /// Masking function, bare or fully qualified.
    pub function: String,
    /// Additional columns passed to the masking function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub using_columns: Vec<String>,
}

/// Tabular asset spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table variant.
    #[serde(default)]
    pub table_type: TableType,
    /// Column definitions, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSpec>,
    /// Partition column names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_columns: Vec<String>,
    /// Explicit storage location for external tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    /// Table properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// View definition, for view variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_definition: Option<String>,
    /// Direct row filter; mutually exclusive with a matching container
    /// ABAC row-filter policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<RowFilterSpec>,
    /// Column masks, at most one per column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_masks: Vec<ColumnMaskSpec>,
}

/// Volume variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeType {
    /// Managed storage.
    #[default]
    Managed,
    /// External storage location.
    External,
}

/// File volume spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Managed or external.
    #[serde(default)]
    pub volume_type: VolumeType,
    /// Storage location, required for external volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
}

/// Function implementation language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionLanguage {
    /// SQL body.
    #[default]
    Sql,
    /// Python body.
    Python,
}

/// Scalar or table-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionKind {
    /// Returns a scalar value.
    #[default]
    Scalar,
    /// Returns a row set.
    Table,
}

/// One function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParameter {
    /// Parameter name.
    pub name: String,
    /// SQL type of the parameter.
    pub type_name: String,
}

/// User-defined function spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Scalar or table-valued.
    #[serde(default)]
    pub kind: FunctionKind,
    /// Implementation language.
    #[serde(default)]
    pub language: FunctionLanguage,
    /// Declared parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<FunctionParameter>,
    /// SQL return type (BOOLEAN for row filters).
    pub return_type: String,
    /// Function body.
    pub definition: String,
    /// Marks the function as a row-filter predicate.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_row_filter: bool,
    /// Marks the function as a column-masking function.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_column_mask: bool,
}

/// Registered ML model spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Governance tier (e.g. bronze/silver/gold).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Lifecycle stage (e.g. staging, production).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Lineage metadata recorded as properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lineage: BTreeMap<String, String>,
}

/// Conversational-analytics space spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSpec {
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Serialized space instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Fully qualified names of tables the space exposes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_refs: Vec<String>,
    /// Fully qualified names of functions the space may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_refs: Vec<String>,
    /// Warehouse backing the space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<String>,
}

/// Vector-search endpoint spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorEndpointSpec {
    /// Endpoint type, typically `STANDARD`.
    pub endpoint_type: String,
}

impl Default for VectorEndpointSpec {
    fn default() -> Self {
        Self {
            endpoint_type: "STANDARD".into(),
        }
    }
}

/// Vector-search index spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexSpec {
    /// Endpoint the index is served from (reference, not parent).
    pub endpoint_name: String,
    /// Primary key column of the source table.
    pub primary_key: String,
    /// Source delta table, for delta-sync indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
    /// Column embeddings are computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_source_column: Option<String>,
    /// Embedding dimension for self-managed embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<u32>,
}

/// Cloud credential payload; exactly one variant per credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudCredential {
    /// AWS IAM role.
    AwsIamRole {
        /// Role ARN.
        role_arn: String,
        /// External id for assume-role, when required.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
    },
    /// Azure service principal.
    AzureServicePrincipal {
        /// AAD tenant id.
        directory_id: String,
        /// Application (client) id.
        application_id: String,
    },
    /// Azure managed identity.
    AzureManagedIdentity {
        /// Access connector resource id.
        access_connector_id: String,
        /// User-assigned identity id, when not system-assigned.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        managed_identity_id: Option<String>,
    },
    /// GCP service account key reference.
    GcpServiceAccountKey {
        /// Service account e-mail.
        email: String,
        /// Private key id.
        private_key_id: String,
    },
}

/// Storage credential spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCredentialSpec {
    /// The cloud credential; the enum guarantees exactly one kind.
    pub credential: CloudCredential,
    /// Whether the credential is read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// External location spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLocationSpec {
    /// Storage URL (`s3://`, `abfss://`, `gs://`), no trailing slash.
    pub url: String,
    /// Base name of the storage credential used for access.
    pub credential_name: String,
    /// Whether the location is read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Skip backend path validation during creation.
    #[serde(default)]
    pub skip_validation: bool,
}

impl ExternalLocationSpec {
    /// Validates and normalizes the storage URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unsupported schemes, empty bucket
    /// components, or path-traversal sequences.
    pub fn normalize_url(name: &str, url: &str) -> Result<String> {
        const SCHEMES: [&str; 3] = ["s3://", "abfss://", "gs://"];
        let Some(scheme) = SCHEMES.iter().find(|scheme| url.starts_with(**scheme)) else {
            return Err(Error::validation(
                "storage_url",
                name,
                format!("url must start with one of {SCHEMES:?}"),
            ));
        };
        let rest = &url[scheme.len()..];
        if rest.is_empty() {
            return Err(Error::validation(
                "storage_url",
                name,
                "url must include a bucket or container",
            ));
        }
        if rest.contains("..") || rest.contains("//") {
            return Err(Error::validation(
                "storage_url",
                name,
                "url contains path traversal or empty segments",
            ));
        }
        Ok(url.trim_end_matches('/').to_string())
    }
}

/// Foreign connection types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    /// MySQL.
    Mysql,
    /// PostgreSQL.
    Postgresql,
    /// Snowflake.
    Snowflake,
    /// Redshift.
    Redshift,
    /// SQL Server.
    Sqlserver,
    /// Cross-workspace Databricks connection.
    Databricks,
}

/// Foreign connection spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// The connection type.
    pub connection_type: ConnectionType,
    /// Connection options (host, port, etc.); secrets stay out of band.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Metastore spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetastoreSpec {
    /// Cloud region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Root storage path for managed data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

/// Catalog spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    /// Managed storage root; inherited by schemas that omit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

/// Schema spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Managed storage root; inherited by tables/volumes that omit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

/// Type-specific payload of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "securable_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    /// Hierarchy root.
    Metastore(MetastoreSpec),
    /// Level-1 container.
    Catalog(CatalogSpec),
    /// Level-2 container.
    Schema(SchemaSpec),
    /// Tabular asset.
    Table(TableSpec),
    /// File volume.
    Volume(VolumeSpec),
    /// User-defined function.
    Function(FunctionSpec),
    /// Registered ML model.
    Model(ModelSpec),
    /// Cloud storage credential.
    StorageCredential(StorageCredentialSpec),
    /// External storage location.
    ExternalLocation(ExternalLocationSpec),
    /// Foreign connection.
    Connection(ConnectionSpec),
    /// Conversational-analytics space.
    Space(SpaceSpec),
    /// Vector-search endpoint.
    #[serde(rename = "VECTOR_SEARCH_ENDPOINT")]
    VectorEndpoint(VectorEndpointSpec),
    /// Vector-search index.
    #[serde(rename = "VECTOR_SEARCH_INDEX")]
    VectorIndex(VectorIndexSpec),
}

impl ResourceKind {
    /// Returns the securable type of this kind.
    #[must_use]
    pub const fn securable_type(&self) -> SecurableType {
        match self {
            Self::Metastore(_) => SecurableType::Metastore,
            Self::Catalog(_) => SecurableType::Catalog,
            Self::Schema(_) => SecurableType::Schema,
            Self::Table(_) => SecurableType::Table,
            Self::Volume(_) => SecurableType::Volume,
            Self::Function(_) => SecurableType::Function,
            Self::Model(_) => SecurableType::Model,
            Self::StorageCredential(_) => SecurableType::StorageCredential,
            Self::ExternalLocation(_) => SecurableType::ExternalLocation,
            Self::Connection(_) => SecurableType::Connection,
            Self::Space(_) => SecurableType::Space,
            Self::VectorEndpoint(_) => SecurableType::VectorEndpoint,
            Self::VectorIndex(_) => SecurableType::VectorIndex,
        }
    }

    /// Returns the declared storage location of this kind, if any.
    #[must_use]
    pub fn storage_location(&self) -> Option<&str> {
        match self {
            Self::Metastore(spec) => spec.storage_root.as_deref(),
            Self::Catalog(spec) => spec.storage_root.as_deref(),
            Self::Schema(spec) => spec.storage_root.as_deref(),
            Self::Table(spec) => spec.storage_location.as_deref(),
            Self::Volume(spec) => spec.storage_location.as_deref(),
            Self::ExternalLocation(spec) => Some(&spec.url),
            _ => None,
        }
    }
}

// ============================================================================
// Resource
// ============================================================================

/// A declared securable: common governance fields plus the typed spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Base name without environment decoration.
    pub name: String,
    /// Type-specific spec.
    #[serde(flatten)]
    pub kind: ResourceKind,
    /// Declared owner; inherited from the nearest ancestor when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Principal>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Declared tags; merged over ancestor and convention tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Declared grants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    /// ABAC policies declared on this container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abac_policies: Vec<AbacPolicy>,
    /// Workspace isolation; only meaningful on containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_mode: Option<IsolationMode>,
    /// Workspace bindings; applied before ISOLATED is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspace_bindings: Vec<WorkspaceBinding>,
    /// Whether the resolved name carries the environment suffix.
    #[serde(default = "default_true")]
    pub add_environment_suffix: bool,
    /// Explicit per-environment names; wins over the suffix rule.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_mapping: BTreeMap<Environment, String>,
    /// Externally managed: governed, never created or dropped.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reference: bool,
    /// Base name of the owning catalog, set on attach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
    /// Base name of the owning schema, set on attach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
}

impl Resource {
    /// Creates a resource of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            owner: None,
            comment: None,
            tags: Vec::new(),
            grants: Vec::new(),
            abac_policies: Vec::new(),
            isolation_mode: None,
            workspace_bindings: Vec::new(),
            add_environment_suffix: true,
            environment_mapping: BTreeMap::new(),
            reference: false,
            catalog_name: None,
            schema_name: None,
        }
    }

    /// Creates a metastore.
    #[must_use]
    pub fn metastore(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Metastore(MetastoreSpec::default()))
    }

    /// Creates a catalog.
    #[must_use]
    pub fn catalog(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Catalog(CatalogSpec::default()))
    }

    /// Creates a schema.
    #[must_use]
    pub fn schema(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Schema(SchemaSpec::default()))
    }

    /// Creates a table.
    #[must_use]
    pub fn table(name: impl Into<String>, spec: TableSpec) -> Self {
        Self::new(name, ResourceKind::Table(spec))
    }

    /// Creates a volume.
    #[must_use]
    pub fn volume(name: impl Into<String>, spec: VolumeSpec) -> Self {
        Self::new(name, ResourceKind::Volume(spec))
    }

    /// Creates a function.
    #[must_use]
    pub fn function(name: impl Into<String>, spec: FunctionSpec) -> Self {
        Self::new(name, ResourceKind::Function(spec))
    }

    /// Creates a registered model.
    #[must_use]
    pub fn model(name: impl Into<String>, spec: ModelSpec) -> Self {
        Self::new(name, ResourceKind::Model(spec))
    }

    /// Creates a storage credential.
    #[must_use]
    pub fn storage_credential(name: impl Into<String>, spec: StorageCredentialSpec) -> Self {
        Self::new(name, ResourceKind::StorageCredential(spec))
    }

    /// Creates an external location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the storage URL is malformed.
    pub fn external_location(
        name: impl Into<String>,
        mut spec: ExternalLocationSpec,
    ) -> Result<Self> {
        let name = name.into();
        spec.url = ExternalLocationSpec::normalize_url(&name, &spec.url)?;
        Ok(Self::new(name, ResourceKind::ExternalLocation(spec)))
    }

    /// Creates a foreign connection.
    #[must_use]
    pub fn connection(name: impl Into<String>, spec: ConnectionSpec) -> Self {
        Self::new(name, ResourceKind::Connection(spec))
    }

    /// Creates a conversational-analytics space.
    #[must_use]
    pub fn space(name: impl Into<String>, spec: SpaceSpec) -> Self {
        Self::new(name, ResourceKind::Space(spec))
    }

    /// Creates a vector-search endpoint.
    #[must_use]
    pub fn vector_endpoint(name: impl Into<String>, spec: VectorEndpointSpec) -> Self {
        Self::new(name, ResourceKind::VectorEndpoint(spec))
    }

    /// Creates a vector-search index.
    #[must_use]
    pub fn vector_index(name: impl Into<String>, spec: VectorIndexSpec) -> Self {
        Self::new(name, ResourceKind::VectorIndex(spec))
    }

    /// Turns this declaration into a reference to an externally-managed
    /// securable. References resolve without an environment suffix: their
    /// names are fixed by whoever created them.
    #[must_use]
    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self.add_environment_suffix = false;
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: Principal) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Appends a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Appends a grant.
    #[must_use]
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// Attaches an ABAC policy to this container.
    #[must_use]
    pub fn with_abac_policy(mut self, policy: AbacPolicy) -> Self {
        self.abac_policies.push(policy);
        self
    }

    /// Sets isolation mode; bindings must be declared alongside.
    #[must_use]
    pub fn with_isolation(
        mut self,
        mode: IsolationMode,
        bindings: impl IntoIterator<Item = WorkspaceBinding>,
    ) -> Self {
        self.isolation_mode = Some(mode);
        self.workspace_bindings.extend(bindings);
        self
    }

    /// Disables the environment suffix on the resolved name.
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

    /// Returns the securable type.
    #[must_use]
    pub const fn securable_type(&self) -> SecurableType {
        self.kind.securable_type()
    }

    /// Grants privileges to a principal on this securable.
    ///
    /// Privileges are deduplicated against existing grants: re-granting an
    /// identical `(principal, privilege)` pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a privilege is not in the valid
    /// set for this securable type.
    pub fn grant(
        &mut self,
        principal: Principal,
        privileges: impl IntoIterator<Item = Privilege>,
    ) -> Result<()> {
        let securable_type = self.securable_type();
        let privileges: std::collections::BTreeSet<Privilege> =
            privileges.into_iter().collect();
        for privilege in &privileges {
            if !privilege.is_valid_for(securable_type) {
                return Err(Error::validation(
                    "privilege_valid_for_type",
                    &self.name,
                    format!("privilege {privilege} is not valid on {securable_type}"),
                ));
            }
        }
        if let Some(existing) = self
            .grants
            .iter_mut()
            .find(|grant| grant.principal == principal)
        {
            existing.privileges.extend(privileges);
        } else {
            self.grants.push(Grant {
                principal,
                privileges,
            });
        }
        Ok(())
    }

    /// Grants an access policy to a principal: the policy's bundle for
    /// this securable type is expanded to concrete privileges.
    ///
    /// A policy with no privileges for this type is a no-op; granting it
    /// at a container level and letting propagation extract the relevant
    /// bundle per descendant is the normal pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the expanded bundle carries a
    /// privilege that is invalid here (a misconfigured custom policy).
    pub fn grant_policy(&mut self, principal: Principal, policy: &AccessPolicy) -> Result<()> {
        let privileges = policy.privileges_for(self.securable_type());
        if privileges.is_empty() {
            return Ok(());
        }
        self.grant(principal, privileges)
    }

    /// Revokes privileges from a principal.
    ///
    /// With `privileges = None` every privilege for the principal is
    /// removed. Revoking something that was never granted is a no-op.
    pub fn revoke(&mut self, principal: &Principal, privileges: Option<&[Privilege]>) {
        match privileges {
            None => self.grants.retain(|grant| grant.principal != *principal),
            Some(privileges) => {
                for grant in &mut self.grants {
                    if grant.principal == *principal {
                        for privilege in privileges {
                            grant.privileges.remove(privilege);
                        }
                    }
                }
                self.grants.retain(|grant| !grant.privileges.is_empty());
            }
        }
    }

    /// Resolves the name for an environment.
    ///
    /// Pure function of the resource's naming fields and `env`: an
    /// explicit mapping wins, then the suffix rule, then the base name.
    #[must_use]
    pub fn resolved_name(&self, env: Environment) -> String {
        if let Some(mapped) = self.environment_mapping.get(&env) {
            return mapped.clone();
        }
        if self.add_environment_suffix {
            return format!("{}_{}", self.name, env.suffix());
        }
        self.name.clone()
    }

    /// Validates fields that do not need tree context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty names, ABAC structural
    /// violations, duplicate column masks, or an external volume without a
    /// storage location.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation(
                "resource_name",
                "<unnamed>",
                "resource name must not be empty",
            ));
        }
        for policy in &self.abac_policies {
            policy.validate()?;
        }
        if !self.abac_policies.is_empty() && !self.securable_type().is_container() {
            return Err(Error::validation(
                "abac_on_container",
                &self.name,
                "ABAC policies may only be declared on containers",
            ));
        }
        match &self.kind {
            ResourceKind::Table(spec) => {
                let mut masked = std::collections::BTreeSet::new();
                for mask in &spec.column_masks {
                    if !masked.insert(mask.column.as_str()) {
                        return Err(Error::validation(
                            "column_mask_unique",
                            &self.name,
                            format!("column {} has more than one mask", mask.column),
                        ));
                    }
                }
            }
            ResourceKind::Volume(spec) => {
                if spec.volume_type == VolumeType::External && spec.storage_location.is_none() {
                    return Err(Error::validation(
                        "external_volume_location",
                        &self.name,
                        "external volumes must declare a storage location",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Builds the minimal creation record for the backend.
    ///
    /// Row filters and column masks are deliberately absent: the backend
    /// rejects them at create time and they are applied through the policy
    /// phase instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when called on a reference.
    pub fn to_create_params(
        &self,
        env: Environment,
        full_name: &str,
        effective_owner: Option<&Principal>,
    ) -> Result<CreateParams> {
        if self.reference {
            return Err(Error::validation(
                "reference_create",
                &self.name,
                "references are never created; govern the existing securable instead",
            ));
        }
        let mut kind = self.kind.clone();
        if let ResourceKind::Table(spec) = &mut kind {
            spec.row_filter = None;
            spec.column_masks.clear();
        }
        Ok(CreateParams {
            name: self.resolved_name(env),
            full_name: full_name.to_string(),
            owner: effective_owner.map(|p| p.resolved_name(env)),
            comment: self.comment.clone(),
            kind,
        })
    }

    /// Builds the minimal update record covering only `changed_paths`.
    ///
    /// Field paths follow the diff vocabulary: `owner`, `comment`,
    /// `isolation_mode`, or a kind field name such as `storage_location`.
    #[must_use]
    pub fn to_update_params(
        &self,
        env: Environment,
        full_name: &str,
        effective_owner: Option<&Principal>,
        changed_paths: &[String],
    ) -> UpdateParams {
        let kind_value = serde_json::to_value(&self.kind).unwrap_or_default();
        let mut fields = BTreeMap::new();
        for path in changed_paths {
            let value = match path.as_str() {
                "owner" => effective_owner
                    .map(|p| serde_json::Value::String(p.resolved_name(env)))
                    .unwrap_or(serde_json::Value::Null),
                "comment" => self
                    .comment
                    .clone()
                    .map_or(serde_json::Value::Null, serde_json::Value::String),
                "isolation_mode" => serde_json::to_value(self.isolation_mode).unwrap_or_default(),
                other => kind_value
                    .get(other)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            };
            fields.insert(path.clone(), value);
        }
        UpdateParams {
            securable_type: self.securable_type(),
            full_name: full_name.to_string(),
            fields,
        }
    }
}

/// Minimal record needed by the backend to create a securable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateParams {
    /// Environment-resolved leaf name.
    pub name: String,
    /// Fully qualified name.
    pub full_name: String,
    /// Resolved owner name, when one is effective.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Type-specific payload, sanitized for creation; carries the
    /// securable-type tag.
    #[serde(flatten)]
    pub kind: ResourceKind,
}

impl CreateParams {
    /// Returns the securable type of the payload.
    #[must_use]
    pub const fn securable_type(&self) -> SecurableType {
        self.kind.securable_type()
    }
}

/// Minimal record describing only the fields present in a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateParams {
    /// Securable type.
    pub securable_type: SecurableType,
    /// Fully qualified name.
    pub full_name: String,
    /// Changed field values by path.
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_name_applies_suffix_and_mapping() {
        let catalog = Resource::catalog("analytics");
        assert_eq!(catalog.resolved_name(Environment::Dev), "analytics_dev");

        let pinned = Resource::catalog("analytics")
            .with_environment_mapping(Environment::Prd, "analytics_live");
        assert_eq!(pinned.resolved_name(Environment::Prd), "analytics_live");
        assert_eq!(pinned.resolved_name(Environment::Dev), "analytics_dev");
    }

    #[test]
    fn references_resolve_without_suffix() {
        let reference = Resource::catalog("shared_reference_data").as_reference();
        assert_eq!(
            reference.resolved_name(Environment::Prd),
            "shared_reference_data"
        );
    }

    #[test]
    fn references_refuse_create_params() {
        let reference = Resource::schema("landing").as_reference();
        let err = reference
            .to_create_params(Environment::Dev, "cat.landing", None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn table_create_params_strip_row_filter_and_masks() {
        let spec = TableSpec {
            columns: vec![ColumnSpec::new("id", "bigint")],
            row_filter: Some(RowFilterSpec {
                function: "pii_row_filter".into(),
                input_columns: vec!["region".into()],
            }),
            column_masks: vec![ColumnMaskSpec {
                column: "ssn".into(),
                function: "mask_ssn".into(),
                using_columns: vec![],
            }],
            ..TableSpec::default()
        };
        let table = Resource::table("orders", spec);
        let params = table
            .to_create_params(Environment::Dev, "cat.sch.orders_dev", None)
            .unwrap();
        let ResourceKind::Table(created) = params.kind else {
            panic!("expected table kind");
        };
        assert!(created.row_filter.is_none());
        assert!(created.column_masks.is_empty());
        assert_eq!(created.columns.len(), 1);
    }

    #[test]
    fn external_location_url_is_validated_and_normalized() {
        let spec = ExternalLocationSpec {
            url: "s3://quant-data/landing/".into(),
            credential_name: "quant_cred".into(),
            read_only: false,
            skip_validation: false,
        };
        let location = Resource::external_location("quant_landing", spec).unwrap();
        let ResourceKind::ExternalLocation(spec) = &location.kind else {
            panic!("expected external location kind");
        };
        assert_eq!(spec.url, "s3://quant-data/landing");

        let bad = ExternalLocationSpec {
            url: "https://example.com/bucket".into(),
            credential_name: "c".into(),
            read_only: false,
            skip_validation: false,
        };
        assert!(Resource::external_location("bad", bad).is_err());
    }

    #[test]
    fn duplicate_column_masks_rejected() {
        let spec = TableSpec {
            column_masks: vec![
                ColumnMaskSpec {
                    column: "ssn".into(),
                    function: "mask_a".into(),
                    using_columns: vec![],
                },
                ColumnMaskSpec {
                    column: "ssn".into(),
                    function: "mask_b".into(),
                    using_columns: vec![],
                },
            ],
            ..TableSpec::default()
        };
        assert!(Resource::table("t", spec).validate().is_err());
    }

    #[test]
    fn grant_dedupes_and_validates() {
        let mut table = Resource::table("orders", TableSpec::default());
        table
            .grant(
                crate::principal::Principal::group("analysts"),
                [Privilege::Select],
            )
            .unwrap();
        table
            .grant(
                crate::principal::Principal::group("analysts"),
                [Privilege::Select, Privilege::Modify],
            )
            .unwrap();
        assert_eq!(table.grants.len(), 1);
        assert_eq!(table.grants[0].privileges.len(), 2);

        let err = table
            .grant(
                crate::principal::Principal::group("etl"),
                [Privilege::WriteVolume],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn policy_grant_expands_per_type() {
        let mut volume = Resource::volume("raw", VolumeSpec::default());
        volume
            .grant_policy(
                crate::principal::Principal::group("analysts"),
                &crate::grant::AccessPolicy::reader(),
            )
            .unwrap();
        assert_eq!(
            volume.grants[0].privileges,
            std::collections::BTreeSet::from([Privilege::ReadVolume])
        );

        // A policy with no bundle for the type is a no-op.
        let mut connection = Resource::connection(
            "warehouse_link",
            ConnectionSpec {
                connection_type: ConnectionType::Snowflake,
                options: BTreeMap::new(),
            },
        );
        connection
            .grant_policy(
                crate::principal::Principal::group("analysts"),
                &crate::grant::AccessPolicy::reader(),
            )
            .unwrap();
        assert!(connection.grants.is_empty());
    }

    #[test]
    fn revoke_removes_privileges_or_principals() {
        let mut table = Resource::table("orders", TableSpec::default());
        let analysts = crate::principal::Principal::group("analysts");
        table
            .grant(analysts.clone(), [Privilege::Select, Privilege::Modify])
            .unwrap();

        table.revoke(&analysts, Some(&[Privilege::Modify]));
        assert_eq!(
            table.grants[0].privileges,
            std::collections::BTreeSet::from([Privilege::Select])
        );

        table.revoke(&analysts, None);
        assert!(table.grants.is_empty());
    }

    #[test]
    fn update_params_cover_only_changed_paths() {
        let volume = Resource::volume(
            "raw_files",
            VolumeSpec {
                volume_type: VolumeType::External,
                storage_location: Some("s3://bucket/raw".into()),
            },
        )
        .with_comment("landing files");
        let params = volume.to_update_params(
            Environment::Dev,
            "cat.sch.raw_files_dev",
            None,
            &["comment".to_string(), "storage_location".to_string()],
        );
        assert_eq!(params.fields.len(), 2);
        assert_eq!(
            params.fields.get("comment"),
            Some(&serde_json::Value::String("landing files".into()))
        );
        assert_eq!(
            params.fields.get("storage_location"),
            Some(&serde_json::Value::String("s3://bucket/raw".into()))
        );
    }
}
