//! Resource manifests: the closed set of kinds this system reconciles, and
//! the typed specs the diff engine walks field-by-field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{DuplicateResourceName, ReconcileError};

/// The closed set of resource kinds this system reconciles.
#[derive(
    Clone, Copy, Debug, Display, EnumString, EnumIter, Serialize, Deserialize, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "PascalCase")]
pub enum ResourceKind {
    Project,
    Cluster,
    DatabaseUser,
    DatabaseRole,
    NetworkAccess,
    SearchIndex,
    VpcEndpoint,
}

/// Labels/annotations are plain `string -> string` maps; a `BTreeMap` keeps
/// them in lexicographic order for free, which the canonical-JSON fingerprint
/// relies on.
pub type LabelMap = BTreeMap<String, String>;

/// Common envelope fields every resource carries, independent of its kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<LabelMap>,
    /// Ordered sequence of resource names this resource explicitly depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A resource manifest of kind `T`: `apiVersion`, `metadata`, a typed `spec`
/// and an opaque, remote-owned `status`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T> {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

fn default_api_version() -> String {
    "reconciler/v1".to_string()
}

impl<T> Resource<T> {
    pub fn new(name: impl Into<String>, spec: T) -> Self {
        Self {
            api_version: default_api_version(),
            metadata: Metadata::named(name),
            spec,
            status: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Desired/current tier and topology of a cluster.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// e.g. `M10`, `M20` - the field the diff engine flags for downtime.
    pub instance_size: String,
    pub mongo_db_version: String,
    pub disk_size_gb: f64,
    #[serde(default)]
    pub replication_specs: Vec<ReplicationSpec>,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSpec {
    pub region_name: String,
    pub node_count: u32,
}

/// A database user is identified by `(authDatabase, username)`, not by name
/// alone - see `ProjectState::validate`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserSpec {
    pub auth_database: String,
    pub username: String,
    /// Write-only: never populated by discovery, stripped before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRoleSpec {
    pub role_name: String,
    #[serde(default)]
    pub privileges: Vec<String>,
    #[serde(default)]
    pub inherited_roles: Vec<String>,
}

/// `NetworkAccess` identity is the literal address string (IP, CIDR or
/// security-group id), carried here as `metadata.name` by convention.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAccessSpec {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub temporary: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexSpec {
    pub database: String,
    pub collection_name: String,
    pub index_definition: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VpcEndpointSpec {
    pub cloud_provider: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub organization_id: String,
    #[serde(default)]
    pub project_name: String,
}

/// A type-erased resource, used wherever the planner/executor/diff engine
/// need to hold "some resource of some kind" without caring which.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum AnyResource {
    Project(Resource<ProjectSpec>),
    Cluster(Resource<ClusterSpec>),
    DatabaseUser(Resource<DatabaseUserSpec>),
    DatabaseRole(Resource<DatabaseRoleSpec>),
    NetworkAccess(Resource<NetworkAccessSpec>),
    SearchIndex(Resource<SearchIndexSpec>),
    VpcEndpoint(Resource<VpcEndpointSpec>),
}

macro_rules! any_resource_dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            AnyResource::Project($inner) => $body,
            AnyResource::Cluster($inner) => $body,
            AnyResource::DatabaseUser($inner) => $body,
            AnyResource::DatabaseRole($inner) => $body,
            AnyResource::NetworkAccess($inner) => $body,
            AnyResource::SearchIndex($inner) => $body,
            AnyResource::VpcEndpoint($inner) => $body,
        }
    };
}

impl AnyResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            AnyResource::Project(_) => ResourceKind::Project,
            AnyResource::Cluster(_) => ResourceKind::Cluster,
            AnyResource::DatabaseUser(_) => ResourceKind::DatabaseUser,
            AnyResource::DatabaseRole(_) => ResourceKind::DatabaseRole,
            AnyResource::NetworkAccess(_) => ResourceKind::NetworkAccess,
            AnyResource::SearchIndex(_) => ResourceKind::SearchIndex,
            AnyResource::VpcEndpoint(_) => ResourceKind::VpcEndpoint,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        any_resource_dispatch!(self, r => &r.metadata)
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Identity used for matching desired against current: `(kind, name)` for
    /// every kind except `DatabaseUser`, which matches on `(authDatabase,
    /// username)` per the invariant in `ProjectState`.
    pub fn identity(&self) -> String {
        match self {
            AnyResource::DatabaseUser(r) => format!("{}/{}", r.spec.auth_database, r.spec.username),
            _ => self.name().to_string(),
        }
    }

    /// Strip fields that must never participate in semantic-equality
    /// comparison: `status`, and kind-specific write-only fields (currently
    /// just `DatabaseUser.password`).
    pub fn normalized_spec_json(&self, ignore_defaults: bool) -> serde_json::Value {
        match self {
            AnyResource::DatabaseUser(r) => {
                let mut spec = r.spec.clone();
                spec.password = None;
                serde_json::to_value(&spec).unwrap_or(serde_json::Value::Null)
            }
            AnyResource::Cluster(r) => {
                let mut value = serde_json::to_value(&r.spec).unwrap_or(serde_json::Value::Null);
                if ignore_defaults {
                    if let serde_json::Value::Object(ref mut map) = value {
                        if r.spec.backup_enabled {
                            map.remove("backupEnabled");
                        }
                    }
                }
                value
            }
            other => any_resource_dispatch!(other, r => serde_json::to_value(&r.spec))
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A full snapshot of a project's remote state, as gathered by discovery or
/// authored by the user as the desired state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Resource<ProjectSpec>>,
    #[serde(default)]
    pub clusters: Vec<Resource<ClusterSpec>>,
    #[serde(default)]
    pub database_users: Vec<Resource<DatabaseUserSpec>>,
    #[serde(default)]
    pub database_roles: Vec<Resource<DatabaseRoleSpec>>,
    #[serde(default)]
    pub network_access: Vec<Resource<NetworkAccessSpec>>,
    #[serde(default)]
    pub search_indexes: Vec<Resource<SearchIndexSpec>>,
    #[serde(default)]
    pub vpc_endpoints: Vec<Resource<VpcEndpointSpec>>,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl ProjectState {
    /// Flatten every resource into `AnyResource`, in a stable kind order, for
    /// generic consumers (the diff engine, the dependency resolver).
    pub fn all_resources(&self) -> Vec<AnyResource> {
        let mut out = Vec::new();
        if let Some(project) = &self.project {
            out.push(AnyResource::Project(project.clone()));
        }
        out.extend(self.clusters.iter().cloned().map(AnyResource::Cluster));
        out.extend(
            self.database_roles
                .iter()
                .cloned()
                .map(AnyResource::DatabaseRole),
        );
        out.extend(
            self.database_users
                .iter()
                .cloned()
                .map(AnyResource::DatabaseUser),
        );
        out.extend(
            self.network_access
                .iter()
                .cloned()
                .map(AnyResource::NetworkAccess),
        );
        out.extend(
            self.search_indexes
                .iter()
                .cloned()
                .map(AnyResource::SearchIndex),
        );
        out.extend(
            self.vpc_endpoints
                .iter()
                .cloned()
                .map(AnyResource::VpcEndpoint),
        );
        out
    }

    /// Checks the uniqueness invariants from §3: resource names unique
    /// within a kind (identity for `DatabaseUser` is the composite key).
    pub fn validate(&self) -> Result<(), ReconcileError> {
        check_unique(self.clusters.iter().map(|r| r.name()), ResourceKind::Cluster)?;
        check_unique(
            self.database_roles.iter().map(|r| r.name()),
            ResourceKind::DatabaseRole,
        )?;
        check_unique(
            self.network_access.iter().map(|r| r.spec.address.as_str()),
            ResourceKind::NetworkAccess,
        )?;
        check_unique(
            self.search_indexes.iter().map(|r| r.name()),
            ResourceKind::SearchIndex,
        )?;
        check_unique(
            self.vpc_endpoints.iter().map(|r| r.name()),
            ResourceKind::VpcEndpoint,
        )?;
        check_unique(
            self.database_users
                .iter()
                .map(|r| (r.spec.auth_database.as_str(), r.spec.username.as_str())),
            ResourceKind::DatabaseUser,
        )?;
        Ok(())
    }
}

fn check_unique<I, K>(keys: I, kind: ResourceKind) -> Result<(), ReconcileError>
where
    I: IntoIterator<Item = K>,
    K: std::fmt::Debug + Eq + std::hash::Hash,
{
    let mut seen = std::collections::HashSet::new();
    for key in keys {
        let repr = format!("{:?}", key);
        if !seen.insert(repr.clone()) {
            return DuplicateResourceName { kind, name: repr }.fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_user_identity_is_composite() {
        let user = AnyResource::DatabaseUser(Resource::new(
            "ignored",
            DatabaseUserSpec {
                auth_database: "admin".into(),
                username: "alice".into(),
                password: Some("hunter2".into()),
                roles: vec!["readWrite".into()],
                scopes: vec![],
            },
        ));
        assert_eq!(user.identity(), "admin/alice");
    }

    #[test]
    fn password_is_stripped_from_normalized_json() {
        let user = AnyResource::DatabaseUser(Resource::new(
            "ignored",
            DatabaseUserSpec {
                auth_database: "admin".into(),
                username: "alice".into(),
                password: Some("hunter2".into()),
                roles: vec![],
                scopes: vec![],
            },
        ));
        let json = user.normalized_spec_json(true);
        assert!(json.get("password").is_none());
    }

    #[test]
    fn duplicate_cluster_names_are_rejected() {
        let mut state = ProjectState::default();
        state.clusters.push(Resource::new("c", ClusterSpec::default()));
        state.clusters.push(Resource::new("c", ClusterSpec::default()));
        assert!(state.validate().is_err());
    }
}
