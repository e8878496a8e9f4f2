//! The remote control-plane client contract (§6): one `Operations` trait per
//! resource kind, each implementable by a real HTTP/gRPC client or (for
//! tests) the in-memory mock in [`crate::mock`].
//!
//! Every method returns `Result<_, RemoteError>` rather than `ReconcileError`
//! directly: classification into the richer taxonomy is the caller's job
//! (`ReconcileError::from_remote`), not the client's.

use async_trait::async_trait;
use reconciler_common::{
    ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, NetworkAccessSpec, ProjectSpec, RemoteError,
    Resource, SearchIndexSpec, VpcEndpointSpec,
};

#[async_trait]
pub trait ProjectOperations: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Resource<ProjectSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<ProjectSpec>,
    ) -> Result<Resource<ProjectSpec>, RemoteError>;
}

#[async_trait]
pub trait ClusterOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<ClusterSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<ClusterSpec>,
    ) -> Result<Resource<ClusterSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<ClusterSpec>,
    ) -> Result<Resource<ClusterSpec>, RemoteError>;
    async fn delete(&self, project_id: &str, name: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait DatabaseUserOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<DatabaseUserSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseUserSpec>,
    ) -> Result<Resource<DatabaseUserSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseUserSpec>,
    ) -> Result<Resource<DatabaseUserSpec>, RemoteError>;
    /// `identity` is the composite `authDatabase/username` key, per
    /// `AnyResource::identity`.
    async fn delete(&self, project_id: &str, identity: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait DatabaseRoleOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<DatabaseRoleSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseRoleSpec>,
    ) -> Result<Resource<DatabaseRoleSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseRoleSpec>,
    ) -> Result<Resource<DatabaseRoleSpec>, RemoteError>;
    async fn delete(&self, project_id: &str, name: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait NetworkAccessOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<NetworkAccessSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<NetworkAccessSpec>,
    ) -> Result<Resource<NetworkAccessSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<NetworkAccessSpec>,
    ) -> Result<Resource<NetworkAccessSpec>, RemoteError>;
    async fn delete(&self, project_id: &str, address: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait SearchIndexOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<SearchIndexSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<SearchIndexSpec>,
    ) -> Result<Resource<SearchIndexSpec>, RemoteError>;
    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<SearchIndexSpec>,
    ) -> Result<Resource<SearchIndexSpec>, RemoteError>;
    async fn delete(&self, project_id: &str, name: &str) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait VpcEndpointOperations: Send + Sync {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<VpcEndpointSpec>>, RemoteError>;
    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<VpcEndpointSpec>,
    ) -> Result<Resource<VpcEndpointSpec>, RemoteError>;
    async fn delete(&self, project_id: &str, name: &str) -> Result<(), RemoteError>;
}

/// The full remote control-plane surface the reconciler needs, as one
/// object-safe trait. A concrete client (HTTP, gRPC, or the in-memory mock)
/// implements every supertrait and is then passed around as
/// `Arc<dyn ControlPlaneClient>`.
pub trait ControlPlaneClient:
    ProjectOperations
    + ClusterOperations
    + DatabaseUserOperations
    + DatabaseRoleOperations
    + NetworkAccessOperations
    + SearchIndexOperations
    + VpcEndpointOperations
    + Send
    + Sync
{
}

impl<T> ControlPlaneClient for T where
    T: ProjectOperations
        + ClusterOperations
        + DatabaseUserOperations
        + DatabaseRoleOperations
        + NetworkAccessOperations
        + SearchIndexOperations
        + VpcEndpointOperations
        + Send
        + Sync
{
}
