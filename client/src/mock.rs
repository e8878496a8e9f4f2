//! An in-memory `ControlPlaneClient` used by the reconciler's own tests and
//! by downstream consumers' integration tests. Holds one [`ProjectState`]
//! per project id and a queue of canned errors a test can push to exercise
//! the retry manager and circuit breaker without a real backend.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use reconciler_common::{
    ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, NetworkAccessSpec, ProjectSpec,
    ProjectState, RemoteError, Resource, SearchIndexSpec, VpcEndpointSpec,
};
use tokio::sync::Mutex;

use crate::traits::{
    ClusterOperations, DatabaseRoleOperations, DatabaseUserOperations, NetworkAccessOperations,
    ProjectOperations, SearchIndexOperations, VpcEndpointOperations,
};

#[derive(Default)]
pub struct MockClient {
    projects: Mutex<HashMap<String, ProjectState>>,
    queued_errors: Mutex<VecDeque<RemoteError>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the mock's state for `project_id`, as if discovery had just run.
    pub async fn seed(&self, project_id: impl Into<String>, state: ProjectState) {
        self.projects.lock().await.insert(project_id.into(), state);
    }

    /// Queues `error` to be returned by the next call any operation makes,
    /// instead of performing the operation.
    pub async fn fail_next(&self, error: RemoteError) {
        self.queued_errors.lock().await.push_back(error);
    }

    async fn maybe_fail(&self) -> Result<(), RemoteError> {
        if let Some(error) = self.queued_errors.lock().await.pop_front() {
            return Err(error);
        }
        Ok(())
    }

    pub async fn state_of(&self, project_id: &str) -> ProjectState {
        self.projects
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}

macro_rules! mock_crud {
    ($trait_name:ident, $field:ident, $spec:ty, $kind_name:literal, key = $key:expr) => {
        #[async_trait]
        impl $trait_name for MockClient {
            async fn list(&self, project_id: &str) -> Result<Vec<Resource<$spec>>, RemoteError> {
                self.maybe_fail().await?;
                Ok(self.state_of(project_id).await.$field)
            }

            async fn create(
                &self,
                project_id: &str,
                resource: &Resource<$spec>,
            ) -> Result<Resource<$spec>, RemoteError> {
                self.maybe_fail().await?;
                let mut projects = self.projects.lock().await;
                let state = projects.entry(project_id.to_string()).or_default();
                let key_fn: fn(&Resource<$spec>) -> String = $key;
                if state.$field.iter().any(|r| key_fn(r) == key_fn(resource)) {
                    return Err(RemoteError::conflict(format!(
                        "{} '{}' already exists",
                        $kind_name,
                        key_fn(resource)
                    )));
                }
                state.$field.push(resource.clone());
                Ok(resource.clone())
            }

            async fn update(
                &self,
                project_id: &str,
                resource: &Resource<$spec>,
            ) -> Result<Resource<$spec>, RemoteError> {
                self.maybe_fail().await?;
                let mut projects = self.projects.lock().await;
                let state = projects.entry(project_id.to_string()).or_default();
                let key_fn: fn(&Resource<$spec>) -> String = $key;
                match state.$field.iter_mut().find(|r| key_fn(r) == key_fn(resource)) {
                    Some(existing) => {
                        *existing = resource.clone();
                        Ok(existing.clone())
                    }
                    None => Err(RemoteError::not_found(format!(
                        "{} '{}' not found",
                        $kind_name,
                        key_fn(resource)
                    ))),
                }
            }

            async fn delete(&self, project_id: &str, key: &str) -> Result<(), RemoteError> {
                self.maybe_fail().await?;
                let mut projects = self.projects.lock().await;
                let state = projects.entry(project_id.to_string()).or_default();
                let key_fn: fn(&Resource<$spec>) -> String = $key;
                let before = state.$field.len();
                state.$field.retain(|r| key_fn(r) != key);
                if state.$field.len() == before {
                    return Err(RemoteError::not_found(format!(
                        "{} '{}' not found",
                        $kind_name, key
                    )));
                }
                Ok(())
            }
        }
    };
}

mock_crud!(
    ClusterOperations,
    clusters,
    ClusterSpec,
    "cluster",
    key = |r| r.name().to_string()
);
mock_crud!(
    DatabaseRoleOperations,
    database_roles,
    DatabaseRoleSpec,
    "database role",
    key = |r| r.name().to_string()
);
mock_crud!(
    NetworkAccessOperations,
    network_access,
    NetworkAccessSpec,
    "network access entry",
    key = |r| r.spec.address.clone()
);
mock_crud!(
    SearchIndexOperations,
    search_indexes,
    SearchIndexSpec,
    "search index",
    key = |r| r.name().to_string()
);

#[async_trait]
impl VpcEndpointOperations for MockClient {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<VpcEndpointSpec>>, RemoteError> {
        self.maybe_fail().await?;
        Ok(self.state_of(project_id).await.vpc_endpoints)
    }

    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<VpcEndpointSpec>,
    ) -> Result<Resource<VpcEndpointSpec>, RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        if state.vpc_endpoints.iter().any(|r| r.name() == resource.name()) {
            return Err(RemoteError::conflict(format!(
                "vpc endpoint '{}' already exists",
                resource.name()
            )));
        }
        state.vpc_endpoints.push(resource.clone());
        Ok(resource.clone())
    }

    async fn delete(&self, project_id: &str, name: &str) -> Result<(), RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        let before = state.vpc_endpoints.len();
        state.vpc_endpoints.retain(|r| r.name() != name);
        if state.vpc_endpoints.len() == before {
            return Err(RemoteError::not_found(format!(
                "vpc endpoint '{}' not found",
                name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseUserOperations for MockClient {
    async fn list(&self, project_id: &str) -> Result<Vec<Resource<DatabaseUserSpec>>, RemoteError> {
        self.maybe_fail().await?;
        Ok(self.state_of(project_id).await.database_users)
    }

    async fn create(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseUserSpec>,
    ) -> Result<Resource<DatabaseUserSpec>, RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        let identity = user_identity(resource);
        if state
            .database_users
            .iter()
            .any(|r| user_identity(r) == identity)
        {
            return Err(RemoteError::conflict(format!(
                "database user '{}' already exists",
                identity
            )));
        }
        state.database_users.push(resource.clone());
        Ok(resource.clone())
    }

    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<DatabaseUserSpec>,
    ) -> Result<Resource<DatabaseUserSpec>, RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        let identity = user_identity(resource);
        match state
            .database_users
            .iter_mut()
            .find(|r| user_identity(r) == identity)
        {
            Some(existing) => {
                *existing = resource.clone();
                Ok(existing.clone())
            }
            None => Err(RemoteError::not_found(format!(
                "database user '{}' not found",
                identity
            ))),
        }
    }

    async fn delete(&self, project_id: &str, identity: &str) -> Result<(), RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        let before = state.database_users.len();
        state
            .database_users
            .retain(|r| user_identity(r) != identity);
        if state.database_users.len() == before {
            return Err(RemoteError::not_found(format!(
                "database user '{}' not found",
                identity
            )));
        }
        Ok(())
    }
}

fn user_identity(r: &Resource<DatabaseUserSpec>) -> String {
    format!("{}/{}", r.spec.auth_database, r.spec.username)
}

#[async_trait]
impl ProjectOperations for MockClient {
    async fn get(&self, project_id: &str) -> Result<Resource<ProjectSpec>, RemoteError> {
        self.maybe_fail().await?;
        self.state_of(project_id)
            .await
            .project
            .ok_or_else(|| RemoteError::not_found(format!("project '{}' not found", project_id)))
    }

    async fn update(
        &self,
        project_id: &str,
        resource: &Resource<ProjectSpec>,
    ) -> Result<Resource<ProjectSpec>, RemoteError> {
        self.maybe_fail().await?;
        let mut projects = self.projects.lock().await;
        let state = projects.entry(project_id.to_string()).or_default();
        state.project = Some(resource.clone());
        Ok(resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::RemoteErrorKind;

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let client = MockClient::new();
        let cluster = Resource::new(
            "prod",
            ClusterSpec {
                instance_size: "M10".into(),
                mongo_db_version: "6.0".into(),
                disk_size_gb: 10.0,
                replication_specs: vec![],
                backup_enabled: true,
            },
        );
        ClusterOperations::create(&client, "proj-1", &cluster)
            .await
            .unwrap();
        let listed = ClusterOperations::list(&client, "proj-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name(), "prod");
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let client = MockClient::new();
        let cluster = Resource::new("prod", ClusterSpec::default());
        ClusterOperations::create(&client, "proj-1", &cluster)
            .await
            .unwrap();
        let err = ClusterOperations::create(&client, "proj-1", &cluster)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Conflict);
    }

    #[tokio::test]
    async fn queued_error_preempts_the_next_call() {
        let client = MockClient::new();
        client.fail_next(RemoteError::transient("flaky backend")).await;
        let err = ClusterOperations::list(&client, "proj-1").await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transient);
        // the queue is now empty, so the next call succeeds
        assert!(ClusterOperations::list(&client, "proj-1").await.is_ok());
    }
}
