//! State discovery (§4.2): gathers a project's current state from the
//! remote control plane across every resource kind, in parallel and bounded
//! by a semaphore, surfacing any per-kind failures rather than silently
//! dropping them.

use std::sync::Arc;

use chrono::Utc;
use reconciler_client::{
    ClusterOperations, ControlPlaneClient, DatabaseRoleOperations, DatabaseUserOperations,
    NetworkAccessOperations, ProjectOperations, SearchIndexOperations, VpcEndpointOperations,
};
use reconciler_common::errors::DiscoveryFailed;
use reconciler_common::{
    canonical, ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, NetworkAccessSpec, ProjectState,
    ReconcileError, Resource, ResourceKind, SearchIndexSpec, VpcEndpointSpec,
};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::rate_limiter::RateLimiter;

/// Bounds how many of the six per-kind `list` calls are in flight at once
/// (§4.2: "bounded by a semaphore of at most K concurrent in-flight
/// requests, default 5").
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// One spawned fetch task's outcome, tagged by which `ProjectState` field it
/// belongs in. `tokio::spawn` needs a single concrete return type per
/// `JoinHandle`, so this carries the heterogeneous per-kind results through
/// one `Vec`.
enum Fetched {
    Clusters(Result<Vec<Resource<ClusterSpec>>, ReconcileError>),
    DatabaseRoles(Result<Vec<Resource<DatabaseRoleSpec>>, ReconcileError>),
    DatabaseUsers(Result<Vec<Resource<DatabaseUserSpec>>, ReconcileError>),
    NetworkAccess(Result<Vec<Resource<NetworkAccessSpec>>, ReconcileError>),
    SearchIndexes(Result<Vec<Resource<SearchIndexSpec>>, ReconcileError>),
    VpcEndpoints(Result<Vec<Resource<VpcEndpointSpec>>, ReconcileError>),
}

/// Discovers a project's full current state against any
/// [`ControlPlaneClient`] (a real client, or [`reconciler_client::MockClient`]
/// in tests).
pub struct StateDiscovery {
    client: Arc<dyn ControlPlaneClient>,
    rate_limiter: RateLimiter,
    max_concurrent_fetches: usize,
}

impl StateDiscovery {
    pub fn new(client: Arc<dyn ControlPlaneClient>, rate_limiter: RateLimiter) -> Self {
        Self {
            client,
            rate_limiter,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// Fetches every resource kind for `project_id`, the project itself
    /// first and the six resource kinds afterwards in parallel (bounded by
    /// `max_concurrent_fetches`). Returns `DiscoveryFailed` (carrying
    /// whatever state was gathered as `partial_state`) if any fetch failed,
    /// rather than silently discarding the partial result.
    pub async fn discover(&self, project_id: &str) -> Result<ProjectState, ReconcileError> {
        let mut state = ProjectState::default();
        let mut errors = Vec::new();

        // Discovery has no caller-supplied cancellation token of its own
        // yet; this one is never cancelled, it only satisfies the rate
        // limiter's signature.
        let (_token, cancel) = CancellationToken::new();

        {
            let mut cancel = cancel.clone();
            if let Err(err) = self.rate_limiter.acquire(ResourceKind::Project, &mut cancel).await {
                errors.push(err);
            }
        }
        match self.client.get(project_id).await {
            Ok(project) => state.project = Some(project),
            Err(err) => {
                let err = ReconcileError::from_remote(err, ResourceKind::Project);
                warn!(project_id, error = %err, "failed to discover project");
                errors.push(err);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches.max(1)));
        let mut handles = Vec::with_capacity(6);

        macro_rules! spawn_fetch {
            ($kind:expr, $trait_method:ident, $variant:ident) => {{
                let client = self.client.clone();
                let rate_limiter = self.rate_limiter.clone();
                let project_id = project_id.to_string();
                let permit = semaphore.clone().acquire_owned();
                let mut cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit.await.expect("semaphore is never closed");
                    let result = async {
                        rate_limiter.acquire($kind, &mut cancel).await?;
                        client.$trait_method(&project_id).await.map_err(|err| {
                            ReconcileError::from_remote(err, $kind)
                        })
                    }
                    .await;
                    Fetched::$variant(result)
                }));
            }};
        }

        spawn_fetch!(ResourceKind::Cluster, list, Clusters);
        spawn_fetch!(ResourceKind::DatabaseRole, list, DatabaseRoles);
        spawn_fetch!(ResourceKind::DatabaseUser, list, DatabaseUsers);
        spawn_fetch!(ResourceKind::NetworkAccess, list, NetworkAccess);
        spawn_fetch!(ResourceKind::SearchIndex, list, SearchIndexes);
        spawn_fetch!(ResourceKind::VpcEndpoint, list, VpcEndpoints);

        for handle in handles {
            let fetched = handle.await.map_err(|join_err| {
                reconciler_common::errors::Internal {
                    message: format!("discovery task panicked: {}", join_err),
                }
                .build()
            })?;

            match fetched {
                Fetched::Clusters(Ok(items)) => state.clusters = items,
                Fetched::DatabaseRoles(Ok(items)) => state.database_roles = items,
                Fetched::DatabaseUsers(Ok(items)) => state.database_users = items,
                Fetched::NetworkAccess(Ok(items)) => state.network_access = items,
                Fetched::SearchIndexes(Ok(items)) => state.search_indexes = items,
                Fetched::VpcEndpoints(Ok(items)) => state.vpc_endpoints = items,
                Fetched::Clusters(Err(err))
                | Fetched::DatabaseRoles(Err(err))
                | Fetched::DatabaseUsers(Err(err))
                | Fetched::NetworkAccess(Err(err))
                | Fetched::SearchIndexes(Err(err))
                | Fetched::VpcEndpoints(Err(err)) => {
                    warn!(project_id, error = %err, "failed to discover resources");
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            state.discovered_at = Some(Utc::now());
            state.fingerprint = canonical::fingerprint(&state).ok();
            return DiscoveryFailed {
                project_id: project_id.to_string(),
                sources: errors,
                partial_state: state,
            }
            .fail();
        }

        state.discovered_at = Some(Utc::now());
        state.fingerprint = canonical::fingerprint(&state).ok();

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_client::MockClient;
    use reconciler_common::ClusterSpec;

    fn discovery(client: Arc<MockClient>) -> StateDiscovery {
        StateDiscovery::new(
            client,
            RateLimiter::new(crate::rate_limiter::RateLimitConfig {
                capacity: 100.0,
                refill_per_second: 1000.0,
            }),
        )
    }

    #[tokio::test]
    async fn discover_gathers_every_kind() {
        let client = Arc::new(MockClient::new());
        let mut seeded = ProjectState::default();
        seeded.clusters.push(Resource::new("prod", ClusterSpec::default()));
        client.seed("proj-1", seeded).await;

        let state = discovery(client).discover("proj-1").await.unwrap();
        assert_eq!(state.clusters.len(), 1);
        assert!(state.fingerprint.is_some());
    }

    #[tokio::test]
    async fn discover_surfaces_a_missing_project_as_a_failure_with_partial_state() {
        let client = Arc::new(MockClient::new());
        let mut seeded = ProjectState::default();
        seeded.clusters.push(Resource::new("prod", ClusterSpec::default()));
        client.seed("proj-missing", seeded).await;
        // consumed by the project `get()`, which discovery always issues
        // first, before the per-kind fetches race for the queue.
        client
            .fail_next(reconciler_common::RemoteError::not_found("no such project"))
            .await;

        let err = discovery(client).discover("proj-missing").await.unwrap_err();
        match err {
            ReconcileError::DiscoveryFailed { sources, partial_state, .. } => {
                assert_eq!(sources.len(), 1);
                assert_eq!(partial_state.clusters.len(), 1);
            }
            other => panic!("expected DiscoveryFailed, got {:?}", other),
        }
    }
}
