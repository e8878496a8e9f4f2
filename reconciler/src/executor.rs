//! The executor (§4.6): runs a [`Plan`] stage by stage, serially between
//! stages and in parallel (bounded by a worker pool) within a stage, against
//! the remote control plane. Supports cooperative cancellation and a
//! per-operation timeout.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reconciler_client::{
    ClusterOperations, ControlPlaneClient, DatabaseRoleOperations, DatabaseUserOperations,
    NetworkAccessOperations, ProjectOperations, SearchIndexOperations, VpcEndpointOperations,
};
use reconciler_common::errors::{Cancelled, ValidationFailed};
use reconciler_common::{
    AnyResource, OperationStatus, OperationType, Plan, PlanStatus, ReconcileError, RemoteError,
    RemoteErrorKind,
};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::rate_limiter::RateLimiter;
use crate::retry::RetryManager;

pub use crate::cancellation::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    pub operation_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            // §4.6/spec.md line 113: a stuck operation against the remote
            // control plane shouldn't be declared dead until 30 minutes in.
            operation_timeout: Duration::from_secs(1800),
        }
    }
}

pub struct Executor {
    client: Arc<dyn ControlPlaneClient>,
    rate_limiter: RateLimiter,
    retry_manager: Arc<RetryManager>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        client: Arc<dyn ControlPlaneClient>,
        rate_limiter: RateLimiter,
        retry_manager: Arc<RetryManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            retry_manager,
            config,
        }
    }

    /// No background task to start; kept for symmetry with `StateCache`
    /// and to give future metrics/health-check wiring a natural home.
    pub fn start(&self) {}

    pub fn stop(&self) {}

    /// Runs every stage of `plan` in order. Within a stage, a fatal error
    /// (auth/forbidden/invalid-request/validation) on any operation aborts
    /// the whole run immediately. Any other failure marks just that
    /// operation `Failed`, transitively marks its dependents `Skipped`, and
    /// lets unrelated operations and later stages continue (§4.6).
    #[instrument(skip(self, plan, cancel), fields(plan.id = %plan.id))]
    pub async fn execute_plan(
        &self,
        plan: &mut Plan,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        if !plan.approval.approved {
            return ValidationFailed {
                message: "plan is not approved".to_string(),
            }
            .fail();
        }

        plan.status = PlanStatus::Executing;
        let preserve_existing = plan.config.preserve_existing;
        let mut failed_ids: HashSet<String> = HashSet::new();

        for stage in 0..=plan.max_stage() {
            if *cancel.borrow() {
                self.skip_remaining(plan, stage);
                plan.status = PlanStatus::Cancelled;
                return Cancelled.fail();
            }

            let mut runnable_ids = Vec::new();
            for op in plan.operations_in_stage(stage) {
                if op.dependencies.iter().any(|dep| failed_ids.contains(dep)) {
                    continue;
                }
                runnable_ids.push(op.id.clone());
            }

            for op in plan.operations.iter_mut() {
                if op.stage == stage
                    && !op.status.is_terminal()
                    && !runnable_ids.contains(&op.id)
                {
                    op.status = OperationStatus::Skipped;
                }
            }

            if runnable_ids.is_empty() {
                continue;
            }

            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
            let mut handles = Vec::with_capacity(runnable_ids.len());

            for id in &runnable_ids {
                let operation = plan
                    .operations
                    .iter()
                    .find(|op| &op.id == id)
                    .expect("id was just collected from this plan")
                    .operation
                    .clone();
                let project_id = plan.project_id.clone();
                let permit = semaphore.clone().acquire_owned();
                let client = self.client.clone();
                let rate_limiter = self.rate_limiter.clone();
                let retry_manager = self.retry_manager.clone();
                let timeout = self.config.operation_timeout;
                let mut task_cancel = cancel.clone();
                let id = id.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit.await.expect("semaphore is never closed");
                    let result = run_operation(
                        &client,
                        &rate_limiter,
                        &retry_manager,
                        &project_id,
                        &operation,
                        timeout,
                        preserve_existing,
                        &mut task_cancel,
                    )
                    .await;
                    (id, result)
                }));
            }

            let mut fatal: Option<ReconcileError> = None;

            for handle in handles {
                let (id, result) = handle.await.map_err(|join_err| {
                    reconciler_common::errors::Internal {
                        message: format!("executor task panicked: {}", join_err),
                    }
                    .build()
                })?;

                let planned = plan.operation_mut(&id).expect("operation id is stable");
                planned.completed_at = Some(Utc::now());
                match result {
                    Ok(()) => {
                        planned.status = OperationStatus::Completed;
                        info!(operation.id = %id, "operation completed");
                    }
                    Err(err) => {
                        planned.status = OperationStatus::Failed;
                        planned.error = Some(err.to_string());
                        error!(operation.id = %id, error = %err, "operation failed");
                        failed_ids.insert(id.clone());
                        if err.is_fatal() {
                            warn!(operation.id = %id, "fatal error, aborting remaining stages");
                            fatal = Some(err);
                        }
                    }
                }
            }

            if let Some(err) = fatal {
                self.skip_remaining(plan, stage + 1);
                plan.status = PlanStatus::Partial;
                return ValidationFailed {
                    message: format!("stage {} aborted on a fatal error: {}", stage, err),
                }
                .fail();
            }
        }

        if failed_ids.is_empty() {
            plan.status = PlanStatus::Completed;
            Ok(())
        } else {
            plan.status = PlanStatus::Partial;
            ValidationFailed {
                message: format!("{} operation(s) failed", failed_ids.len()),
            }
            .fail()
        }
    }

    fn skip_remaining(&self, plan: &mut Plan, from_stage: u32) {
        for op in plan.operations.iter_mut() {
            if op.stage >= from_stage && !op.status.is_terminal() {
                op.status = OperationStatus::Skipped;
            }
        }
    }
}

#[instrument(skip(client, rate_limiter, retry_manager, operation, cancel), fields(operation.kind = %operation.resource_kind, operation.name = %operation.resource_name))]
async fn run_operation(
    client: &Arc<dyn ControlPlaneClient>,
    rate_limiter: &RateLimiter,
    retry_manager: &RetryManager,
    project_id: &str,
    operation: &reconciler_common::Operation,
    timeout: Duration,
    preserve_existing: bool,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), ReconcileError> {
    if operation.op_type == OperationType::NoChange {
        return Ok(());
    }

    rate_limiter.acquire(operation.resource_kind, cancel).await?;

    let op_type = operation.op_type;
    let kind = operation.resource_kind;
    let client_for_call = client.clone();
    let operation_for_call = operation.clone();
    let project_id_for_call = project_id.to_string();

    let result = retry_manager
        .run(op_type, kind, cancel, move || {
            let client = client_for_call.clone();
            let operation = operation_for_call.clone();
            let project_id = project_id_for_call.clone();
            async move {
                tokio::time::timeout(timeout, apply(&*client, &project_id, &operation))
                    .await
                    .map_err(|_| {
                        ReconcileError::from_remote(RemoteError::transient("operation timed out"), kind)
                    })?
                    .map_err(|err| ReconcileError::from_remote(err, kind))
            }
        })
        .await;

    // A delete of a target that's already gone, or a create that already
    // exists while `preserveExisting` is set, has already reached the
    // caller's desired end state; treat it as success rather than noise.
    match result {
        Err(err) if op_type == OperationType::Delete && err.is_not_found() => Ok(()),
        Err(err) if preserve_existing && op_type == OperationType::Create && err.is_conflict() => {
            Ok(())
        }
        other => other,
    }
}

async fn apply(
    client: &dyn ControlPlaneClient,
    project_id: &str,
    op: &reconciler_common::Operation,
) -> Result<(), RemoteError> {
    use AnyResource::*;

    match (op.op_type, &op.desired, &op.current) {
        (OperationType::Create, Some(Project(r)), _) => {
            ProjectOperations::update(client, project_id, r).await?;
        }
        (OperationType::Update, Some(Project(r)), _) => {
            ProjectOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(Project(_))) => {
            return Err(RemoteError::new(
                RemoteErrorKind::InvalidRequest,
                "deleting a project is not supported by this reconciler",
            ));
        }

        (OperationType::Create, Some(Cluster(r)), _) => {
            ClusterOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(Cluster(r)), _) => {
            ClusterOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(Cluster(r))) => {
            ClusterOperations::delete(client, project_id, r.name()).await?;
        }

        (OperationType::Create, Some(DatabaseRole(r)), _) => {
            DatabaseRoleOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(DatabaseRole(r)), _) => {
            DatabaseRoleOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(DatabaseRole(r))) => {
            DatabaseRoleOperations::delete(client, project_id, r.name()).await?;
        }

        (OperationType::Create, Some(DatabaseUser(r)), _) => {
            DatabaseUserOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(DatabaseUser(r)), _) => {
            DatabaseUserOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(DatabaseUser(r))) => {
            let identity = format!("{}/{}", r.spec.auth_database, r.spec.username);
            DatabaseUserOperations::delete(client, project_id, &identity).await?;
        }

        (OperationType::Create, Some(NetworkAccess(r)), _) => {
            NetworkAccessOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(NetworkAccess(r)), _) => {
            NetworkAccessOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(NetworkAccess(r))) => {
            NetworkAccessOperations::delete(client, project_id, &r.spec.address).await?;
        }

        (OperationType::Create, Some(SearchIndex(r)), _) => {
            SearchIndexOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(SearchIndex(r)), _) => {
            SearchIndexOperations::update(client, project_id, r).await?;
        }
        (OperationType::Delete, _, Some(SearchIndex(r))) => {
            SearchIndexOperations::delete(client, project_id, r.name()).await?;
        }

        (OperationType::Create, Some(VpcEndpoint(r)), _) => {
            VpcEndpointOperations::create(client, project_id, r).await?;
        }
        (OperationType::Update, Some(VpcEndpoint(_)), _) => {
            return Err(RemoteError::new(
                RemoteErrorKind::InvalidRequest,
                "vpc endpoints are immutable; replace instead of updating",
            ));
        }
        (OperationType::Delete, _, Some(VpcEndpoint(r))) => {
            VpcEndpointOperations::delete(client, project_id, r.name()).await?;
        }

        (OperationType::NoChange, _, _) => {}

        _ => {
            return Err(RemoteError::new(
                RemoteErrorKind::Internal,
                format!(
                    "operation on {:?} '{}' is missing the resource payload it needs",
                    op.resource_kind, op.resource_name
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::CircuitBreaker;
    use reconciler_client::MockClient;
    use reconciler_common::{ClusterSpec, Impact, Operation, PlanConfig, Resource};
    use std::time::Duration as StdDuration;

    fn make_executor() -> (Executor, Arc<MockClient>) {
        let mock = Arc::new(MockClient::new());
        let executor = Executor::new(
            mock.clone(),
            RateLimiter::new(crate::rate_limiter::RateLimitConfig {
                capacity: 100.0,
                refill_per_second: 1000.0,
            }),
            Arc::new(RetryManager::new(Arc::new(CircuitBreaker::new(
                10,
                StdDuration::from_secs(60),
            )))),
            ExecutorConfig::default(),
        );
        (executor, mock)
    }

    fn cluster_create_plan(name: &str) -> Plan {
        let resource = Resource::new(name, ClusterSpec::default());
        let op = Operation {
            op_type: OperationType::Create,
            resource_kind: reconciler_common::ResourceKind::Cluster,
            resource_name: name.to_string(),
            desired: Some(AnyResource::Cluster(resource)),
            current: None,
            field_changes: vec![],
            impact: Impact::low(StdDuration::from_secs(0)),
        };
        let mut planned = reconciler_common::PlannedOperation::new(format!("op-{}", name), op);
        planned.stage = 0;
        Plan {
            id: "plan-1".to_string(),
            project_id: "proj-1".to_string(),
            created_at: Utc::now(),
            config: PlanConfig::default(),
            operations: vec![planned],
            summary: reconciler_common::PlanSummary::default(),
            approval: reconciler_common::ApprovalInfo {
                required: false,
                approved: true,
                approved_at: None,
                approved_by: None,
            },
            status: PlanStatus::Draft,
        }
    }

    #[tokio::test]
    async fn execute_plan_creates_the_cluster_and_marks_it_completed() {
        let (executor, mock) = make_executor();
        let mut plan = cluster_create_plan("prod");
        let (_token, rx) = CancellationToken::new();
        executor.execute_plan(&mut plan, rx).await.unwrap();
        assert_eq!(plan.operations[0].status, OperationStatus::Completed);
        assert_eq!(plan.status, PlanStatus::Completed);
        let listed = ClusterOperations::list(&*mock, "proj-1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn execute_plan_rejects_an_unapproved_plan() {
        let (executor, _mock) = make_executor();
        let mut plan = cluster_create_plan("prod");
        plan.approval.approved = false;
        let (_token, rx) = CancellationToken::new();
        assert!(executor.execute_plan(&mut plan, rx).await.is_err());
    }

    #[tokio::test]
    async fn cancellation_before_a_stage_skips_its_operations() {
        let (executor, _mock) = make_executor();
        let mut plan = cluster_create_plan("prod");
        let (token, rx) = CancellationToken::new();
        token.cancel();
        let result = executor.execute_plan(&mut plan, rx).await;
        assert!(result.is_err());
        assert_eq!(plan.operations[0].status, OperationStatus::Skipped);
    }

    #[tokio::test]
    async fn a_fatal_failure_aborts_later_stages() {
        let (executor, mock) = make_executor();
        let mut plan = cluster_create_plan("prod");
        mock.fail_next(RemoteError::new(RemoteErrorKind::Unauthorized, "no"))
            .await;

        let later_op = Operation {
            op_type: OperationType::Create,
            resource_kind: reconciler_common::ResourceKind::Cluster,
            resource_name: "later".to_string(),
            desired: Some(AnyResource::Cluster(Resource::new("later", ClusterSpec::default()))),
            current: None,
            field_changes: vec![],
            impact: Impact::low(StdDuration::from_secs(0)),
        };
        let mut later = reconciler_common::PlannedOperation::new("op-later", later_op);
        later.stage = 1;
        plan.operations.push(later);

        let (_token, rx) = CancellationToken::new();
        let result = executor.execute_plan(&mut plan, rx).await;
        assert!(result.is_err());
        assert_eq!(plan.operations[0].status, OperationStatus::Failed);
        assert_eq!(plan.operations[1].status, OperationStatus::Skipped);
        assert_eq!(plan.status, PlanStatus::Partial);
    }

    #[tokio::test]
    async fn a_failed_operation_skips_its_dependents_but_not_unrelated_work() {
        let (executor, mock) = make_executor();
        let mut plan = cluster_create_plan("prod");
        plan.operations[0].id = "op-fails".to_string();
        mock.fail_next(RemoteError::new(RemoteErrorKind::Internal, "boom"))
            .await;

        let dependent_op = Operation {
            op_type: OperationType::Create,
            resource_kind: reconciler_common::ResourceKind::Cluster,
            resource_name: "dependent".to_string(),
            desired: Some(AnyResource::Cluster(Resource::new("dependent", ClusterSpec::default()))),
            current: None,
            field_changes: vec![],
            impact: Impact::low(StdDuration::from_secs(0)),
        };
        let mut dependent = reconciler_common::PlannedOperation::new("op-dependent", dependent_op);
        dependent.stage = 1;
        dependent.dependencies = vec!["op-fails".to_string()];

        let unrelated_op = Operation {
            op_type: OperationType::Create,
            resource_kind: reconciler_common::ResourceKind::Cluster,
            resource_name: "unrelated".to_string(),
            desired: Some(AnyResource::Cluster(Resource::new("unrelated", ClusterSpec::default()))),
            current: None,
            field_changes: vec![],
            impact: Impact::low(StdDuration::from_secs(0)),
        };
        let mut unrelated = reconciler_common::PlannedOperation::new("op-unrelated", unrelated_op);
        unrelated.stage = 1;

        plan.operations.push(dependent);
        plan.operations.push(unrelated);

        let (_token, rx) = CancellationToken::new();
        let result = executor.execute_plan(&mut plan, rx).await;
        assert!(result.is_err());
        assert_eq!(plan.operations[0].status, OperationStatus::Failed);
        assert_eq!(plan.operations[1].status, OperationStatus::Skipped);
        assert_eq!(plan.operations[2].status, OperationStatus::Completed);
        assert_eq!(plan.status, PlanStatus::Partial);
    }
}
