//! The dry-run simulator (§4.8): validates a plan against a discovered
//! [`ProjectState`] without making any remote calls. Operates on
//! [`Plan::deep_clone`] like the optimizer, so simulating a plan never
//! mutates the caller's copy.

use std::collections::{HashMap, HashSet};

use reconciler_common::{AnyResource, OperationType, Plan, ProjectState, ResourceKind, RiskLevel};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DryRunMode {
    /// Structure only: does the operation's precondition hold.
    Quick,
    /// Adds quota validation.
    Thorough,
    /// Adds cross-resource invariant checks on top of Thorough.
    Detailed,
}

/// Static per-kind quota ceilings the simulator checks `Create` operations
/// against in `Thorough`/`Detailed` mode. A field, not a constant table, so
/// a caller can raise them for a higher project tier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DryRunConfig {
    pub mode: DryRunMode,
    pub quota_limits: HashMap<ResourceKind, usize>,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        let mut quota_limits = HashMap::new();
        quota_limits.insert(ResourceKind::Cluster, 25);
        quota_limits.insert(ResourceKind::DatabaseUser, 100);
        quota_limits.insert(ResourceKind::NetworkAccess, 200);
        quota_limits.insert(ResourceKind::SearchIndex, 64);
        quota_limits.insert(ResourceKind::VpcEndpoint, 50);
        Self {
            mode: DryRunMode::Thorough,
            quota_limits,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Precondition {
    pub description: String,
    pub satisfied: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Postcondition {
    pub description: String,
}

/// The predicted outcome of one planned operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedOperation {
    pub operation_id: String,
    pub would_succeed: bool,
    pub preconditions: Vec<Precondition>,
    pub postconditions: Vec<Postcondition>,
    pub quota_violation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub plan_id: String,
    pub mode: DryRunMode,
    pub operations: Vec<SimulatedOperation>,
    pub would_succeed: bool,
    pub highest_risk: RiskLevel,
    pub max_concurrent_quota_violations: usize,
}

pub struct DryRunSimulator {
    config: DryRunConfig,
}

impl DryRunSimulator {
    pub fn new(config: DryRunConfig) -> Self {
        Self { config }
    }

    /// Simulates `plan` against `current_state`, without executing anything.
    pub fn simulate(&self, plan: &Plan, current_state: &ProjectState) -> DryRunReport {
        let plan = plan.deep_clone();
        let existing = current_state.all_resources();

        let mut quota_usage: HashMap<ResourceKind, usize> = HashMap::new();
        for resource in &existing {
            *quota_usage.entry(resource.kind()).or_insert(0) += 1;
        }

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut simulated = Vec::new();
        let mut highest_risk = RiskLevel::Low;
        let mut max_concurrent_violations = 0usize;

        for stage in 0..=plan.max_stage() {
            let mut stage_violations = 0usize;

            for op in plan.operations_in_stage(stage) {
                if op.impact.risk_level > highest_risk {
                    highest_risk = op.impact.risk_level;
                }

                if op.op_type == OperationType::NoChange {
                    continue;
                }

                let identity = identity_of(op);
                let exists = existing
                    .iter()
                    .any(|r| r.kind() == op.resource_kind && r.identity() == identity);

                let mut preconditions = Vec::new();
                let mut postconditions = Vec::new();
                let mut would_succeed = true;
                let mut reason: Option<String> = None;
                let mut quota_violation = false;

                match op.op_type {
                    OperationType::Create => {
                        preconditions.push(Precondition {
                            description: "resource does not already exist".to_string(),
                            satisfied: !exists,
                        });
                        if exists {
                            would_succeed = false;
                            reason = Some(format!(
                                "{} '{}' already exists",
                                op.resource_kind, op.resource_name
                            ));
                        }
                        postconditions.push(Postcondition {
                            description: format!(
                                "{} '{}' will exist",
                                op.resource_kind, op.resource_name
                            ),
                        });
                    }
                    OperationType::Update => {
                        preconditions.push(Precondition {
                            description: "resource exists".to_string(),
                            satisfied: exists,
                        });
                        if !exists {
                            would_succeed = false;
                            reason = Some(format!(
                                "{} '{}' not found",
                                op.resource_kind, op.resource_name
                            ));
                        }
                        postconditions.push(Postcondition {
                            description: format!(
                                "{} '{}' will reflect the desired spec",
                                op.resource_kind, op.resource_name
                            ),
                        });
                    }
                    OperationType::Delete => {
                        preconditions.push(Precondition {
                            description: "resource exists".to_string(),
                            satisfied: exists,
                        });
                        if !exists {
                            would_succeed = false;
                            reason = Some(format!(
                                "{} '{}' not found",
                                op.resource_kind, op.resource_name
                            ));
                        }
                        postconditions.push(Postcondition {
                            description: format!(
                                "{} '{}' will be removed",
                                op.resource_kind, op.resource_name
                            ),
                        });
                    }
                    OperationType::NoChange => unreachable!("filtered out above"),
                }

                if matches!(self.config.mode, DryRunMode::Thorough | DryRunMode::Detailed)
                    && op.op_type == OperationType::Create
                {
                    let limit = self
                        .config
                        .quota_limits
                        .get(&op.resource_kind)
                        .copied()
                        .unwrap_or(usize::MAX);
                    let usage = quota_usage.entry(op.resource_kind).or_insert(0);
                    *usage += 1;
                    if *usage > limit {
                        quota_violation = true;
                        would_succeed = false;
                        reason = Some(format!(
                            "quota exceeded for {:?}: {} of {} already in use",
                            op.resource_kind, usage, limit
                        ));
                    }
                }

                for dependency in &op.dependencies {
                    if !succeeded.contains(dependency) {
                        would_succeed = false;
                        reason.get_or_insert_with(|| {
                            format!("dependency '{}' would not succeed", dependency)
                        });
                    }
                }

                if self.config.mode == DryRunMode::Detailed
                    && op.resource_kind == ResourceKind::DatabaseUser
                {
                    if let Some(AnyResource::DatabaseUser(user)) = &op.desired {
                        for role_name in &user.spec.roles {
                            let role_satisfied = existing.iter().any(|r| {
                                r.kind() == ResourceKind::DatabaseRole && r.name() == role_name
                            }) || plan.operations.iter().any(|other| {
                                other.resource_kind == ResourceKind::DatabaseRole
                                    && other.resource_name == *role_name
                                    && succeeded.contains(&other.id)
                            });
                            if !role_satisfied {
                                would_succeed = false;
                                reason.get_or_insert_with(|| {
                                    format!("referenced database role '{}' would not succeed", role_name)
                                });
                            }
                        }
                    }
                }

                if quota_violation {
                    stage_violations += 1;
                }

                if would_succeed {
                    succeeded.insert(op.id.clone());
                }

                simulated.push(SimulatedOperation {
                    operation_id: op.id.clone(),
                    would_succeed,
                    preconditions,
                    postconditions,
                    quota_violation,
                    reason,
                });
            }

            max_concurrent_violations = max_concurrent_violations.max(stage_violations);
        }

        let would_succeed = simulated.iter().all(|op| op.would_succeed);

        DryRunReport {
            plan_id: plan.id.clone(),
            mode: self.config.mode,
            operations: simulated,
            would_succeed,
            highest_risk,
            max_concurrent_quota_violations: max_concurrent_violations,
        }
    }
}

/// The identity a resource is matched on: the composite `DatabaseUser` key
/// when available, else the plain resource name, mirroring
/// `AnyResource::identity`.
fn identity_of(op: &reconciler_common::PlannedOperation) -> String {
    op.desired
        .as_ref()
        .or(op.current.as_ref())
        .map(|r| r.identity())
        .unwrap_or_else(|| op.resource_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{
        AnyResource, ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, Impact, Operation,
        PlannedOperation, Resource,
    };
    use std::time::Duration;

    fn plan_with(operations: Vec<PlannedOperation>) -> Plan {
        Plan {
            id: "plan-1".to_string(),
            project_id: "proj-1".to_string(),
            created_at: chrono::Utc::now(),
            config: reconciler_common::PlanConfig::default(),
            operations,
            summary: reconciler_common::PlanSummary::default(),
            approval: reconciler_common::ApprovalInfo::default(),
            status: reconciler_common::PlanStatus::Draft,
        }
    }

    fn create_op(kind: ResourceKind, name: &str, desired: AnyResource) -> PlannedOperation {
        let op = Operation {
            op_type: OperationType::Create,
            resource_kind: kind,
            resource_name: name.to_string(),
            desired: Some(desired),
            current: None,
            field_changes: vec![],
            impact: Impact::low(Duration::from_secs(1)),
        };
        PlannedOperation::new(format!("op-{}", name), op)
    }

    #[test]
    fn create_of_an_existing_resource_would_not_succeed() {
        let simulator = DryRunSimulator::new(DryRunConfig {
            mode: DryRunMode::Quick,
            ..DryRunConfig::default()
        });
        let resource = Resource::new("prod", ClusterSpec::default());
        let plan = plan_with(vec![create_op(
            ResourceKind::Cluster,
            "prod",
            AnyResource::Cluster(resource.clone()),
        )]);
        let mut state = ProjectState::default();
        state.clusters.push(resource);

        let report = simulator.simulate(&plan, &state);
        assert!(!report.would_succeed);
        assert!(!report.operations[0].would_succeed);
    }

    #[test]
    fn quota_violation_is_flagged_in_thorough_mode() {
        let mut config = DryRunConfig::default();
        config.quota_limits.insert(ResourceKind::Cluster, 1);
        let simulator = DryRunSimulator::new(config);

        let plan = plan_with(vec![
            create_op(
                ResourceKind::Cluster,
                "a",
                AnyResource::Cluster(Resource::new("a", ClusterSpec::default())),
            ),
            create_op(
                ResourceKind::Cluster,
                "b",
                AnyResource::Cluster(Resource::new("b", ClusterSpec::default())),
            ),
        ]);

        let report = simulator.simulate(&plan, &ProjectState::default());
        assert!(!report.would_succeed);
        assert_eq!(report.max_concurrent_quota_violations, 1);
    }

    #[test]
    fn quick_mode_ignores_quota() {
        let mut config = DryRunConfig::default();
        config.mode = DryRunMode::Quick;
        config.quota_limits.insert(ResourceKind::Cluster, 0);
        let simulator = DryRunSimulator::new(config);

        let plan = plan_with(vec![create_op(
            ResourceKind::Cluster,
            "a",
            AnyResource::Cluster(Resource::new("a", ClusterSpec::default())),
        )]);

        let report = simulator.simulate(&plan, &ProjectState::default());
        assert!(report.would_succeed);
    }

    #[test]
    fn detailed_mode_requires_the_users_role_to_also_succeed() {
        let mut config = DryRunConfig::default();
        config.mode = DryRunMode::Detailed;
        let simulator = DryRunSimulator::new(config);

        let user = Resource::new(
            "ignored",
            DatabaseUserSpec {
                auth_database: "admin".to_string(),
                username: "alice".to_string(),
                password: None,
                roles: vec!["readWrite".to_string()],
                scopes: vec![],
            },
        );
        let plan = plan_with(vec![create_op(
            ResourceKind::DatabaseUser,
            "alice",
            AnyResource::DatabaseUser(user),
        )]);

        let report = simulator.simulate(&plan, &ProjectState::default());
        assert!(!report.would_succeed);
        assert!(report.operations[0].reason.as_ref().unwrap().contains("readWrite"));
    }

    #[test]
    fn detailed_mode_succeeds_when_role_is_already_present() {
        let mut config = DryRunConfig::default();
        config.mode = DryRunMode::Detailed;
        let simulator = DryRunSimulator::new(config);

        let user = Resource::new(
            "ignored",
            DatabaseUserSpec {
                auth_database: "admin".to_string(),
                username: "alice".to_string(),
                password: None,
                roles: vec!["readWrite".to_string()],
                scopes: vec![],
            },
        );
        let plan = plan_with(vec![create_op(
            ResourceKind::DatabaseUser,
            "alice",
            AnyResource::DatabaseUser(user),
        )]);
        let mut state = ProjectState::default();
        state.database_roles.push(Resource::new(
            "readWrite",
            DatabaseRoleSpec {
                role_name: "readWrite".to_string(),
                privileges: vec![],
                inherited_roles: vec![],
            },
        ));

        let report = simulator.simulate(&plan, &state);
        assert!(report.would_succeed);
    }
}
