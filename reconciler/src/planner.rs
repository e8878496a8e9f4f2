//! The planner (§4.5): turns diffed [`Operation`]s plus a dependency graph
//! into a staged, prioritized [`Plan`] with a summary and an approval
//! requirement.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reconciler_common::graph::node_id;
use reconciler_common::{
    ApprovalInfo, DependencyGraph, Operation, OperationStatus, OperationType, Plan, PlanConfig,
    PlanStatus, PlanSummary, PlannedOperation, ResourceKind, RiskLevel,
};

use crate::dependency::assign_stages;

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub plan_config: PlanConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            plan_config: PlanConfig::default(),
        }
    }
}

pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Builds a `Plan` from `operations`, staged according to `graph`.
    /// Operations within the same stage are ordered by priority
    /// (destructive/high-risk operations sort last within their stage, so a
    /// partial failure leaves as much already-consistent state as possible).
    pub fn build_plan(
        &self,
        project_id: impl Into<String>,
        operations: Vec<Operation>,
        graph: &DependencyGraph,
    ) -> Plan {
        let stages = assign_stages(graph);

        let mut planned: Vec<PlannedOperation> = operations
            .into_iter()
            .filter(|op| op.op_type != OperationType::NoChange)
            .map(|op| {
                let id = node_id(op.resource_kind, &op.resource_name);
                let stage = stages.get(&id).copied().unwrap_or(0);
                let priority = priority_for(&op);
                let dependencies = graph.dependencies_of(&id).to_vec();
                let mut planned = PlannedOperation::new(generate_operation_id(&op), op);
                planned.stage = stage;
                planned.priority = priority;
                planned.dependencies = dependencies;
                planned
            })
            .collect();

        planned.sort_by(|a, b| a.stage.cmp(&b.stage).then(b.priority.cmp(&a.priority)));

        let summary = summarize(&planned);
        let require_approval =
            self.config.plan_config.require_approval || summary.highest_risk > self.config.plan_config.auto_approve_risk_threshold;

        Plan {
            id: generate_plan_id(),
            project_id: project_id.into(),
            created_at: now(),
            config: self.config.plan_config.clone(),
            operations: planned,
            summary,
            approval: ApprovalInfo {
                required: require_approval,
                approved: !require_approval,
                approved_at: None,
                approved_by: None,
            },
            status: PlanStatus::Draft,
        }
    }
}

/// Approving the plan (e.g. after an operator reviews it via an external
/// surface). No-op if it's already approved.
pub fn approve(plan: &mut Plan, approved_by: impl Into<String>) {
    plan.approval.approved = true;
    plan.approval.approved_at = Some(now());
    plan.approval.approved_by = Some(approved_by.into());
    if plan.status == PlanStatus::Draft {
        plan.status = PlanStatus::Approved;
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

/// Higher-priority operations run first within a stage (§4.5): a
/// resource-kind weight (higher-level resources go first), an
/// operation-kind weight (creates before updates before deletes, so a
/// replacement isn't torn down before its successor exists), and a risk
/// weight (safer operations before destructive ones, so a partial failure
/// leaves as much already-consistent state as possible).
fn priority_for(op: &Operation) -> i32 {
    let kind_weight = match op.resource_kind {
        ResourceKind::Project => 100,
        ResourceKind::Cluster => 80,
        ResourceKind::DatabaseRole => 70,
        ResourceKind::NetworkAccess => 60,
        ResourceKind::DatabaseUser | ResourceKind::SearchIndex | ResourceKind::VpcEndpoint => 40,
    };
    let op_weight = match op.op_type {
        OperationType::Create => 10,
        OperationType::Update => 5,
        OperationType::Delete => -10,
        OperationType::NoChange => 0,
    };
    let risk_weight = match op.impact.risk_level {
        RiskLevel::Low => 5,
        RiskLevel::Medium => 0,
        RiskLevel::High => -10,
        RiskLevel::Critical => -20,
    };
    kind_weight + op_weight + risk_weight
}

fn summarize(operations: &[PlannedOperation]) -> PlanSummary {
    let mut summary = PlanSummary {
        create_count: 0,
        update_count: 0,
        delete_count: 0,
        no_change_count: 0,
        total_estimated_duration: Duration::from_secs(0),
        highest_risk: RiskLevel::Low,
    };
    for op in operations {
        match op.op_type {
            OperationType::Create => summary.create_count += 1,
            OperationType::Update => summary.update_count += 1,
            OperationType::Delete => summary.delete_count += 1,
            OperationType::NoChange => summary.no_change_count += 1,
        }
        summary.total_estimated_duration += op.impact.estimated_duration;
        if op.impact.risk_level > summary.highest_risk {
            summary.highest_risk = op.impact.risk_level;
        }
    }
    summary
}

/// A plan id unique enough for a single discovery/plan/execute cycle:
/// a timestamp plus a short random suffix, not a UUID, since plans are
/// short-lived and never persisted across process restarts.
fn generate_plan_id() -> String {
    format!("plan-{}-{}", Utc::now().timestamp_millis(), random_suffix())
}

fn generate_operation_id(op: &Operation) -> String {
    format!("op-{}-{}", node_id(op.resource_kind, &op.resource_name), random_suffix())
}

fn random_suffix() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{DependencyGraph, Impact, ResourceKind};

    fn make_op(kind: ResourceKind, name: &str, op_type: OperationType, risk: RiskLevel) -> Operation {
        Operation {
            op_type,
            resource_kind: kind,
            resource_name: name.to_string(),
            desired: None,
            current: None,
            field_changes: vec![],
            impact: Impact {
                risk_level: risk,
                ..Impact::low(Duration::from_secs(1))
            },
        }
    }

    #[test]
    fn no_change_operations_are_dropped_from_the_plan() {
        let planner = Planner::new(PlannerConfig::default());
        let ops = vec![make_op(
            ResourceKind::Cluster,
            "prod",
            OperationType::NoChange,
            RiskLevel::Low,
        )];
        let plan = planner.build_plan("proj-1", ops, &DependencyGraph::new());
        assert!(plan.operations.is_empty());
    }

    #[test]
    fn high_risk_plans_require_approval() {
        let planner = Planner::new(PlannerConfig::default());
        let ops = vec![make_op(
            ResourceKind::Cluster,
            "prod",
            OperationType::Delete,
            RiskLevel::Critical,
        )];
        let plan = planner.build_plan("proj-1", ops, &DependencyGraph::new());
        assert!(plan.approval.required);
        assert!(!plan.approval.approved);
    }

    #[test]
    fn deletes_sort_after_creates_within_a_stage() {
        let planner = Planner::new(PlannerConfig::default());
        let ops = vec![
            make_op(ResourceKind::Cluster, "a", OperationType::Delete, RiskLevel::Low),
            make_op(ResourceKind::Cluster, "b", OperationType::Create, RiskLevel::Low),
        ];
        let plan = planner.build_plan("proj-1", ops, &DependencyGraph::new());
        assert_eq!(plan.operations[0].op_type, OperationType::Create);
        assert_eq!(plan.operations[1].op_type, OperationType::Delete);
    }

    #[test]
    fn plan_ids_are_unique_across_calls() {
        let planner = Planner::new(PlannerConfig::default());
        let plan_a = planner.build_plan("proj-1", vec![], &DependencyGraph::new());
        let plan_b = planner.build_plan("proj-1", vec![], &DependencyGraph::new());
        assert_ne!(plan_a.id, plan_b.id);
    }
}
