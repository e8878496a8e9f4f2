//! The plan optimizer: groups same-kind, same-stage, same-type operations
//! into batches the executor can size its worker pool around, and reorders
//! operations within a stage for locality. Operates on a
//! [`Plan::deep_clone`] so the caller's original plan is never mutated.

use reconciler_common::{OperationType, Plan, ResourceKind};

const DEFAULT_MAX_BATCH_SIZE: usize = 20;

pub struct PlanOptimizer {
    max_batch_size: usize,
}

impl Default for PlanOptimizer {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl PlanOptimizer {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Returns an optimized copy of `plan`. The input is left untouched.
    pub fn optimize(&self, plan: &Plan) -> Plan {
        let mut optimized = plan.deep_clone();

        optimized
            .operations
            .sort_by(|a, b| a.stage.cmp(&b.stage).then(sort_key(a).cmp(&sort_key(b))));

        self.assign_batches(&mut optimized);
        optimized
    }

    fn assign_batches(&self, plan: &mut Plan) {
        let mut batch_index = 0usize;
        let mut i = 0usize;
        while i < plan.operations.len() {
            let stage = plan.operations[i].stage;
            let kind = plan.operations[i].resource_kind;
            let op_type = plan.operations[i].op_type;

            let mut j = i;
            while j < plan.operations.len()
                && plan.operations[j].stage == stage
                && plan.operations[j].resource_kind == kind
                && plan.operations[j].op_type == op_type
                && (j - i) < self.max_batch_size
            {
                j += 1;
            }

            if j - i > 1 {
                let batch_id = format!("batch-{}", batch_index);
                let batch_size = j - i;
                for op in &mut plan.operations[i..j] {
                    op.batch_id = Some(batch_id.clone());
                    op.batch_size = Some(batch_size);
                }
                batch_index += 1;
            }

            i = j;
        }
    }
}

fn sort_key(op: &reconciler_common::PlannedOperation) -> (i32, u8, String) {
    (op.priority, kind_order(op.resource_kind), op.resource_name.clone())
}

fn kind_order(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::Project => 0,
        ResourceKind::Cluster => 1,
        ResourceKind::DatabaseRole => 2,
        ResourceKind::DatabaseUser => 3,
        ResourceKind::NetworkAccess => 4,
        ResourceKind::SearchIndex => 5,
        ResourceKind::VpcEndpoint => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{
        ApprovalInfo, ClusterSpec, Impact, Operation, PlanConfig, PlanStatus, PlanSummary,
        PlannedOperation, Resource,
    };
    use std::time::Duration;

    fn cluster_op(name: &str, stage: u32) -> PlannedOperation {
        let op = Operation {
            op_type: OperationType::Create,
            resource_kind: ResourceKind::Cluster,
            resource_name: name.to_string(),
            desired: Some(reconciler_common::AnyResource::Cluster(Resource::new(
                name,
                ClusterSpec::default(),
            ))),
            current: None,
            field_changes: vec![],
            impact: Impact::low(Duration::from_secs(1)),
        };
        let mut planned = PlannedOperation::new(format!("op-{}", name), op);
        planned.stage = stage;
        planned
    }

    fn empty_plan(operations: Vec<PlannedOperation>) -> Plan {
        Plan {
            id: "plan-test".to_string(),
            project_id: "proj-1".to_string(),
            created_at: chrono::Utc::now(),
            config: PlanConfig::default(),
            operations,
            summary: PlanSummary::default(),
            approval: ApprovalInfo::default(),
            status: PlanStatus::Draft,
        }
    }

    #[test]
    fn same_stage_same_kind_creates_are_batched() {
        let optimizer = PlanOptimizer::default();
        let plan = empty_plan(vec![cluster_op("a", 0), cluster_op("b", 0), cluster_op("c", 0)]);
        let optimized = optimizer.optimize(&plan);
        assert!(optimized.operations.iter().all(|op| op.batch_size == Some(3)));
        let batch_id = optimized.operations[0].batch_id.clone();
        assert!(optimized.operations.iter().all(|op| op.batch_id == batch_id));
    }

    #[test]
    fn optimize_does_not_mutate_the_original_plan() {
        let optimizer = PlanOptimizer::default();
        let plan = empty_plan(vec![cluster_op("a", 0), cluster_op("b", 0)]);
        let _ = optimizer.optimize(&plan);
        assert!(plan.operations.iter().all(|op| op.batch_id.is_none()));
    }

    #[test]
    fn batches_respect_the_max_batch_size() {
        let optimizer = PlanOptimizer::new(2);
        let plan = empty_plan(vec![cluster_op("a", 0), cluster_op("b", 0), cluster_op("c", 0)]);
        let optimized = optimizer.optimize(&plan);
        assert_eq!(optimized.operations[0].batch_size, Some(2));
        assert_eq!(optimized.operations[2].batch_size, None);
    }
}
