//! `PlannedOperation` and `Plan` (§3): an `Operation` lifted onto the
//! dependency DAG, staged, prioritized, and carrying execution-tracking
//! fields the executor mutates in place.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::{duration_nanos, Operation, RiskLevel};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Skipped
        )
    }
}

/// An `Operation` plus everything the planner and executor need to schedule
/// and track it. `Deref`s to the underlying `Operation` so callers can read
/// `planned.resource_kind` directly, the same ergonomic the teacher's
/// gRPC clients use for their inner transport handle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOperation {
    pub id: String,
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub priority: i32,
    pub stage: u32,
    pub status: OperationStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Deref for PlannedOperation {
    type Target = Operation;
    fn deref(&self) -> &Self::Target {
        &self.operation
    }
}

impl DerefMut for PlannedOperation {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.operation
    }
}

impl PlannedOperation {
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            operation,
            dependencies: Vec::new(),
            priority: 0,
            stage: 0,
            status: OperationStatus::Pending,
            retry_count: 0,
            batch_id: None,
            batch_size: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlanStatus {
    Draft,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

/// Knobs that shaped this plan: not file/env configuration (that's a
/// collaborator's job), just the typed policy the diff/planner used.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfig {
    pub ignore_order_in_slices: bool,
    pub compare_timestamps: bool,
    pub ignore_defaults: bool,
    pub preserve_existing: bool,
    pub require_approval: bool,
    pub auto_approve_risk_threshold: RiskLevel,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            ignore_order_in_slices: true,
            compare_timestamps: false,
            ignore_defaults: true,
            preserve_existing: false,
            require_approval: true,
            auto_approve_risk_threshold: RiskLevel::Medium,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub create_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    pub no_change_count: usize,
    #[serde(with = "duration_nanos")]
    pub total_estimated_duration: Duration,
    pub highest_risk: RiskLevel,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalInfo {
    pub required: bool,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

/// The reconciliation plan: a diff lifted to scheduled, staged, tracked
/// operations. Immutable structurally once `Approved`, except for the
/// per-operation tracking fields the executor owns one-at-a-time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub config: PlanConfig,
    pub operations: Vec<PlannedOperation>,
    pub summary: PlanSummary,
    pub approval: ApprovalInfo,
    pub status: PlanStatus,
}

impl Plan {
    /// A hand-written structural copy, used by the optimizer and the
    /// dry-run simulator so neither mutates the caller's plan (§9's open
    /// question). Every field here is owned data, so this is equivalent to
    /// `Clone::clone`, but the explicit name documents the intent at call
    /// sites that must not alias.
    pub fn deep_clone(&self) -> Self {
        Plan {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            created_at: self.created_at,
            config: self.config.clone(),
            operations: self.operations.clone(),
            summary: self.summary.clone(),
            approval: self.approval.clone(),
            status: self.status,
        }
    }

    pub fn max_stage(&self) -> u32 {
        self.operations.iter().map(|op| op.stage).max().unwrap_or(0)
    }

    pub fn operations_in_stage(&self, stage: u32) -> Vec<&PlannedOperation> {
        self.operations.iter().filter(|op| op.stage == stage).collect()
    }

    pub fn operation_mut(&mut self, id: &str) -> Option<&mut PlannedOperation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }
}
