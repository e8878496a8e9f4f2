//! Shared types for the reconciliation core: resource manifests, the
//! diff/plan/graph primitives and the error taxonomy every other crate in
//! this workspace builds on.

pub mod canonical;
pub mod errors;
pub mod graph;
pub mod operation;
pub mod plan;
pub mod resource;

pub use canonical::{canonical_json, fingerprint};
pub use errors::{ReconcileError, RemoteError, RemoteErrorKind};
pub use graph::{DependencyGraph, ResourceNode};
pub use operation::{ChangeType, FieldChange, Impact, Operation, OperationType, RiskLevel};
pub use plan::{
    ApprovalInfo, OperationStatus, Plan, PlanConfig, PlanStatus, PlanSummary, PlannedOperation,
};
pub use resource::{
    AnyResource, ClusterSpec, DatabaseRoleSpec, DatabaseUserSpec, Metadata, NetworkAccessSpec,
    ProjectSpec, ProjectState, ReplicationSpec, Resource, ResourceKind, SearchIndexSpec,
    VpcEndpointSpec,
};

/// Helper to convert from `Vec<F>` into `Vec<T>`, mirroring the blanket
/// conversion helper this workspace has used since it was a storage control
/// plane.
pub trait IntoVec<T>: Sized {
    /// Performs the conversion.
    fn into_vec(self) -> Vec<T>;
}

impl<F: Into<T>, T> IntoVec<T> for Vec<F> {
    fn into_vec(self) -> Vec<T> {
        self.into_iter().map(Into::into).collect()
    }
}
