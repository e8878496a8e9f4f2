//! The remote control-plane client contract consumed by the reconciler
//! (§6). This crate defines the contract only; a real implementation
//! (HTTP/gRPC against the actual control plane) lives outside this
//! workspace. [`mock::MockClient`] is the in-memory stand-in used by this
//! workspace's own tests.

pub mod mock;
pub mod traits;

pub use mock::MockClient;
pub use traits::{
    ClusterOperations, ControlPlaneClient, DatabaseRoleOperations, DatabaseUserOperations,
    NetworkAccessOperations, ProjectOperations, SearchIndexOperations, VpcEndpointOperations,
};
