//! The dependency graph primitive shared by the resolver (§4.4) and the
//! planner's staging pass. This module only holds the data shape; cycle
//! detection and topological ordering are algorithms the `reconciler` crate
//! builds on top of it, since they need error types this crate's callers
//! don't all need to depend on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resource::{AnyResource, ResourceKind};

/// One node in the dependency graph: a resource's identity plus enough to
/// label it without re-walking `AnyResource`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceNode {
    pub fn from_resource(resource: &AnyResource) -> Self {
        Self {
            id: node_id(resource.kind(), &resource.identity()),
            kind: resource.kind(),
            name: resource.name().to_string(),
        }
    }
}

/// Builds the canonical node id used as a graph key: `kind/identity`, e.g.
/// `DatabaseUser/admin/alice`. Stable and independent of insertion order, so
/// two builds of the same resource set produce identical ids.
pub fn node_id(kind: ResourceKind, identity: &str) -> String {
    format!("{}/{}", kind, identity)
}

/// A directed graph of resource dependencies: edges point from a resource to
/// the resources it depends on (must be created/updated first).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DependencyGraph {
    pub nodes: HashMap<String, ResourceNode>,
    pub edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ResourceNode) {
        self.edges.entry(node.id.clone()).or_insert_with(Vec::new);
        self.nodes.insert(node.id.clone(), node);
    }

    /// Records that `from` depends on `to`. Both ids are expected to already
    /// be nodes; the resolver is responsible for surfacing a dangling
    /// reference as `ReconcileError::InvalidDependency` before this is
    /// called with an unknown target.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_insert_with(Vec::new)
            .push(to.to_string());
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_stable_for_same_kind_and_identity() {
        let a = node_id(ResourceKind::Cluster, "prod-cluster");
        let b = node_id(ResourceKind::Cluster, "prod-cluster");
        assert_eq!(a, b);
        assert_eq!(a, "Cluster/prod-cluster");
    }

    #[test]
    fn add_node_initializes_empty_edge_list() {
        let mut graph = DependencyGraph::new();
        graph.add_node(ResourceNode {
            id: "Cluster/prod".to_string(),
            kind: ResourceKind::Cluster,
            name: "prod".to_string(),
        });
        assert!(graph.dependencies_of("Cluster/prod").is_empty());
        assert!(graph.contains("Cluster/prod"));
    }

    #[test]
    fn add_edge_records_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_node(ResourceNode {
            id: "DatabaseUser/admin/alice".to_string(),
            kind: ResourceKind::DatabaseUser,
            name: "alice".to_string(),
        });
        graph.add_node(ResourceNode {
            id: "Cluster/prod".to_string(),
            kind: ResourceKind::Cluster,
            name: "prod".to_string(),
        });
        graph.add_edge("DatabaseUser/admin/alice", "Cluster/prod");
        assert_eq!(
            graph.dependencies_of("DatabaseUser/admin/alice"),
            &["Cluster/prod".to_string()]
        );
    }
}
