//! The dependency resolver (§4.4): builds a [`DependencyGraph`] over a
//! resource set, rejects dangling references and cycles, and assigns each
//! operation a stage number via a topological (Kahn's-algorithm) sort so the
//! executor can run stages serially and operations within a stage in
//! parallel.

use std::collections::{HashMap, VecDeque};

use reconciler_common::errors::{CircularDependency, InvalidDependency};
use reconciler_common::graph::node_id;
use reconciler_common::{AnyResource, DependencyGraph, ReconcileError, ResourceKind, ResourceNode};

/// Kinds a given kind implicitly depends on, independent of any explicit
/// `dependsOn` the user wrote. A `DatabaseUser`/`NetworkAccess`/etc. is
/// meaningless without the cluster (or project) it targets.
fn implicit_dependency_kinds(kind: ResourceKind) -> &'static [ResourceKind] {
    match kind {
        ResourceKind::Project => &[],
        ResourceKind::Cluster => &[ResourceKind::Project],
        ResourceKind::DatabaseRole => &[ResourceKind::Project],
        ResourceKind::DatabaseUser => &[ResourceKind::Cluster, ResourceKind::DatabaseRole],
        ResourceKind::NetworkAccess => &[ResourceKind::Project, ResourceKind::Cluster],
        ResourceKind::SearchIndex => &[ResourceKind::Cluster],
        ResourceKind::VpcEndpoint => &[ResourceKind::Project],
    }
}

pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Builds the dependency graph for `resources`. Explicit `dependsOn`
    /// entries are matched by resource name against any kind; implicit
    /// dependencies additionally wire every resource to same-named/kind
    /// anchors it structurally requires (e.g. every `Cluster` depends on
    /// `Project`, if one is present in the set).
    pub fn build_graph(&self, resources: &[AnyResource]) -> Result<DependencyGraph, ReconcileError> {
        let mut graph = DependencyGraph::new();
        let mut ids_by_name: HashMap<&str, Vec<String>> = HashMap::new();
        let mut ids_by_kind: HashMap<ResourceKind, Vec<String>> = HashMap::new();

        for resource in resources {
            let node = ResourceNode::from_resource(resource);
            ids_by_name
                .entry(resource.name())
                .or_insert_with(Vec::new)
                .push(node.id.clone());
            ids_by_kind
                .entry(resource.kind())
                .or_insert_with(Vec::new)
                .push(node.id.clone());
            graph.add_node(node);
        }

        for resource in resources {
            let id = node_id(resource.kind(), &resource.identity());

            for dep_name in &resource.metadata().depends_on {
                let targets = ids_by_name.get(dep_name.as_str());
                match targets {
                    Some(targets) if !targets.is_empty() => {
                        for target in targets {
                            graph.add_edge(&id, target);
                        }
                    }
                    _ => {
                        return InvalidDependency {
                            resource: id,
                            missing_target: dep_name.clone(),
                        }
                        .fail();
                    }
                }
            }

            for implicit_kind in implicit_dependency_kinds(resource.kind()) {
                if let Some(targets) = ids_by_kind.get(implicit_kind) {
                    for target in targets {
                        if target != &id {
                            graph.add_edge(&id, target);
                        }
                    }
                }
            }
        }

        self.check_for_cycles(&graph)?;
        Ok(graph)
    }

    fn check_for_cycles(&self, graph: &DependencyGraph) -> Result<(), ReconcileError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: HashMap<&String, Mark> = HashMap::new();

        for start in graph.node_ids() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack = Vec::new();
            visit(graph, start, &mut marks, &mut stack)?;
        }
        return Ok(());

        fn visit<'a>(
            graph: &'a DependencyGraph,
            id: &'a String,
            marks: &mut HashMap<&'a String, Mark>,
            stack: &mut Vec<&'a String>,
        ) -> Result<(), ReconcileError> {
            if let Some(pos) = stack.iter().position(|n| *n == id) {
                let mut path: Vec<String> = stack[pos..].iter().map(|s| (*s).clone()).collect();
                path.push(id.clone());
                return CircularDependency { path }.fail();
            }
            if marks.get(id) == Some(&Mark::Done) {
                return Ok(());
            }

            stack.push(id);
            for dep in graph.dependencies_of(id) {
                visit(graph, dep, marks, stack)?;
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Assigns a stage number to every resource id: the length of the longest
/// dependency chain below it. Stage 0 has no dependencies; stage N can only
/// run once every stage < N has completed (§4.4, §4.6).
pub fn assign_stages(graph: &DependencyGraph) -> HashMap<String, u32> {
    let mut stages: HashMap<String, u32> = HashMap::new();
    let mut in_degree: HashMap<&String, usize> = HashMap::new();
    let mut dependents: HashMap<&String, Vec<&String>> = HashMap::new();

    for id in graph.node_ids() {
        in_degree.entry(id).or_insert(0);
    }
    for id in graph.node_ids() {
        for dep in graph.dependencies_of(id) {
            *in_degree.entry(id).or_insert(0) += 1;
            dependents.entry(dep).or_insert_with(Vec::new).push(id);
        }
    }

    let mut queue: VecDeque<&String> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    for id in &queue {
        stages.insert((*id).clone(), 0);
    }

    let mut remaining_in_degree: HashMap<&String, usize> = in_degree.clone();
    while let Some(id) = queue.pop_front() {
        let stage = stages[id];
        if let Some(children) = dependents.get(id) {
            for child in children {
                let entry = remaining_in_degree.entry(child).or_insert(0);
                *entry = entry.saturating_sub(1);
                let candidate_stage = stage + 1;
                let current = stages.get(*child).copied().unwrap_or(0);
                stages.insert((*child).clone(), candidate_stage.max(current));
                if *entry == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_common::{ClusterSpec, DatabaseUserSpec, Metadata, Resource};

    fn cluster(name: &str) -> AnyResource {
        AnyResource::Cluster(Resource::new(name, ClusterSpec::default()))
    }

    fn user(name: &str, depends_on: Vec<String>) -> AnyResource {
        let mut resource = Resource::new(
            name,
            DatabaseUserSpec {
                auth_database: "admin".into(),
                username: name.into(),
                password: None,
                roles: vec![],
                scopes: vec![],
            },
        );
        resource.metadata = Metadata {
            name: name.to_string(),
            labels: None,
            annotations: None,
            depends_on,
        };
        AnyResource::DatabaseUser(resource)
    }

    #[test]
    fn user_implicitly_depends_on_cluster() {
        let resources = vec![cluster("prod"), user("alice", vec![])];
        let resolver = DependencyResolver::new();
        let graph = resolver.build_graph(&resources).unwrap();
        let stages = assign_stages(&graph);
        let cluster_id = node_id(ResourceKind::Cluster, "prod");
        let user_id = node_id(ResourceKind::DatabaseUser, "admin/alice");
        assert!(stages[&user_id] > stages[&cluster_id]);
    }

    #[test]
    fn dangling_explicit_dependency_is_rejected() {
        let resources = vec![user("alice", vec!["missing-cluster".to_string()])];
        let resolver = DependencyResolver::new();
        assert!(resolver.build_graph(&resources).is_err());
    }
}
