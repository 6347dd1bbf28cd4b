//! Dependency graph and staged plan construction
//!
//! Stages come from Kahn's algorithm: a document's stage is the length of the
//! longest dependency chain below it, so every dependency sits in a strictly
//! earlier stage. Within a stage documents keep their declaration order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::resolve::{ReferenceResolver, Resolution};
use crate::resource::{ResourceDocument, ResourceId, ResourceRef};

/// A document together with its resolved edges
#[derive(Debug, Clone)]
pub struct PlannedResource {
    pub document: ResourceDocument,
    /// Plan documents that must succeed first
    pub dependencies: Vec<ResourceId>,
    /// References to verify in the cluster at submission time
    pub deferred: Vec<ResourceRef>,
}

impl PlannedResource {
    pub fn id(&self) -> ResourceId {
        self.document.id()
    }
}

/// A set of documents with no dependencies among themselves
#[derive(Debug, Clone)]
pub struct Stage {
    pub index: usize,
    pub resources: Vec<PlannedResource>,
}

/// Documents grouped into ordered stages
///
/// Immutable once built. Stage `n` only depends on stages `0..n`.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningPlan {
    stages: Vec<Stage>,
}

impl ProvisioningPlan {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every planned resource, stage by stage
    pub fn resources(&self) -> impl Iterator<Item = &PlannedResource> {
        self.stages.iter().flat_map(|s| s.resources.iter())
    }

    pub fn total_resources(&self) -> usize {
        self.stages.iter().map(|s| s.resources.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&PlannedResource> {
        self.resources().find(|r| r.document.id() == *id)
    }

    /// Stage index a document was placed in
    pub fn stage_of(&self, id: &ResourceId) -> Option<usize> {
        self.stages
            .iter()
            .find(|s| s.resources.iter().any(|r| r.document.id() == *id))
            .map(|s| s.index)
    }

    /// Documents that depend on `id`, directly or not, in plan order
    pub fn transitive_dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        let mut affected: HashSet<ResourceId> = HashSet::from([id.clone()]);
        let mut dependents = Vec::new();
        // plan order guarantees dependencies are visited before dependents
        for resource in self.resources() {
            if resource.dependencies.iter().any(|d| affected.contains(d)) {
                let rid = resource.id();
                affected.insert(rid.clone());
                dependents.push(rid);
            }
        }
        dependents
    }
}

/// Documents and the edges between them
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<PlannedResource>,
    index: HashMap<ResourceId, usize>,
}

impl DependencyGraph {
    /// Build the graph, resolving local references into edges
    ///
    /// Besides explicit references, every document depends on the documents
    /// of its kind's prerequisites present in the same set.
    pub fn build(documents: Vec<ResourceDocument>) -> Result<Self> {
        let mut index = HashMap::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            if index.insert(doc.id(), i).is_some() {
                return Err(Error::DuplicateResource { id: doc.id() });
            }
        }

        let resolver = ReferenceResolver::new(&documents);
        let mut edges = Vec::with_capacity(documents.len());
        for doc in &documents {
            let mut dependencies: Vec<ResourceId> = documents
                .iter()
                .filter(|other| doc.kind().prerequisites().contains(&other.kind()))
                .map(ResourceDocument::id)
                .collect();
            let mut deferred = Vec::new();

            for resolution in resolver.resolve_all(doc) {
                match resolution {
                    Resolution::Local(id) => {
                        if !dependencies.contains(&id) {
                            dependencies.push(id);
                        }
                    }
                    Resolution::Deferred(r) => {
                        if !deferred.contains(&r) {
                            deferred.push(r);
                        }
                    }
                }
            }
            log::trace!(
                "{}: {} local dependencies, {} deferred references",
                doc.id(),
                dependencies.len(),
                deferred.len()
            );
            edges.push((dependencies, deferred));
        }

        let nodes = documents
            .into_iter()
            .zip(edges)
            .map(|(document, (dependencies, deferred))| PlannedResource {
                document,
                dependencies,
                deferred,
            })
            .collect();

        Ok(Self { nodes, index })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Order the graph into stages
    pub fn plan(self) -> Result<ProvisioningPlan> {
        let n = self.nodes.len();
        let deps: Vec<Vec<usize>> = self
            .nodes
            .iter()
            .map(|node| node.dependencies.iter().map(|id| self.index[id]).collect())
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut pending: Vec<usize> = vec![0; n];
        for (i, node_deps) in deps.iter().enumerate() {
            pending[i] = node_deps.len();
            for &d in node_deps {
                dependents[d].push(i);
            }
        }

        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
        let mut processed = 0;

        while let Some(i) = queue.pop_front() {
            processed += 1;
            for &dependent in &dependents[i] {
                depth[dependent] = depth[dependent].max(depth[i] + 1);
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if processed < n {
            let members = find_cycle(&deps, &pending)
                .into_iter()
                .map(|i| self.nodes[i].id())
                .collect();
            return Err(Error::CyclicDependency { members });
        }

        let stage_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut stages: Vec<Stage> = (0..stage_count)
            .map(|index| Stage {
                index,
                resources: Vec::new(),
            })
            .collect();
        // nodes are in declaration order, so each stage keeps it
        for (node, d) in self.nodes.into_iter().zip(depth) {
            stages[d].resources.push(node);
        }

        Ok(ProvisioningPlan { stages })
    }
}

/// Walk dependency edges among unprocessed nodes until one repeats
///
/// Every node Kahn's algorithm left behind still waits on another such node,
/// so the walk always closes a loop.
fn find_cycle(deps: &[Vec<usize>], pending: &[usize]) -> Vec<usize> {
    let stuck = |i: usize| pending[i] > 0;
    let Some(start) = (0..deps.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&d| stuck(d)) else {
            return path;
        };
        if let Some(&at) = position.get(&next) {
            return path.split_off(at);
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

/// Build and order a set of documents in one step
pub fn plan(documents: Vec<ResourceDocument>) -> Result<ProvisioningPlan> {
    DependencyGraph::build(documents)?.plan()
}
