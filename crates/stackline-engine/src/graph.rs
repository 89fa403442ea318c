use std::collections::{BTreeSet, HashMap};
use std::fs;

use stackline_domain::Manifest;
use tracing::debug;

use crate::error::GraphError;
use crate::template::scan_dependencies;
use crate::values::ValueContext;

/// Stable index of a vertex in a [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

#[derive(Debug, Clone)]
struct Vertex {
    name: String,
    consumers: Vec<VertexId>,
}

/// Stacks and "must deploy before" edges, from producer to consumer.
///
/// Vertices live in an arena and are looked up by name, so discovering the
/// same stack twice always yields the same [`VertexId`].
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    vertices: Vec<Vertex>,
    index: HashMap<String, VertexId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphOrder {
    pub is_cyclic: bool,
    /// Topological order; partial when the graph is cyclic.
    pub order: Vec<String>,
    /// Vertices that could not be ordered, in discovery order.
    pub unresolved: Vec<String>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the vertex for `name`, inserting it if it is new.
    pub fn add_vertex(&mut self, name: &str) -> VertexId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            name: name.to_string(),
            consumers: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Record that `producer` must be visited before `consumer`.
    ///
    /// Returns `false` when the edge already existed.
    pub fn add_edge(&mut self, producer: &str, consumer: &str) -> bool {
        let producer = self.add_vertex(producer);
        let consumer = self.add_vertex(consumer);
        let consumers = &mut self.vertices[producer.0].consumers;
        if consumers.contains(&consumer) {
            return false;
        }
        consumers.push(consumer);
        true
    }

    #[must_use]
    pub fn id(&self, name: &str) -> Option<VertexId> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn name(&self, id: VertexId) -> Option<&str> {
        self.vertices.get(id.0).map(|vertex| vertex.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.vertices.iter().map(|vertex| vertex.consumers.len()).sum()
    }

    /// Kahn's algorithm. Ready vertices are taken in discovery order.
    #[must_use]
    pub fn order(&self) -> GraphOrder {
        let mut indegree = vec![0_usize; self.vertices.len()];
        for vertex in &self.vertices {
            for consumer in &vertex.consumers {
                indegree[consumer.0] += 1;
            }
        }

        let mut ready: BTreeSet<VertexId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| VertexId(index))
            .collect();

        let mut order = Vec::with_capacity(self.vertices.len());
        while let Some(next) = ready.pop_first() {
            let vertex = &self.vertices[next.0];
            order.push(vertex.name.clone());

            for consumer in &vertex.consumers {
                let entry = &mut indegree[consumer.0];
                *entry -= 1;
                if *entry == 0 {
                    ready.insert(*consumer);
                }
            }
        }

        let unresolved: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(index, _)| self.vertices[index].name.clone())
            .collect();

        GraphOrder {
            is_cyclic: !unresolved.is_empty(),
            order,
            unresolved,
        }
    }
}

/// Scan every declared stack's parameter fragment and connect it to the
/// stacks it reads outputs from.
///
/// Declared stacks are inserted first, in manifest order. Producers that are
/// not declared become foreign vertices.
///
/// # Errors
///
/// Returns an error when a fragment cannot be read or scanned.
pub fn build_dependency_graph(
    manifest: &Manifest,
    context: &ValueContext,
) -> Result<DependencyGraph, GraphError> {
    let mut graph = DependencyGraph::new();
    for stack in &manifest.stacks {
        graph.add_vertex(stack.name.as_str());
    }

    for stack in &manifest.stacks {
        let Some(path) = manifest.parameter_path(stack) else {
            continue;
        };
        let fragment = fs::read_to_string(&path).map_err(|source| GraphError::ReadFragment {
            stack: stack.name.to_string(),
            path: path.clone(),
            source,
        })?;
        if fragment.trim().is_empty() {
            continue;
        }

        let producers =
            scan_dependencies(&fragment, context).map_err(|source| GraphError::Scan {
                stack: stack.name.to_string(),
                source,
            })?;
        debug!(stack = %stack.name, ?producers, "scanned stack dependencies");
        for producer in producers {
            graph.add_edge(&producer, stack.name.as_str());
        }
    }

    Ok(graph)
}

/// Deployment order over the whole manifest.
///
/// # Errors
///
/// Returns an error when scanning fails or the stacks depend on each other
/// cyclically.
pub fn deployment_order(
    manifest: &Manifest,
    context: &ValueContext,
) -> Result<Vec<String>, GraphError> {
    let graph = build_dependency_graph(manifest, context)?;
    let ordered = graph.order();
    if ordered.is_cyclic {
        return Err(GraphError::CycleDetected {
            cycle: ordered.unresolved.join(", "),
        });
    }
    Ok(ordered.order)
}
