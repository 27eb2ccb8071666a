// Dependency graph of a workflow's children

use crate::errors::ValidationError;
use crate::models::WorkflowSpec;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

/// Children of a workflow with their intra-workflow dependencies.
/// Node indices follow declaration order; an edge `a -> b` means `b` waits for `a`.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Uuid, ()>,
    task_index: HashMap<Uuid, NodeIndex>,
}

impl WorkflowGraph {
    /// Build and validate the graph: no duplicate children, dependencies
    /// must name siblings, and the edges must be acyclic.
    pub fn build(spec: &WorkflowSpec) -> Result<Self, ValidationError> {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();

        for link in &spec.children {
            if task_index.contains_key(&link.task_id) {
                return Err(ValidationError::invalid(
                    "workflow.children",
                    format!("task {} is listed more than once", link.task_id),
                ));
            }
            task_index.insert(link.task_id, graph.add_node(link.task_id));
        }

        for link in &spec.children {
            let to = task_index[&link.task_id];
            for dep in &link.depends_on {
                if *dep == link.task_id {
                    return Err(ValidationError::CyclicWorkflow(format!(
                        "task {} depends on itself",
                        dep
                    )));
                }
                let from = task_index.get(dep).ok_or_else(|| {
                    ValidationError::invalid(
                        "workflow.children.depends_on",
                        format!("task {} depends on {}, which is not a child of this workflow", link.task_id, dep),
                    )
                })?;
                graph.update_edge(*from, to, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            ValidationError::CyclicWorkflow(format!(
                "dependency cycle involving task {}",
                graph[cycle.node_id()]
            ))
        })?;

        Ok(Self { graph, task_index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct dependencies of a child, in declaration order
    pub fn dependencies(&self, task_id: Uuid) -> Vec<Uuid> {
        let Some(idx) = self.task_index.get(&task_id) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*idx, Direction::Incoming)
            .collect();
        deps.sort_unstable();
        deps.into_iter().map(|dep| self.graph[dep]).collect()
    }

    /// Topological order; among ready children the earliest declared goes first
    pub fn order(&self) -> Vec<Uuid> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.graph[idx]);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }
}
