//! The ordering of the build.
//!
//! A build is a sequence of [`Step`]s. Each step finishes before the next one
//! starts, the members of a [`Step::Parallel`] group have no ordering among
//! themselves. Before anything runs the sequence is turned into a `petgraph`
//! graph, one node per step member plus one for the clean step, with an edge
//! from every member of a step to every member of the next. The graph is
//! then checked for the properties the scheduler relies on:
//!
//! * no task is listed twice in one group,
//! * it is acyclic,
//! * the clean step precedes every build task,
//! * no build task depends on another build task.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ConfigurationError;
use crate::task::{Registry, TaskId};

/// One element of the build sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Empties the output root.
    Clean,
    Task(TaskId),
    /// Tasks that run concurrently. The step completes when all of them did.
    Parallel(Vec<TaskId>),
}

impl Step {
    fn members(&self) -> Vec<Node> {
        match self {
            Step::Clean => vec![Node::Clean],
            Step::Task(id) => vec![Node::Task(*id)],
            Step::Parallel(ids) => ids.iter().copied().map(Node::Task).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Clean,
    Task(TaskId),
}

/// A validated build sequence over a registry.
#[derive(Debug)]
pub struct TaskGraph {
    registry: Registry,
    steps: Vec<Step>,
}

impl TaskGraph {
    /// Validates `steps` against the registry.
    pub fn new(registry: Registry, steps: Vec<Step>) -> Result<Self, ConfigurationError> {
        let mut graph = DiGraph::<Node, ()>::new();
        let mut nodes = HashMap::new();
        let mut prev: Vec<NodeIndex> = Vec::new();

        for step in &steps {
            let mut curr = Vec::new();
            let mut seen = HashSet::new();

            for node in step.members() {
                if let Node::Task(id) = node {
                    let task = registry
                        .get(id)
                        .ok_or_else(|| ConfigurationError::UnknownTask(id.to_string()))?;

                    if !seen.insert(id) {
                        return Err(ConfigurationError::DuplicateMember(task.name().to_string()));
                    }
                }

                let index = *nodes.entry(node).or_insert_with(|| graph.add_node(node));

                for &from in &prev {
                    graph.update_edge(from, index, ());
                }

                curr.push(index);
            }

            prev = curr;
        }

        let name = |node: Node| match node {
            Node::Clean => "clean".to_string(),
            Node::Task(id) => registry
                .get(id)
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| id.to_string()),
        };

        // A task listed twice in sequence shows up as a cycle here.
        toposort(&graph, None)
            .map_err(|cycle| ConfigurationError::Cycle(name(graph[cycle.node_id()])))?;

        let clean = nodes.get(&Node::Clean).copied();

        for (id, _) in registry.iter() {
            let Some(&index) = nodes.get(&Node::Task(id)) else {
                continue;
            };

            let cleaned =
                clean.is_some_and(|clean| has_path_connecting(&graph, clean, index, None));
            if !cleaned {
                return Err(ConfigurationError::CleanOrder(name(Node::Task(id))));
            }

            for dep in graph.neighbors_directed(index, petgraph::Direction::Incoming) {
                if let Node::Task(other) = graph[dep] {
                    return Err(ConfigurationError::DependentTasks(
                        name(Node::Task(other)),
                        name(Node::Task(id)),
                    ));
                }
            }
        }

        Ok(Self { registry, steps })
    }

    /// The standard build: clean, then every registered task in one group.
    pub fn build(registry: Registry) -> Result<Self, ConfigurationError> {
        let steps = vec![Step::Clean, Step::Parallel(registry.ids())];
        Self::new(registry, steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
