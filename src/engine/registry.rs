use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;

use crate::engine::{Completion, TaskContext};
use crate::error::{RegistryError, RunError};

/// Result returned by a task action.
pub type TaskResult = anyhow::Result<Completion>;

pub(crate) type Action = Arc<dyn Fn(&TaskContext<'_>) -> TaskResult + Send + Sync>;

/// Prerequisites of a task, resolved right before its own action runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Dependencies {
    #[default]
    None,
    /// Run one after another, stopping at the first failure.
    Sequence(Vec<String>),
    /// Run concurrently, every failure is reported.
    Parallel(Vec<String>),
}

impl Dependencies {
    pub fn sequence<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Dependencies::Sequence(names.into_iter().map(Into::into).collect())
    }

    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Dependencies::Parallel(names.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> &[String] {
        match self {
            Dependencies::None => &[],
            Dependencies::Sequence(names) | Dependencies::Parallel(names) => names,
        }
    }
}

/// A named unit of work.
pub struct Task {
    name: String,
    dependencies: Dependencies,
    pub(crate) action: Action,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Node of the dependency graph. A node without a task stands for a name
/// that was used as a dependency before being registered.
struct Node {
    name: String,
    task: Option<Task>,
}

/// Stores tasks by name together with the graph of their dependencies.
///
/// Edges point from a dependency to the task that depends on it. The graph
/// is kept acyclic: a registration that would close a cycle is rejected
/// before anything is mutated.
#[derive(Default)]
pub struct Registry {
    graph: Graph<Node, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        dependencies: Dependencies,
        action: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        let name = name.into();
        let existing = self.index.get(&name).copied();

        if let Some(node) = existing
            && self.graph[node].task.is_some()
        {
            return Err(RegistryError::Duplicate(name));
        }

        // Adding `dep -> name` closes a cycle iff `dep` is already reachable
        // from `name`, which includes `dep == name`.
        for dep in dependencies.names() {
            let closes_cycle = *dep == name
                || match (existing, self.index.get(dep)) {
                    (Some(node), Some(&dep_node)) => {
                        has_path_connecting(&self.graph, node, dep_node, None)
                    }
                    _ => false,
                };

            if closes_cycle {
                return Err(RegistryError::Cycle {
                    task: name,
                    dependency: dep.clone(),
                });
            }
        }

        let node = existing.unwrap_or_else(|| self.add_node(&name));
        for dep in dependencies.names() {
            let dep_node = match self.index.get(dep) {
                Some(&index) => index,
                None => self.add_node(dep),
            };
            self.graph.update_edge(dep_node, node, ());
        }

        tracing::debug!(task = %name, ?dependencies, "registered task");

        self.graph[node].task = Some(Task {
            name,
            dependencies,
            action: Arc::new(action),
        });

        Ok(())
    }

    fn add_node(&mut self, name: &str) -> NodeIndex {
        let index = self.graph.add_node(Node {
            name: name.to_string(),
            task: None,
        });
        self.index.insert(name.to_string(), index);
        index
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index
            .get(name)
            .and_then(|&index| self.graph[index].task.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all registered tasks, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self
            .graph
            .node_weights()
            .filter(|node| node.task.is_some())
            .map(|node| node.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Names used as dependencies that were never registered.
    pub fn unresolved(&self) -> Vec<&str> {
        let mut names: Vec<_> = self
            .graph
            .node_weights()
            .filter(|node| node.task.is_none())
            .map(|node| node.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Expand a request into the ordered list of actions a run will invoke,
    /// dependencies first. Members of a parallel group are listed in their
    /// declaration order, although they are started together.
    pub fn plan<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&str>, RunError> {
        let mut plan = Vec::new();
        for name in names {
            self.plan_into(name.as_ref(), &mut plan)?;
        }
        Ok(plan)
    }

    fn plan_into<'a>(&'a self, name: &str, plan: &mut Vec<&'a str>) -> Result<(), RunError> {
        let task = self
            .get(name)
            .ok_or_else(|| RunError::UnknownTask(name.to_string()))?;

        for dep in task.dependencies.names() {
            self.plan_into(dep, plan)?;
        }

        plan.push(task.name());
        Ok(())
    }
}
