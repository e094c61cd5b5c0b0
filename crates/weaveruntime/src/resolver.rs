use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use weavecore::{StepId, WorkflowDefinition, WorkflowError};

/// Dependency graph over the top-level steps of one definition.
///
/// Edges point from a dependency to the step that depends on it. Node weights
/// are indices into `definition.steps`.
pub struct DependencyGraph<'a> {
    definition: &'a WorkflowDefinition,
    graph: DiGraph<usize, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph, rejecting dependencies on steps that do not exist
    pub fn build(definition: &'a WorkflowDefinition) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for (position, step) in definition.steps.iter().enumerate() {
            let idx = graph.add_node(position);
            index.insert(step.id.as_str(), idx);
        }

        for step in &definition.steps {
            let to = index[step.id.as_str()];
            for dep in &step.depends_on {
                let from = index.get(dep.as_str()).ok_or_else(|| WorkflowError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        Ok(Self {
            definition,
            graph,
            index,
        })
    }

    fn step_id(&self, idx: NodeIndex) -> &'a str {
        &self.definition.steps[self.graph[idx]].id
    }

    /// Depth-first search keeping the current path. Returns the first cycle
    /// found, as a path that starts and ends on the same step.
    pub fn find_cycle(&self) -> Option<Vec<StepId>> {
        let mut visited = HashSet::new();

        for step in &self.definition.steps {
            let start = self.index[step.id.as_str()];
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut visited) {
                return Some(
                    cycle
                        .into_iter()
                        .map(|idx| self.step_id(idx).to_string())
                        .collect(),
                );
            }
        }
        None
    }

    /// Iterative so that long dependency chains cannot exhaust the call stack
    fn visit(&self, root: NodeIndex, visited: &mut HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
        let mut path = vec![root];
        let mut on_path = HashSet::from([root]);
        let mut frames = vec![self.graph.neighbors_directed(root, Direction::Outgoing)];
        visited.insert(root);

        loop {
            let next = match frames.last_mut() {
                Some(neighbors) => neighbors.next(),
                None => return None,
            };

            match next {
                Some(next) if on_path.contains(&next) => {
                    let pos = path.iter().position(|n| *n == next)?;
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Some(next) if !visited.contains(&next) => {
                    visited.insert(next);
                    path.push(next);
                    on_path.insert(next);
                    frames.push(self.graph.neighbors_directed(next, Direction::Outgoing));
                }
                Some(_) => {}
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(&done);
                    }
                }
            }
        }
    }

    pub fn validate_acyclic(&self) -> Result<(), WorkflowError> {
        match self.find_cycle() {
            Some(path) => Err(WorkflowError::Cycle { path }),
            None => Ok(()),
        }
    }

    /// Positions (into `definition.steps`) of pending steps whose dependencies
    /// are all satisfied, in definition order
    pub fn ready_set(&self, pending: &[usize], satisfied: &HashSet<StepId>) -> Vec<usize> {
        pending
            .iter()
            .copied()
            .filter(|&position| {
                self.definition.steps[position]
                    .depends_on
                    .iter()
                    .all(|dep| satisfied.contains(dep))
            })
            .collect()
    }

    /// Every step that depends on `step_id`, directly or transitively
    pub fn dependents_of(&self, step_id: &str) -> HashSet<StepId> {
        let mut found = HashSet::new();
        let Some(&start) = self.index.get(step_id) else {
            return found;
        };

        let mut frontier = vec![start];
        while let Some(node) = frontier.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if found.insert(self.step_id(next).to_string()) {
                    frontier.push(next);
                }
            }
        }
        found
    }
}

/// Check a definition for dependency cycles
pub fn validate_acyclic(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    DependencyGraph::build(definition)?.validate_acyclic()
}

/// Ids of not-yet-executed steps whose dependencies are all in `executed`
pub fn ready_set(
    definition: &WorkflowDefinition,
    executed: &HashSet<StepId>,
) -> Result<Vec<StepId>, WorkflowError> {
    let graph = DependencyGraph::build(definition)?;
    let pending: Vec<usize> = definition
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| !executed.contains(&step.id))
        .map(|(position, _)| position)
        .collect();

    Ok(graph
        .ready_set(&pending, executed)
        .into_iter()
        .map(|position| definition.steps[position].id.clone())
        .collect())
}
