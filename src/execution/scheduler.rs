//! Execution scheduler - the job instance graph and admission queue

use crate::core::{
    error::ConfigError,
    matrix::{MatrixExpander, MatrixValues},
    workflow::Workflow,
};
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Strategy for scheduling instance execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Run one instance at a time, in graph order
    Sequential,

    /// Run every eligible instance at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    fn limit(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(max) => Some((*max).max(1)),
        }
    }
}

/// One concrete, schedulable instantiation of a job template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    /// Template id
    pub template: String,

    /// Display name, `template (axis=value, ...)`
    pub name: String,

    pub matrix: MatrixValues,
}

/// Explicit dependency graph over job instances.
///
/// Every instance of a prerequisite template has an edge to every instance
/// of the dependent. Each node carries an in-degree counter; a node becomes
/// eligible when its counter reaches zero.
#[derive(Debug, Clone)]
pub struct JobGraph {
    graph: DiGraph<JobInstance, ()>,
    in_degree: Vec<usize>,
    groups: IndexMap<String, Vec<NodeIndex>>,
}

impl JobGraph {
    /// Expand every template and wire the `needs` edges
    pub fn build(workflow: &Workflow) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut groups: IndexMap<String, Vec<NodeIndex>> = IndexMap::new();

        for job in &workflow.jobs {
            let nodes = MatrixExpander::expand(job.matrix.as_ref())
                .into_iter()
                .map(|values| {
                    graph.add_node(JobInstance {
                        template: job.id.clone(),
                        name: MatrixExpander::display_name(&job.id, &values),
                        matrix: values,
                    })
                })
                .collect();
            groups.insert(job.id.clone(), nodes);
        }

        for job in &workflow.jobs {
            for need in &job.needs {
                let prerequisites = groups.get(need).ok_or_else(|| ConfigError::UnknownNeed {
                    job: job.id.clone(),
                    need: need.clone(),
                })?;
                for &from in prerequisites {
                    for &to in &groups[&job.id] {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        toposort(&graph, None)
            .map_err(|cycle| ConfigError::Cycle(graph[cycle.node_id()].template.clone()))?;

        let in_degree = graph
            .node_indices()
            .map(|node| graph.neighbors_directed(node, Direction::Incoming).count())
            .collect();

        Ok(Self {
            graph,
            in_degree,
            groups,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn instance(&self, node: NodeIndex) -> &JobInstance {
        &self.graph[node]
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Instances of one template, in expansion order
    pub fn group(&self, template: &str) -> &[NodeIndex] {
        self.groups.get(template).map(Vec::as_slice).unwrap_or_default()
    }

    /// Templates with their instances, in declaration order
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[NodeIndex])> {
        self.groups.iter().map(|(id, nodes)| (id.as_str(), nodes.as_slice()))
    }

    pub fn in_degree(&self, node: NodeIndex) -> usize {
        self.in_degree[node.index()]
    }

    /// Nodes with no prerequisites
    pub fn initial_ready(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|node| self.in_degree[node.index()] == 0)
            .collect()
    }

    /// Record a terminal transition; returns dependents that just became eligible
    pub fn complete(&mut self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        // petgraph walks edges newest first
        dependents.sort();

        dependents
            .into_iter()
            .filter(|dependent| {
                let counter = &mut self.in_degree[dependent.index()];
                *counter = counter.saturating_sub(1);
                *counter == 0
            })
            .collect()
    }
}

/// Admission queue enforcing the scheduling strategy and per-template caps
#[derive(Debug)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
    ready: VecDeque<NodeIndex>,
    running: usize,
    running_per_template: HashMap<String, usize>,
    template_limits: HashMap<String, usize>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            ready: VecDeque::new(),
            running: 0,
            running_per_template: HashMap::new(),
            template_limits: HashMap::new(),
        }
    }

    /// Cap concurrently running instances of one template (matrix `max-parallel`)
    pub fn limit_template(&mut self, template: impl Into<String>, max: usize) {
        self.template_limits.insert(template.into(), max.max(1));
    }

    /// Add an eligible node to the queue
    pub fn enqueue(&mut self, node: NodeIndex) {
        self.ready.push_back(node);
    }

    /// Take the first queued node the caps allow to start now
    pub fn next_admissible(&mut self, graph: &JobGraph) -> Option<NodeIndex> {
        if self
            .strategy
            .limit()
            .is_some_and(|limit| self.running >= limit)
        {
            return None;
        }

        let position = self.ready.iter().position(|&node| {
            let template = &graph.instance(node).template;
            match self.template_limits.get(template) {
                Some(&max) => self.running_per_template.get(template).copied().unwrap_or(0) < max,
                None => true,
            }
        })?;

        self.ready.remove(position)
    }

    /// Mark an admitted node as running
    pub fn started(&mut self, graph: &JobGraph, node: NodeIndex) {
        self.running += 1;
        *self
            .running_per_template
            .entry(graph.instance(node).template.clone())
            .or_default() += 1;
    }

    /// Mark a running node as finished
    pub fn finished(&mut self, graph: &JobGraph, node: NodeIndex) {
        self.running = self.running.saturating_sub(1);
        if let Some(count) = self
            .running_per_template
            .get_mut(&graph.instance(node).template)
        {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WorkflowConfig;

    fn workflow(yaml: &str) -> Workflow {
        WorkflowConfig::from_yaml(yaml).unwrap().to_workflow().unwrap()
    }

    const FAN_IN: &str = r#"
name: fan-in
on:
  workflow_dispatch:
jobs:
  check:
    strategy:
      matrix:
        python: ["3.10", "3.12"]
        os: [linux, macos]
    steps:
      - run: "true"
  report:
    needs: check
    steps:
      - run: "true"
"#;

    #[test]
    fn test_build_expands_and_wires_edges() {
        let graph = JobGraph::build(&workflow(FAN_IN)).unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.group("check").len(), 4);

        let report = graph.group("report")[0];
        assert_eq!(graph.in_degree(report), 4);
        assert_eq!(graph.instance(report).name, "report");
        assert_eq!(
            graph.instance(graph.group("check")[1]).name,
            "check (python=3.10, os=macos)"
        );
        assert_eq!(graph.initial_ready(), graph.group("check").to_vec());
    }

    #[test]
    fn test_dependent_ready_after_last_prerequisite() {
        let mut graph = JobGraph::build(&workflow(FAN_IN)).unwrap();
        let checks = graph.group("check").to_vec();
        let report = graph.group("report")[0];

        for &node in &checks[..3] {
            assert!(graph.complete(node).is_empty());
        }
        assert_eq!(graph.complete(checks[3]), vec![report]);
    }

    #[test]
    fn test_empty_axis_has_no_instances() {
        let yaml = r#"
name: empty
on:
  workflow_dispatch:
jobs:
  check:
    strategy:
      matrix:
        python: []
    steps:
      - run: "true"
  report:
    needs: check
    if: always()
    steps:
      - run: "true"
"#;
        let graph = JobGraph::build(&workflow(yaml)).unwrap();
        assert!(graph.group("check").is_empty());
        assert_eq!(graph.initial_ready(), graph.group("report").to_vec());
    }

    #[test]
    fn test_sequential_admits_one_at_a_time() {
        let graph = JobGraph::build(&workflow(FAN_IN)).unwrap();
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Sequential);
        for node in graph.initial_ready() {
            scheduler.enqueue(node);
        }

        let first = scheduler.next_admissible(&graph).unwrap();
        scheduler.started(&graph, first);
        assert!(scheduler.next_admissible(&graph).is_none());

        scheduler.finished(&graph, first);
        assert!(scheduler.next_admissible(&graph).is_some());
    }

    #[test]
    fn test_template_limit() {
        let graph = JobGraph::build(&workflow(FAN_IN)).unwrap();
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Parallel);
        scheduler.limit_template("check", 2);
        for node in graph.initial_ready() {
            scheduler.enqueue(node);
        }

        for _ in 0..2 {
            let node = scheduler.next_admissible(&graph).unwrap();
            scheduler.started(&graph, node);
        }
        assert!(scheduler.next_admissible(&graph).is_none());
    }
}
