// src/dag/graph.rs

//! Structural construction of a task graph from a flat task list.
//!
//! Building a graph:
//! - rejects empty lists and duplicate ids,
//! - appends the two sink tasks (Default Exit, Default Failure),
//! - applies the default wiring to unset edges,
//! - resolves edge ids to positions,
//! - rejects cycles reachable from the first task.
//!
//! No runners are instantiated here, so config validation can reuse this
//! without a [`TaskRegistry`](crate::exec::TaskRegistry).

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use tracing::debug;

use crate::dag::task::TaskConfig;
use crate::errors::{JobtreeError, Result};
use crate::types::TaskId;

/// Kind of the success sink appended to every graph.
pub const DEFAULT_EXIT_KIND: &str = "default_exit";
/// Kind of the failure sink appended to every graph.
pub const DEFAULT_FAILURE_KIND: &str = "default_failure";

/// A task declaration with its edges resolved to positions.
#[derive(Debug, Clone)]
pub struct WiredNode {
    pub config: TaskConfig,
    pub on_success: Option<usize>,
    pub on_failure: Option<usize>,
}

impl WiredNode {
    fn successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.on_success.into_iter().chain(self.on_failure)
    }
}

/// Validated, fully wired task graph.
///
/// The last two nodes are always Default Exit and Default Failure, in that
/// order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<WiredNode>,
}

impl TaskGraph {
    pub fn build(mut configs: Vec<TaskConfig>) -> Result<Self> {
        if configs.is_empty() {
            return Err(JobtreeError::EmptyTaskList);
        }

        ensure_unique_ids(&configs)?;

        let max_id = configs.iter().map(|c| c.id).max().unwrap_or(0);
        let exit_id = max_id + 1;
        let failure_id = max_id + 2;

        let original_len = configs.len();
        for i in 0..original_len {
            let next_id = if i + 1 < original_len {
                configs[i + 1].id
            } else {
                exit_id
            };
            let cfg = &mut configs[i];
            if cfg.on_success.is_none() {
                cfg.on_success = Some(next_id);
            }
            if cfg.on_failure.is_none() {
                cfg.on_failure = Some(failure_id);
            }
        }

        configs.push(sink_config(exit_id, "Default Exit", DEFAULT_EXIT_KIND));
        configs.push(sink_config(failure_id, "Default Failure", DEFAULT_FAILURE_KIND));

        let positions: HashMap<TaskId, usize> = configs
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        let mut nodes = Vec::with_capacity(configs.len());
        for (i, config) in configs.into_iter().enumerate() {
            let (on_success, on_failure) = if i < original_len {
                (
                    Some(resolve_edge(&positions, &config, config.on_success)?),
                    Some(resolve_edge(&positions, &config, config.on_failure)?),
                )
            } else {
                (None, None)
            };
            nodes.push(WiredNode {
                config,
                on_success,
                on_failure,
            });
        }

        validate_acyclic(&nodes)?;

        debug!(tasks = original_len, "task graph built");
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[WiredNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<WiredNode> {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn exit_index(&self) -> usize {
        self.nodes.len() - 2
    }

    pub fn failure_index(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Positions visited when every task succeeds, ending at a sink.
    pub fn success_path(&self) -> Vec<usize> {
        let mut path = vec![0];
        let mut current = 0;
        while let Some(next) = self.nodes[current].on_success {
            path.push(next);
            current = next;
        }
        path
    }
}

fn ensure_unique_ids(configs: &[TaskConfig]) -> Result<()> {
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(configs.len());
    for cfg in configs {
        if !seen.insert(cfg.id) {
            return Err(JobtreeError::DuplicateTaskId(cfg.id));
        }
    }
    Ok(())
}

fn sink_config(id: TaskId, name: &str, kind: &str) -> TaskConfig {
    TaskConfig {
        id,
        task_id: kind.to_string(),
        name: name.to_string(),
        params: serde_json::Value::Null,
        on_success: None,
        on_failure: None,
    }
}

fn resolve_edge(
    positions: &HashMap<TaskId, usize>,
    from: &TaskConfig,
    target: Option<TaskId>,
) -> Result<usize> {
    let target = target.ok_or_else(|| {
        JobtreeError::InvalidGraph(format!("task {} has an unwired edge", from.id))
    })?;
    positions.get(&target).copied().ok_or_else(|| {
        JobtreeError::InvalidGraph(format!(
            "task {} references unknown task id {}",
            from.id, target
        ))
    })
}

fn validate_acyclic(nodes: &[WiredNode]) -> Result<()> {
    // Edge direction: task -> successor (both the success and failure edge).
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for (i, node) in nodes.iter().enumerate() {
        graph.add_node(i);
        for next in node.successors() {
            graph.add_edge(i, next, ());
        }
    }

    // Only what the walk can reach from the first task matters.
    let mut reachable: DiGraphMap<usize, ()> = DiGraphMap::new();
    let mut dfs = Dfs::new(&graph, 0);
    while let Some(i) = dfs.next(&graph) {
        reachable.add_node(i);
        for next in nodes[i].successors() {
            reachable.add_edge(i, next, ());
        }
    }

    let unreachable = nodes.len() - reachable.node_count();
    if unreachable > 0 {
        debug!(unreachable, "some tasks are not reachable from the first task");
    }

    match toposort(&reachable, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(JobtreeError::InvalidGraph(format!(
            "cycle detected in task graph involving task id {}",
            nodes[cycle.node_id()].config.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ids: &[TaskId]) -> Vec<TaskConfig> {
        ids.iter().map(|&id| TaskConfig::new(id, "noop")).collect()
    }

    #[test]
    fn sinks_get_ids_above_the_maximum() {
        let graph = TaskGraph::build(chain(&[4, 9, 2])).unwrap();
        let nodes = graph.nodes();

        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[graph.exit_index()].config.id, 10);
        assert_eq!(nodes[graph.exit_index()].config.task_id, DEFAULT_EXIT_KIND);
        assert_eq!(nodes[graph.failure_index()].config.id, 11);
        assert_eq!(
            nodes[graph.failure_index()].config.task_id,
            DEFAULT_FAILURE_KIND
        );
    }

    #[test]
    fn default_wiring_chains_in_declaration_order() {
        let graph = TaskGraph::build(chain(&[0, 1, 2])).unwrap();
        let nodes = graph.nodes();

        assert_eq!(nodes[0].on_success, Some(1));
        assert_eq!(nodes[1].on_success, Some(2));
        assert_eq!(nodes[2].on_success, Some(graph.exit_index()));
        for node in &nodes[..3] {
            assert_eq!(node.on_failure, Some(graph.failure_index()));
            assert_eq!(node.config.on_failure, Some(4));
        }
        assert_eq!(graph.success_path(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn explicit_edges_are_kept() {
        let mut configs = chain(&[0, 1, 2]);
        configs[0].on_failure = Some(2);
        let graph = TaskGraph::build(configs).unwrap();

        assert_eq!(graph.nodes()[0].on_failure, Some(2));
        assert_eq!(graph.nodes()[0].on_success, Some(1));
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(
            TaskGraph::build(Vec::new()),
            Err(JobtreeError::EmptyTaskList)
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = TaskGraph::build(chain(&[0, 1, 1])).unwrap_err();
        assert!(matches!(err, JobtreeError::DuplicateTaskId(1)));
    }

    #[test]
    fn unknown_edge_target_is_rejected() {
        let mut configs = chain(&[0, 1]);
        configs[1].on_success = Some(42);
        let err = TaskGraph::build(configs).unwrap_err();
        match err {
            JobtreeError::InvalidGraph(msg) => assert!(msg.contains("unknown task id 42")),
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn cycle_is_rejected() {
        let mut configs = chain(&[0, 1, 2]);
        configs[2].on_success = Some(0);
        let err = TaskGraph::build(configs).unwrap_err();
        match err {
            JobtreeError::InvalidGraph(msg) => assert!(msg.contains("cycle detected")),
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_on_failure_is_a_cycle() {
        let mut configs = chain(&[0, 1]);
        configs[1].on_failure = Some(1);
        assert!(matches!(
            TaskGraph::build(configs),
            Err(JobtreeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn unreachable_cycle_is_ignored() {
        // 0 jumps straight to the exit sink; 1 <-> 2 can never run.
        let mut configs = chain(&[0, 1, 2]);
        configs[0].on_success = Some(3);
        configs[0].on_failure = Some(4);
        configs[1].on_success = Some(2);
        configs[2].on_success = Some(1);

        let graph = TaskGraph::build(configs).unwrap();
        assert_eq!(graph.success_path(), vec![0, 3]);
    }
}
