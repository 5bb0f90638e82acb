mod common;
use crate::common::builders::{TaskConfigBuilder, chain};
use crate::common::fake_runner::Recorder;
use crate::common::init_tracing;

use std::error::Error;

use jobtree::dag::{DEFAULT_EXIT_KIND, DEFAULT_FAILURE_KIND, TaskGraph, TaskTree};
use jobtree::errors::JobtreeError;
use jobtree::exec::TaskRegistry;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn sinks_are_appended_after_the_declared_tasks() -> TestResult {
    init_tracing();

    let graph = TaskGraph::build(chain(&["ok", "ok", "ok"]))?;
    let kinds: Vec<&str> = graph.nodes().iter().map(|n| n.config.task_id.as_str()).collect();
    assert_eq!(kinds, vec!["ok", "ok", "ok", DEFAULT_EXIT_KIND, DEFAULT_FAILURE_KIND]);

    let ids: Vec<u64> = graph.nodes().iter().map(|n| n.config.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn explicit_edges_survive_default_wiring() -> TestResult {
    let tasks = vec![
        TaskConfigBuilder::new(10, "ok").on_failure(30).build(),
        TaskConfigBuilder::new(20, "ok").build(),
        TaskConfigBuilder::new(30, "ok").build(),
    ];
    let graph = TaskGraph::build(tasks)?;
    let nodes = graph.nodes();

    assert_eq!(nodes[0].on_success, Some(1));
    assert_eq!(nodes[0].on_failure, Some(2));
    assert_eq!(nodes[1].on_success, Some(2));
    assert_eq!(nodes[1].on_failure, Some(graph.failure_index()));
    assert_eq!(nodes[2].on_success, Some(graph.exit_index()));
    assert_eq!(nodes[3].on_success, None);
    Ok(())
}

#[test]
fn reachable_cycle_is_rejected() {
    let tasks = vec![
        TaskConfigBuilder::new(1, "ok").build(),
        TaskConfigBuilder::new(2, "ok").on_success(1).build(),
    ];
    let err = TaskGraph::build(tasks).unwrap_err();
    assert!(matches!(err, JobtreeError::InvalidGraph(msg) if msg.contains("cycle")));
}

#[test]
fn duplicate_ids_never_produce_a_tree() {
    let recorder = Recorder::new();
    let tasks = vec![
        TaskConfigBuilder::new(4, "ok").build(),
        TaskConfigBuilder::new(5, "ok").build(),
        TaskConfigBuilder::new(4, "fail").build(),
    ];

    let err = TaskTree::create(tasks, "unused.bin", &recorder.registry()).unwrap_err();
    assert!(matches!(err, JobtreeError::DuplicateTaskId(4)));
}

#[test]
fn empty_task_list_is_rejected() {
    let err = TaskTree::create(Vec::new(), "unused.bin", &TaskRegistry::with_builtin()).unwrap_err();
    assert!(matches!(err, JobtreeError::EmptyTaskList));
}

#[test]
fn unknown_task_kind_is_a_construction_error() {
    let err = TaskTree::create(chain(&["import", "mailchimp"]), "unused.bin", &TaskRegistry::with_builtin())
        .unwrap_err();
    assert!(matches!(err, JobtreeError::UnknownTaskKind(kind) if kind == "mailchimp"));
}

#[test]
fn edge_to_unknown_id_is_rejected() {
    let tasks = vec![TaskConfigBuilder::new(1, "ok").on_success(99).build()];
    let err = TaskGraph::build(tasks).unwrap_err();
    assert!(matches!(err, JobtreeError::InvalidGraph(msg) if msg.contains("99")));
}

#[test]
fn describe_lists_the_success_path() -> TestResult {
    let recorder = Recorder::new();
    let tasks = vec![
        TaskConfigBuilder::new(1, "import").name("load csv").build(),
        TaskConfigBuilder::new(2, "export").name("write copy").build(),
    ];
    let tree = TaskTree::create(tasks, "unused.bin", &recorder.registry())?;

    assert_eq!(
        tree.describe(),
        vec![
            "[1] load csv (import)".to_string(),
            "[2] write copy (export)".to_string(),
            "[3] Default Exit (default_exit)".to_string(),
        ]
    );
    tree.print_tree();
    Ok(())
}
