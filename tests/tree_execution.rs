mod common;
use crate::common::builders::{TaskConfigBuilder, chain};
use crate::common::fake_runner::Recorder;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;

use serde_json::json;

use jobtree::dag::{TaskTree, VisitOutcome};
use jobtree::types::JobStatus;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn all_success_chain_visits_each_task_once_in_order() -> TestResult {
    init_tracing();
    let recorder = Recorder::new();
    let mut tree = TaskTree::create(chain(&["ok", "ok", "ok"]), "unused.bin", &recorder.registry())?;

    let outcome = with_timeout(tree.visit()).await?;

    assert_eq!(outcome.visited(), &[0, 1, 2, 3]);
    assert_eq!(recorder.executed(), vec![0, 1, 2]);
    match outcome {
        VisitOutcome::Finished { output, .. } => {
            assert!(output.exit);
            assert!(output.status);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn failure_edge_skips_the_success_successor() -> TestResult {
    init_tracing();
    let recorder = Recorder::new();
    let tasks = vec![
        TaskConfigBuilder::new(0, "ok").build(),
        TaskConfigBuilder::new(1, "fail").on_failure(3).build(),
        TaskConfigBuilder::new(2, "ok").build(),
        TaskConfigBuilder::new(3, "ok").build(),
    ];
    let mut tree = TaskTree::create(tasks, "unused.bin", &recorder.registry())?;

    let outcome = with_timeout(tree.visit()).await?;

    // 3 recovers, so the walk still ends in the exit sink (id 4)
    assert_eq!(outcome.visited(), &[0, 1, 3, 4]);
    assert!(outcome.succeeded());
    assert!(!recorder.executed().contains(&2));
    Ok(())
}

#[tokio::test]
async fn unrecovered_failure_ends_in_the_failure_sink() -> TestResult {
    let recorder = Recorder::new();
    let mut tree = TaskTree::create(chain(&["ok", "fail", "ok"]), "unused.bin", &recorder.registry())?;

    let outcome = with_timeout(tree.visit()).await?;

    assert_eq!(outcome.visited(), &[0, 1, 4]);
    match outcome {
        VisitOutcome::Finished { output, .. } => {
            assert!(output.exit);
            assert!(!output.status);
            assert!(output.log.iter().any(|l| l.contains("failed on purpose")));
            assert_eq!(output.log.last().map(String::as_str), Some("job failed"));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn cancel_stops_at_the_next_boundary_and_stays_cancelled() -> TestResult {
    init_tracing();
    let recorder = Recorder::new();
    let mut tree = TaskTree::create(chain(&["ok", "gated", "ok"]), "unused.bin", &recorder.registry())?;
    let control = tree.control();

    let walk = tokio::spawn(async move {
        let outcome = tree.visit().await;
        (tree, outcome)
    });

    with_timeout(recorder.wait_entered()).await;
    control.cancel();
    recorder.release();

    let (mut tree, outcome) = with_timeout(walk).await?;
    match outcome? {
        VisitOutcome::Cancelled { last, visited } => {
            assert_eq!(visited, vec![0, 1]);
            assert!(last.is_some_and(|out| out.status));
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(recorder.executed(), vec![0, 1]);

    for _ in 0..2 {
        let again = with_timeout(tree.visit()).await?;
        assert!(matches!(again, VisitOutcome::Cancelled { last: None, .. }));
        assert!(again.visited().is_empty());
    }
    assert_eq!(recorder.executed(), vec![0, 1]);
    assert_eq!(tree.status(), JobStatus::Cancelled);
    assert!(!tree.pause());
    Ok(())
}

#[tokio::test]
async fn import_then_export_reaches_the_exit_sink() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("contacts.csv");
    let dst = dir.path().join("out").join("contacts-copy.csv");
    std::fs::write(&src, "email,name\na@example.com,Ada\n")?;

    let tasks = vec![
        TaskConfigBuilder::new(1, "import").params(json!({ "path": src })).build(),
        TaskConfigBuilder::new(2, "export").params(json!({ "path": dst })).build(),
    ];
    let recorder = Recorder::new();
    let mut tree = TaskTree::create(tasks, dir.path().join("snap.bin"), &recorder.registry())?;

    let outcome = with_timeout(tree.visit()).await?;

    assert_eq!(outcome.visited(), &[1, 2, 3]);
    assert!(outcome.succeeded());
    assert_eq!(std::fs::read_to_string(&dst)?, "email,name\na@example.com,Ada\n");
    Ok(())
}

#[tokio::test]
async fn stream_flows_from_task_to_task() -> TestResult {
    let recorder = Recorder::new();
    let tasks = vec![
        TaskConfigBuilder::new(0, "emit").params(json!({ "data": "rows" })).build(),
        TaskConfigBuilder::new(1, "ok").build(),
        TaskConfigBuilder::new(2, "capture").build(),
    ];
    let mut tree = TaskTree::create(tasks, "unused.bin", &recorder.registry())?;

    let outcome = with_timeout(tree.visit()).await?;

    assert!(outcome.succeeded());
    assert_eq!(recorder.captured(2), Some(b"rows".to_vec()));
    Ok(())
}
