mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::io::Write;

use jobtree::config::{load_and_validate, load_from_path};
use jobtree::errors::JobtreeError;
use jobtree::scheduler::{InMemoryScheduleStore, ScheduleStore};
use jobtree::seed_schedules;

type TestResult = Result<(), Box<dyn Error>>;

const CONFIG: &str = r#"
[scheduler]
snapshot_dir = "snaps"
worker_id = 2
max_concurrent_jobs = 1

[[schedule]]
id = 1
name = "nightly copy"
cron = "0 2 * * *"

[[schedule.tasks]]
id = 0
task_id = "import"
params = { path = "in.csv" }

[[schedule.tasks]]
id = 1
task_id = "export"
params = { path = "out.csv" }

[[schedule]]
id = 2
name = "hourly report"
cron = "0 * * * *"
enabled = false
tasks = [{ id = 0, task_id = "command", params = { cmd = "echo hi" } }]
"#;

fn write_config(contents: &str) -> Result<tempfile::NamedTempFile, Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn full_config_loads_and_validates() -> TestResult {
    init_tracing();
    let file = write_config(CONFIG)?;
    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.scheduler.snapshot_dir, std::path::PathBuf::from("snaps"));
    assert_eq!(cfg.scheduler.worker_id, 2);
    assert_eq!(cfg.scheduler.max_concurrent_jobs, 1);
    assert_eq!(cfg.schedule.len(), 2);
    assert_eq!(cfg.schedule[0].tasks.len(), 2);
    assert!(!cfg.schedule(2).unwrap().enabled);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_from_path("definitely/not/here/Jobtree.toml").unwrap_err();
    assert!(matches!(err, JobtreeError::IoError(_)));
}

#[test]
fn malformed_toml_is_a_toml_error() -> TestResult {
    let file = write_config("[[schedule]\nid = ")?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, JobtreeError::TomlError(_)));
    Ok(())
}

#[test]
fn duplicate_task_ids_inside_a_schedule_are_rejected() -> TestResult {
    let file = write_config(
        r#"
[[schedule]]
id = 1
cron = "* * * * *"
tasks = [{ id = 3, task_id = "import" }, { id = 3, task_id = "export" }]
"#,
    )?;
    let msg = load_and_validate(file.path()).unwrap_err().to_string();
    assert!(msg.contains("duplicate id 3"), "{msg}");
    Ok(())
}

#[tokio::test]
async fn seeding_never_overwrites_stored_rows() -> TestResult {
    init_tracing();
    let file = write_config(CONFIG)?;
    let cfg = load_and_validate(file.path())?;
    let store = InMemoryScheduleStore::new();

    assert_eq!(seed_schedules(&cfg, &store).await?, 2);
    let seeded = store.get(2).await?.expect("seeded");
    assert!(!seeded.should_run_next);
    assert_eq!(seeded.worker_id, 2);

    store.set_enabled(2, true).await?;
    assert_eq!(seed_schedules(&cfg, &store).await?, 0);
    assert!(store.get(2).await?.expect("still there").should_run_next);
    Ok(())
}
