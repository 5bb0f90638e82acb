// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Job, JobHistory, JobQueue};
use crate::exec::TaskRegistry;
use crate::scheduler::{InMemoryScheduleStore, RunReport, ScheduleStore, Scheduler};
use crate::types::ScheduleId;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the schedule store (seeded from the config)
/// - job history, job queue and scheduler
/// - Ctrl-C handling for the long-running loop
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let registry = TaskRegistry::with_builtin();

    if args.dry_run {
        print_dry_run(&cfg, &registry);
        return Ok(());
    }

    let store: Arc<dyn ScheduleStore> = match &cfg.scheduler.store_path {
        Some(path) => Arc::new(InMemoryScheduleStore::open(path).await?),
        None => Arc::new(InMemoryScheduleStore::new()),
    };
    seed_schedules(&cfg, store.as_ref()).await?;

    let history = match &cfg.scheduler.jobs_path {
        Some(path) => JobHistory::open(path).await?,
        None => JobHistory::new(),
    };
    let queue = Arc::new(
        JobQueue::new(registry, cfg.scheduler.max_concurrent_jobs)
            .with_run_now_limit(cfg.scheduler.max_concurrent_run_now_jobs)
            .with_history(history),
    );
    let scheduler = Arc::new(Scheduler::new(
        store,
        queue,
        cfg.scheduler.snapshot_dir.clone(),
        cfg.scheduler.worker_id,
    ));
    scheduler.initialize().await?;

    if let Some(id) = args.schedule {
        let report = scheduler.run_schedule(id, true).await?;
        println!("{}", describe_report(id, &report));
        return Ok(());
    }

    if args.once {
        let handles = scheduler.tick(Utc::now()).await?;
        info!(launched = handles.len(), "waiting for launched jobs");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduled run task panicked or was aborted");
            }
        }
        return Ok(());
    }

    // Ctrl-C → graceful shutdown.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C; running until killed");
            std::future::pending::<()>().await;
        }
    };

    info!("scheduler started");
    scheduler.run_loop(shutdown).await?;
    Ok(())
}

/// Insert every configured schedule the store does not know yet.
///
/// Rows already present (e.g. from a previous run's store file) win over the
/// config, so runtime edits are not reverted on restart.
pub async fn seed_schedules(cfg: &ConfigFile, store: &dyn ScheduleStore) -> crate::errors::Result<usize> {
    let mut seeded = 0;
    for schedule in &cfg.schedule {
        if store.get(schedule.id).await?.is_some() {
            debug!(schedule_id = schedule.id, "schedule already stored; not seeding");
            continue;
        }
        store.upsert(schedule.to_row(cfg.scheduler.worker_id)?).await?;
        seeded += 1;
    }
    info!(seeded, configured = cfg.schedule.len(), "schedules seeded");
    Ok(seeded)
}

fn describe_report(id: ScheduleId, report: &RunReport) -> String {
    match report {
        RunReport::AlreadyRunning => format!("schedule {id}: already running"),
        RunReport::Finished { job_id, success: true } => {
            format!("schedule {id}: job {job_id} finished successfully")
        }
        RunReport::Finished { job_id, success: false } => {
            format!("schedule {id}: job {job_id} failed")
        }
        RunReport::Cancelled { job_id } => format!("schedule {id}: job {job_id} cancelled"),
        RunReport::Paused { job_id } => format!("schedule {id}: job {job_id} paused"),
    }
}

/// Print every schedule and its all-success task chain.
fn print_dry_run(cfg: &ConfigFile, registry: &TaskRegistry) {
    println!("jobtree dry-run");
    println!("  scheduler.snapshot_dir = {}", cfg.scheduler.snapshot_dir.display());
    match &cfg.scheduler.store_path {
        Some(path) => println!("  scheduler.store_path = {}", path.display()),
        None => println!("  scheduler.store_path = (in memory)"),
    }
    match &cfg.scheduler.jobs_path {
        Some(path) => println!("  scheduler.jobs_path = {}", path.display()),
        None => println!("  scheduler.jobs_path = (in memory)"),
    }
    println!("  scheduler.max_concurrent_jobs = {}", cfg.scheduler.max_concurrent_jobs);
    println!(
        "  scheduler.max_concurrent_run_now_jobs = {}",
        cfg.scheduler.max_concurrent_run_now_jobs
    );
    println!();

    println!("schedules ({}):", cfg.schedule.len());
    for schedule in &cfg.schedule {
        let state = if schedule.enabled { "" } else { " [disabled]" };
        println!("  - [{}] {} ({}){state}", schedule.id, schedule.name, schedule.cron);

        match Job::create(schedule.tasks.clone(), "dry-run.bin", registry) {
            Ok(job) => {
                for line in job.describe() {
                    println!("      {line}");
                }
            }
            Err(e) => println!("      error: {e}"),
        }
    }

    debug!("dry-run complete (no execution)");
}
