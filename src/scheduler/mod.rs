// src/scheduler/mod.rs

//! Recurring schedules.
//!
//! - [`model`] holds the persisted schedule row and the job hand-off object.
//! - [`store`] is the persistence contract and its in-memory/JSON-file
//!   implementation.
//! - [`cron`] parses cron expressions and does the minute arithmetic.
//! - [`logs`] is the per-schedule run summary.
//! - [`poller`] is the `Scheduler` itself.

pub mod cron;
pub mod logs;
pub mod model;
pub mod poller;
pub mod store;

pub use self::cron::CronExpr;
pub use logs::{RunStatus, ScheduleLog};
pub use model::{JobConfig, ScheduleRow};
pub use poller::{RunReport, Scheduler};
pub use store::{InMemoryScheduleStore, ScheduleStore, StoreFuture};
