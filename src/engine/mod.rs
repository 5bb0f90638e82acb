// src/engine/mod.rs

//! Job layer.
//!
//! - [`job`] wraps one task tree behind create/run/pause/unpause/cancel.
//! - [`queue`] is the id → job registry that bounds how many walks run at
//!   once.
//! - [`history`] keeps a status record for every job the queue created.

pub mod history;
pub mod job;
pub mod queue;

pub use history::{JobHistory, JobRecord, JobState};
pub use job::Job;
pub use queue::JobQueue;
