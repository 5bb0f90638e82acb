// src/scheduler/logs.rs

//! Per-schedule run summary: how often a schedule ran, when it last
//! succeeded or failed, and a short tail of notes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ScheduleId;

/// Notes beyond this many lines are dropped, oldest first.
pub const MAX_NOTE_LINES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleLog {
    pub schedule_id: ScheduleId,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub number_of_runs: u64,
    #[serde(default)]
    pub status: Option<RunStatus>,
    /// `[<timestamp>]: <note>` lines, newest last.
    #[serde(default)]
    pub meta: String,
}

impl ScheduleLog {
    pub fn new(schedule_id: ScheduleId) -> Self {
        Self {
            schedule_id,
            last_run: None,
            last_success: None,
            last_failure: None,
            number_of_runs: 0,
            status: None,
            meta: String::new(),
        }
    }

    /// Count one finished run.
    pub fn record(&mut self, success: bool, note: Option<&str>, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.number_of_runs += 1;

        if success {
            self.last_success = Some(at);
            self.status = Some(RunStatus::Success);
        } else {
            self.last_failure = Some(at);
            self.status = Some(RunStatus::Failure);
        }

        if let Some(note) = note {
            let lines: Vec<&str> = self.meta.lines().collect();
            let keep = lines.len().saturating_sub(MAX_NOTE_LINES - 1);
            let mut meta = lines[keep..].join("\n");
            if !meta.is_empty() {
                meta.push('\n');
            }
            let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
            meta.push_str(&format!("[{stamp}]: {note}\n"));
            self.meta = meta;
        }
    }

    pub fn notes(&self) -> impl Iterator<Item = &str> {
        self.meta.lines()
    }
}
