// src/dag/control.rs

//! Shared run-state cell for a task tree.
//!
//! The tree walk holds `&mut TaskTree` for its whole duration, so cancel and
//! pause requests from other tasks go through this cell instead.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::JobStatus;

#[derive(Debug, Default)]
pub struct RunControl {
    state: AtomicU8,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.status() == JobStatus::Paused
    }

    /// Cancel; permanent for this tree.
    pub fn cancel(&self) {
        self.state
            .store(JobStatus::Cancelled.as_u8(), Ordering::SeqCst);
    }

    /// Request a pause. Returns `false` if the tree is already cancelled.
    pub fn pause(&self) -> bool {
        self.transition(JobStatus::Paused)
    }

    /// Mark running. Returns `false` if the tree is already cancelled.
    pub fn mark_running(&self) -> bool {
        self.transition(JobStatus::Running)
    }

    /// Mark idle after a finished walk. Returns `false` if cancelled.
    pub fn mark_idle(&self) -> bool {
        self.transition(JobStatus::Idle)
    }

    fn transition(&self, to: JobStatus) -> bool {
        let cancelled = JobStatus::Cancelled.as_u8();
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == cancelled {
                    None
                } else {
                    Some(to.as_u8())
                }
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        assert_eq!(RunControl::new().status(), JobStatus::Idle);
    }

    #[test]
    fn cancel_is_absorbing() {
        let control = RunControl::new();
        assert!(control.mark_running());
        control.cancel();

        assert!(!control.pause());
        assert!(!control.mark_running());
        assert!(!control.mark_idle());
        assert_eq!(control.status(), JobStatus::Cancelled);
    }

    #[test]
    fn pause_then_run_again() {
        let control = RunControl::new();
        assert!(control.mark_running());
        assert!(control.pause());
        assert!(control.is_paused());
        assert!(control.mark_running());
        assert_eq!(control.status(), JobStatus::Running);
    }
}
