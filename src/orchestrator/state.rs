//! Build job state tracking.
//!
//! A job moves strictly forward: `Created -> Started -> Monitoring -> Completed`.
//! There is no failed phase. A non-zero compile exit still moves the job into
//! `Monitoring`; a monitor that times out or is cancelled still ends in
//! `Completed`, with the reason recorded in `JobState::monitor`.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::error::BuildError;
use crate::models::MonitorResult;

/// Discrete phases of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    /// Paths computed, nothing launched
    Created,

    /// Compile step launched (and, once `start` returns, exited)
    Started,

    /// Polling for the artifact
    Monitoring,

    /// Monitoring ended
    Completed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Created => "created",
            JobPhase::Started => "started",
            JobPhase::Monitoring => "monitoring",
            JobPhase::Completed => "completed",
        }
    }

    /// The only phase reachable from this one.
    pub fn next(&self) -> Option<JobPhase> {
        match self {
            JobPhase::Created => Some(JobPhase::Started),
            JobPhase::Started => Some(JobPhase::Monitoring),
            JobPhase::Monitoring => Some(JobPhase::Completed),
            JobPhase::Completed => None,
        }
    }

    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        self.next() == Some(next)
    }
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub phase: JobPhase,

    /// Exit status of the compile step, once it has run
    pub exit_ok: Option<bool>,

    /// How monitoring ended, once it has
    pub monitor: Option<MonitorResult>,

    pub created_at: SystemTime,
    pub last_update_time: SystemTime,
}

impl JobState {
    pub fn new() -> Self {
        let now = SystemTime::now();
        JobState {
            phase: JobPhase::Created,
            exit_ok: None,
            monitor: None,
            created_at: now,
            last_update_time: now,
        }
    }

    /// Move to `next`, rejecting skips and backwards moves.
    pub fn transition_to(&mut self, next: JobPhase) -> Result<(), BuildError> {
        if !self.phase.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.phase.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.phase = next;
        self.last_update_time = SystemTime::now();
        Ok(())
    }

    pub fn record_exit(&mut self, exit_ok: bool) {
        self.exit_ok = Some(exit_ok);
        self.last_update_time = SystemTime::now();
    }

    pub fn record_monitor(&mut self, result: MonitorResult) {
        self.monitor = Some(result);
        self.last_update_time = SystemTime::now();
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}
