//! Job status values and the lightweight job snapshot delivered to
//! watchers.

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

/// Job has finished successfully.
pub const STATUS_COMPLETED: &str = "completed";

/// Job has finished with an error.
pub const STATUS_FAILED: &str = "failed";

/// Statuses after which no further events are expected for a job.
pub const TERMINAL_STATUSES: [&str; 2] = [STATUS_COMPLETED, STATUS_FAILED];

/// Whether `status` ends a job's lifecycle.
pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Point-in-time view of a job.
///
/// Snapshots built from broadcast events reflect only the most recent
/// event: status and progress are never merged with earlier events and
/// `task_output` / `error_message` are always `None`. Only an HTTP lookup
/// fills those two fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub task_type: String,
    pub status: String,
    /// Completion percentage (0-100).
    pub progress: u8,
    pub created_at: TimestampMs,
    #[serde(default)]
    pub task_output: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobSnapshot {
    /// Build an event-derived snapshot.
    ///
    /// `progress` is clamped into `0..=100`; non-finite values become 0.
    pub fn from_event(
        job_id: impl Into<String>,
        task_type: impl Into<String>,
        status: impl Into<String>,
        progress: Option<f64>,
        created_at: TimestampMs,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            task_type: task_type.into(),
            status: status.into(),
            progress: clamp_progress(progress),
            created_at,
            task_output: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal(&self.status)
    }
}

fn clamp_progress(progress: Option<f64>) -> u8 {
    match progress {
        Some(p) if p.is_finite() => p.clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(is_terminal("completed"));
        assert!(is_terminal("failed"));
        assert!(!is_terminal("processing"));
        assert!(!is_terminal("queued"));
    }

    #[test]
    fn progress_is_clamped() {
        let over = JobSnapshot::from_event("j", "t", "processing", Some(250.0), 0);
        assert_eq!(over.progress, 100);
        let under = JobSnapshot::from_event("j", "t", "processing", Some(-3.0), 0);
        assert_eq!(under.progress, 0);
        let frac = JobSnapshot::from_event("j", "t", "processing", Some(42.9), 0);
        assert_eq!(frac.progress, 42);
    }

    #[test]
    fn missing_progress_is_zero() {
        let snap = JobSnapshot::from_event("j", "t", "queued", None, 5);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.created_at, 5);
        assert!(snap.task_output.is_none());
        assert!(!snap.is_terminal());
    }
}
