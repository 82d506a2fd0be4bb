//! Job lifecycle phases and remote status normalization.
//!
//! [`JobPhase`] is the state machine the orchestrator drives.
//! [`CanonicalPhase`] is what the generation service reports, after
//! [`normalize_status`] has folded its synonyms together at the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job phase
// ---------------------------------------------------------------------------

/// Stage of a generation job as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    /// No job has been started yet (or the last one was reset).
    #[default]
    Idle,
    /// The submission request is in flight.
    Submitted,
    /// The service accepted the job; no status has been observed yet.
    Pending,
    /// The service reported a non-terminal status.
    Running,
    /// The service reported success.
    Done,
    /// Submission failed or the service reported failure.
    Failed,
    /// The job was cancelled locally.
    Canceled,
}

impl JobPhase {
    /// `Done` and `Failed` may never be overwritten by a poll response or a
    /// cancellation. Only a new `start` replaces them.
    pub fn is_settled(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed)
    }

    /// True for every phase after which the current attempt does nothing more.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed | JobPhase::Canceled)
    }

    /// True while an attempt is submitting or being polled.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobPhase::Submitted | JobPhase::Pending | JobPhase::Running
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Idle => "IDLE",
            JobPhase::Submitted => "SUBMITTED",
            JobPhase::Pending => "PENDING",
            JobPhase::Running => "RUNNING",
            JobPhase::Done => "DONE",
            JobPhase::Failed => "FAILED",
            JobPhase::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Remote status
// ---------------------------------------------------------------------------

/// A remote status token after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalPhase {
    Pending,
    Running,
    Done,
    Failed,
    /// A token the normalizer does not know, uppercased. Treated as
    /// non-terminal so a new server-side status never ends a job early.
    Unrecognized(String),
}

impl CanonicalPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalPhase::Done | CanonicalPhase::Failed)
    }
}

impl fmt::Display for CanonicalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalPhase::Pending => f.write_str("PENDING"),
            CanonicalPhase::Running => f.write_str("RUNNING"),
            CanonicalPhase::Done => f.write_str("DONE"),
            CanonicalPhase::Failed => f.write_str("FAILED"),
            CanonicalPhase::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// Status tokens reported while a job waits for a worker.
pub const PENDING_STATUSES: &[&str] = &["PENDING", "QUEUED", "WAITING"];
/// Status tokens reported while a job executes.
pub const RUNNING_STATUSES: &[&str] = &["RUNNING", "PROCESSING", "IN_PROGRESS"];
/// Status tokens reported on success.
pub const DONE_STATUSES: &[&str] = &["DONE", "COMPLETED", "SUCCESS"];
/// Status tokens reported on failure.
pub const FAILED_STATUSES: &[&str] = &["FAILED", "ERROR"];

/// Map a raw, case-insensitive status token onto a [`CanonicalPhase`].
///
/// Surrounding whitespace is ignored. Unknown tokens come back as
/// [`CanonicalPhase::Unrecognized`] holding the uppercased token.
pub fn normalize_status(raw: &str) -> CanonicalPhase {
    let token = raw.trim().to_ascii_uppercase();

    if PENDING_STATUSES.contains(&token.as_str()) {
        CanonicalPhase::Pending
    } else if RUNNING_STATUSES.contains(&token.as_str()) {
        CanonicalPhase::Running
    } else if DONE_STATUSES.contains(&token.as_str()) {
        CanonicalPhase::Done
    } else if FAILED_STATUSES.contains(&token.as_str()) {
        CanonicalPhase::Failed
    } else {
        CanonicalPhase::Unrecognized(token)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
