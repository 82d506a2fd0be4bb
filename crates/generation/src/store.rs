//! Shared job state container.
//!
//! [`JobStore`] holds the single [`JobState`] record plus a snapshot of the
//! last submitted [`JobInput`]. Anyone may read or subscribe; only this
//! crate writes, and every write from a poll loop or a submission goes
//! through [`JobStore::write_if_active`], which checks the attempt's
//! cancellation token under the write lock. Cancelling the token before
//! taking the lock (see [`JobStore::cancel`]) therefore guarantees that no
//! stale response lands after a cancellation.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keepsake_core::job::{JobInput, JobState};
use keepsake_core::phase::JobPhase;
use keepsake_core::types::AttemptId;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Broadcast buffer for state change notifications.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Message recorded when a job is cancelled by the user or by teardown.
pub const CANCELED_MESSAGE: &str = "Generation was canceled";

/// Why an active job is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// User cancellation or owner teardown. Ends in `CANCELED`.
    #[default]
    Canceled,
    /// Quietly return to `IDLE`, e.g. when the form is cleared.
    Reset,
}

impl CancelReason {
    pub fn phase(self) -> JobPhase {
        match self {
            CancelReason::Canceled => JobPhase::Canceled,
            CancelReason::Reset => JobPhase::Idle,
        }
    }
}

/// Observable store for the current generation job.
pub struct JobStore {
    state: RwLock<JobState>,
    last_input: RwLock<Option<Arc<JobInput>>>,
    sender: broadcast::Sender<JobState>,
}

impl JobStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(JobState::default()),
            last_input: RwLock::new(None),
            sender,
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> JobState {
        self.read().clone()
    }

    pub fn phase(&self) -> JobPhase {
        self.read().phase
    }

    /// The input of the most recent `start`, if any.
    pub fn last_input(&self) -> Option<Arc<JobInput>> {
        self.last_input
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Receive every state written from now on.
    ///
    /// Slow receivers that fall more than the channel capacity behind see
    /// `RecvError::Lagged` and should re-read [`snapshot`](Self::snapshot).
    pub fn subscribe(&self) -> broadcast::Receiver<JobState> {
        self.sender.subscribe()
    }

    // ---- writers (crate-private) ----

    /// Reset the record for a new attempt.
    ///
    /// An attempt that was still submitting or polling is first published
    /// as `CANCELED`; `DONE` and `FAILED` are left alone.
    pub(crate) fn begin_attempt(&self, input: Arc<JobInput>, attempt_id: AttemptId) -> JobState {
        *self.last_input.write().unwrap_or_else(|e| e.into_inner()) = Some(input);

        let mut state = self.write();
        if state.phase.is_active() {
            state.phase = JobPhase::Canceled;
            state.status_message = Some(CANCELED_MESSAGE.to_string());
            self.publish(&state);
        }

        *state = JobState {
            phase: JobPhase::Submitted,
            started_at: Some(chrono::Utc::now()),
            attempt_id: Some(attempt_id),
            ..JobState::default()
        };
        self.publish(&state);
        state.clone()
    }

    /// Apply `update` only if `token` is still live and the record has not
    /// reached a terminal phase. Returns `None` when the write was discarded.
    pub(crate) fn write_if_active<R>(
        &self,
        token: &CancellationToken,
        update: impl FnOnce(&mut JobState) -> R,
    ) -> Option<R> {
        let mut state = self.write();
        if token.is_cancelled() || state.phase.is_terminal() {
            return None;
        }
        let result = update(&mut state);
        self.publish(&state);
        Some(result)
    }

    /// Move a live job to `reason`'s phase. `DONE` and `FAILED` win.
    ///
    /// Returns `true` if the record changed.
    pub(crate) fn cancel(&self, reason: CancelReason) -> bool {
        let mut state = self.write();
        if state.phase.is_settled() {
            return false;
        }

        state.phase = reason.phase();
        if reason == CancelReason::Canceled {
            state.status_message = Some(CANCELED_MESSAGE.to_string());
        }
        self.publish(&state);
        true
    }

    // ---- private helpers ----

    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Ignore the SendError; it only means there are zero receivers.
    fn publish(&self, state: &JobState) {
        let _ = self.sender.send(state.clone());
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
