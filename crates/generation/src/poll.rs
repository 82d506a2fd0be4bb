//! Status-polling loop for a submitted generation job.
//!
//! [`PollController`] owns the one [`PollLoopHandle`] that may exist at a
//! time: a cancellation token shared by the attempt's submission and its
//! polling task, plus the task's join handle. Installing a new handle
//! disposes the previous one under the same lock, before the caller issues
//! any new I/O.
//!
//! The loop itself ([`PollLoop::run`]) is an explicit `loop` that fetches a
//! status, normalizes it, writes the store, and sleeps for the interval
//! until a terminal status arrives or the token is cancelled. Request
//! errors are retried on the next tick and never change the phase.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use keepsake_core::job::JobState;
use keepsake_core::phase::{normalize_status, CanonicalPhase, JobPhase};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::JobService;
use crate::messages::StatusResponse;
use crate::store::JobStore;

/// Error message stored when the service reports failure without one.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Generation failed";

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// How the poll delay grows after consecutive request errors.
///
/// A multiplier of `1.0` keeps the fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBackoff {
    /// Factor by which the delay grows after each further error.
    pub multiplier: f64,
    /// Upper bound on the grown delay.
    pub max_delay: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Calculate the next delay after another consecutive error.
///
/// The result is clamped to [`PollBackoff::max_delay`] but never drops
/// below `current`.
pub fn next_delay(current: Duration, backoff: &PollBackoff) -> Duration {
    let next_ms = (current.as_millis() as f64 * backoff.multiplier) as u64;
    Duration::from_millis(next_ms)
        .min(backoff.max_delay)
        .max(current)
}

// ---------------------------------------------------------------------------
// State transition
// ---------------------------------------------------------------------------

/// What a poll tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Non-terminal status; schedule another tick.
    Continue,
    /// `DONE` or `FAILED` was written; the loop ends.
    Terminal,
}

/// Apply one normalized status response to the job state.
///
/// - `Done` stores the final references (keeping early previews if the
///   response has none) and the message.
/// - `Failed` stores the service's message, or [`DEFAULT_FAILURE_MESSAGE`].
/// - Anything else, including unrecognized tokens, moves the job to
///   `RUNNING` and records progress.
pub fn apply_status(
    state: &mut JobState,
    status: &CanonicalPhase,
    response: StatusResponse,
) -> TickOutcome {
    if let Some(job_id) = response.job_id {
        state.job_id = Some(job_id);
    }

    match status {
        CanonicalPhase::Done => {
            state.phase = JobPhase::Done;
            if let Some(refs) = response.result_references {
                state.result_assets = refs;
            }
            if response.message.is_some() {
                state.status_message = response.message;
            }
            TickOutcome::Terminal
        }
        CanonicalPhase::Failed => {
            state.phase = JobPhase::Failed;
            state.error_message = Some(
                response
                    .message
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            );
            TickOutcome::Terminal
        }
        CanonicalPhase::Pending | CanonicalPhase::Running | CanonicalPhase::Unrecognized(_) => {
            state.phase = JobPhase::Running;
            if response.message.is_some() {
                state.status_message = response.message;
            }
            if let Some(refs) = response.result_references.filter(|r| !r.is_empty()) {
                state.result_assets = refs;
            }
            TickOutcome::Continue
        }
    }
}

// ---------------------------------------------------------------------------
// Loop handle
// ---------------------------------------------------------------------------

/// The live polling loop of one attempt.
pub struct PollLoopHandle {
    id: u64,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollLoopHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the in-flight request and the pending timer.
    fn dispose(self) {
        self.token.cancel();
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Identity of an attempt, handed to the code that drives it.
#[derive(Debug, Clone)]
pub struct PollTicket {
    pub id: u64,
    pub token: CancellationToken,
}

/// Owner of the single [`PollLoopHandle`] slot.
#[derive(Default)]
pub struct PollController {
    slot: Mutex<Option<PollLoopHandle>>,
    next_id: AtomicU64,
}

impl PollController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handle is installed (an attempt is submitting or polling).
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn active_id(&self) -> Option<u64> {
        self.lock().as_ref().map(PollLoopHandle::id)
    }

    /// Dispose the current handle, install a fresh one, and run `f` while
    /// still holding the slot lock.
    pub(crate) fn install<R>(&self, f: impl FnOnce() -> R) -> (PollTicket, R) {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            tracing::debug!(loop_id = previous.id(), "Disposing superseded poll loop");
            previous.dispose();
        }

        let ticket = PollTicket {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            token: CancellationToken::new(),
        };
        *slot = Some(PollLoopHandle {
            id: ticket.id,
            token: ticket.token.clone(),
            task: None,
        });

        let result = f();
        (ticket, result)
    }

    /// Dispose the current handle, if any, and run `f` while still holding
    /// the slot lock. Returns whether a handle was disposed.
    pub(crate) fn stop<R>(&self, f: impl FnOnce() -> R) -> (bool, R) {
        let mut slot = self.lock();
        let disposed = match slot.take() {
            Some(handle) => {
                tracing::debug!(loop_id = handle.id(), "Disposing poll loop");
                handle.dispose();
                true
            }
            None => false,
        };
        (disposed, f())
    }

    /// Drop the handle for `id` once its attempt has finished on its own.
    pub(crate) fn release(&self, id: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|h| h.id == id) {
            if let Some(handle) = slot.take() {
                handle.token.cancel();
            }
        }
    }

    /// Spawn the polling task for `ticket` and attach it to the handle.
    ///
    /// If the attempt was superseded in the meantime the task is aborted
    /// straight away.
    pub(crate) fn spawn(&self, poll: PollLoop) {
        let id = poll.ticket.id;
        let task = tokio::spawn(poll.run());

        let mut slot = self.lock();
        match slot.as_mut() {
            Some(handle) if handle.id == id => handle.task = Some(task),
            _ => task.abort(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PollLoopHandle>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Everything a polling task needs.
pub(crate) struct PollLoop {
    pub service: Arc<dyn JobService>,
    pub store: Arc<JobStore>,
    pub controller: Arc<PollController>,
    pub ticket: PollTicket,
    pub status_path: String,
    pub interval: Duration,
    pub backoff: PollBackoff,
}

impl PollLoop {
    /// Poll until a terminal status is written or the token is cancelled.
    ///
    /// The first tick runs immediately.
    pub(crate) async fn run(self) {
        let token = &self.ticket.token;
        let loop_id = self.ticket.id;
        let mut delay = self.interval;
        let mut consecutive_errors: u32 = 0;
        let mut unrecognized: HashSet<String> = HashSet::new();

        tracing::debug!(
            loop_id,
            interval_ms = self.interval.as_millis() as u64,
            "Poll loop started",
        );

        loop {
            let job_id = self.store.snapshot().job_id;

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(loop_id, "Poll loop cancelled during status request");
                    return;
                }
                result = self.service.fetch_status(&self.status_path, job_id.as_deref()) => result,
            };

            match result {
                Ok(response) => {
                    consecutive_errors = 0;
                    delay = self.interval;

                    let status = normalize_status(&response.status);
                    if let CanonicalPhase::Unrecognized(raw) = &status {
                        if unrecognized.insert(raw.clone()) {
                            tracing::warn!(
                                loop_id,
                                status = %raw,
                                "Unrecognized generation status, treating as running",
                            );
                        }
                    }

                    let outcome = self
                        .store
                        .write_if_active(token, |state| apply_status(state, &status, response));

                    match outcome {
                        Some(TickOutcome::Continue) => {
                            tracing::trace!(loop_id, status = %status, "Generation still running");
                        }
                        Some(TickOutcome::Terminal) => {
                            tracing::info!(
                                loop_id,
                                job_id = ?job_id,
                                status = %status,
                                "Generation reached a terminal status",
                            );
                            self.controller.release(loop_id);
                            return;
                        }
                        None => {
                            tracing::debug!(loop_id, "Discarding status for inactive poll loop");
                            return;
                        }
                    }
                }
                Err(e) => {
                    if token.is_cancelled() {
                        return;
                    }
                    consecutive_errors += 1;
                    if consecutive_errors > 1 {
                        delay = next_delay(delay, &self.backoff);
                    }
                    tracing::warn!(
                        loop_id,
                        consecutive_errors,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Status request failed, retrying",
                    );
                }
            }

            // Wait before the next tick, respecting cancellation.
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(loop_id, "Poll loop cancelled while waiting");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
