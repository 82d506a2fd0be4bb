//! Generation job orchestrator.
//!
//! [`JobOrchestrator`] is the public entry point used by the invitation
//! workflow. [`start`](JobOrchestrator::start) validates the input,
//! supersedes whatever attempt was live, submits the assets, and hands the
//! accepted job to a polling task. [`cancel`](JobOrchestrator::cancel)
//! stops the live attempt. Dropping the orchestrator cancels it too, so no
//! timer or request outlives its owner.
//!
//! Only validation and submission errors are returned to the caller.
//! Everything that happens after submission is reported through the
//! [`JobStore`].

use std::sync::Arc;

use keepsake_core::error::CoreError;
use keepsake_core::job::{JobInput, JobState};
use keepsake_core::phase::JobPhase;
use keepsake_core::types::AttemptId;
use tokio::sync::broadcast;

use crate::api::{ApiError, GenerationApi, JobService};
use crate::config::{GenerationConfig, StartOptions};
use crate::poll::{PollController, PollLoop};
use crate::store::{CancelReason, JobStore};

/// Errors returned by [`JobOrchestrator::start`] and
/// [`JobOrchestrator::restart`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The input was rejected before any network call.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The submission request failed; the job is marked `FAILED`.
    #[error("Generation submission failed: {0}")]
    Submission(#[from] ApiError),
}

/// Drives generation jobs against one generation service.
pub struct JobOrchestrator {
    service: Arc<dyn JobService>,
    store: Arc<JobStore>,
    controller: Arc<PollController>,
    config: GenerationConfig,
}

impl JobOrchestrator {
    /// Create an orchestrator with its own, fresh [`JobStore`].
    pub fn new(service: Arc<dyn JobService>, config: GenerationConfig) -> Self {
        Self::with_store(service, config, Arc::new(JobStore::new()))
    }

    /// Create an orchestrator that writes into an existing store.
    pub fn with_store(
        service: Arc<dyn JobService>,
        config: GenerationConfig,
        store: Arc<JobStore>,
    ) -> Self {
        Self {
            service,
            store,
            controller: Arc::new(PollController::new()),
            config,
        }
    }

    /// Create an orchestrator backed by [`GenerationApi`] at
    /// `config.api_url`.
    pub fn from_config(config: GenerationConfig) -> Result<Self, ApiError> {
        let api = GenerationApi::new(config.api_url.clone(), config.request_timeout())?;
        Ok(Self::new(Arc::new(api), config))
    }

    pub fn store(&self) -> Arc<JobStore> {
        Arc::clone(&self.store)
    }

    /// A copy of the current job state.
    pub fn state(&self) -> JobState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobState> {
        self.store.subscribe()
    }

    /// Whether an attempt is still submitting or polling.
    pub fn is_polling(&self) -> bool {
        self.controller.is_active()
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Start a new generation job.
    ///
    /// Fails with [`JobError::Validation`] before touching state or the
    /// network if the primary asset is missing, there are too many
    /// secondary assets, or `options` carries a zero poll interval. Otherwise any live attempt is cancelled, the state
    /// is reset to `SUBMITTED`, and the assets are uploaded. A submission
    /// failure marks the job `FAILED` and is returned as
    /// [`JobError::Submission`]. If this attempt is superseded while its
    /// submission is in flight, it returns `Ok(())` without touching state.
    pub async fn start(&self, input: JobInput, options: StartOptions) -> Result<(), JobError> {
        input.validate()?;
        options.validate()?;
        self.run_attempt(Arc::new(input), options).await
    }

    /// Submit the input of the most recent `start` again.
    pub async fn restart(&self, options: StartOptions) -> Result<(), JobError> {
        options.validate()?;
        let input = self.store.last_input().ok_or_else(|| {
            CoreError::Validation("No previous generation job to restart".to_string())
        })?;
        self.run_attempt(input, options).await
    }

    /// Cancel the live attempt, ending in `CANCELED`.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Canceled);
    }

    /// Cancel the live attempt for `reason`.
    ///
    /// Idempotent. The in-flight request is abandoned and the pending tick
    /// cleared. `DONE` and `FAILED` are never overwritten.
    pub fn cancel_with(&self, reason: CancelReason) {
        let (disposed, changed) = self.controller.stop(|| self.store.cancel(reason));
        tracing::info!(?reason, disposed, changed, "Generation cancel requested");
    }

    // ---- private helpers ----

    async fn run_attempt(&self, input: Arc<JobInput>, options: StartOptions) -> Result<(), JobError> {
        let options = self.config.resolve(options);
        let attempt_id = AttemptId::now_v7();

        let (ticket, _) = self
            .controller
            .install(|| self.store.begin_attempt(Arc::clone(&input), attempt_id));

        tracing::info!(
            %attempt_id,
            loop_id = ticket.id,
            secondary_assets = input.secondary.len(),
            submit_path = %options.submit_path,
            "Submitting generation job",
        );

        let result = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => {
                tracing::debug!(%attempt_id, "Generation attempt superseded during submission");
                return Ok(());
            }
            result = self.service.submit(&options.submit_path, &input) => result,
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(%attempt_id, error = %e, "Generation submission failed");
                let message = e.to_string();
                let recorded = self.store.write_if_active(&ticket.token, |state| {
                    state.phase = JobPhase::Failed;
                    state.error_message = Some(message);
                });
                self.controller.release(ticket.id);
                if recorded.is_none() {
                    tracing::debug!(%attempt_id, "Discarding submission error for inactive attempt");
                    return Ok(());
                }
                return Err(JobError::Submission(e));
            }
        };

        let accepted = self.store.write_if_active(&ticket.token, |state| {
            state.phase = JobPhase::Pending;
            if ack.job_id.is_some() {
                state.job_id = ack.job_id;
            }
            if let Some(refs) = ack.result_references.filter(|r| !r.is_empty()) {
                state.result_assets = refs;
            }
            if ack.message.is_some() {
                state.status_message = ack.message;
            }
            state.job_id.clone()
        });

        let Some(job_id) = accepted else {
            tracing::debug!(%attempt_id, "Discarding submission response for inactive attempt");
            return Ok(());
        };

        tracing::info!(
            %attempt_id,
            loop_id = ticket.id,
            job_id = ?job_id,
            "Generation job accepted, polling for status",
        );

        self.controller.spawn(PollLoop {
            service: Arc::clone(&self.service),
            store: Arc::clone(&self.store),
            controller: Arc::clone(&self.controller),
            ticket,
            status_path: options.status_path,
            interval: options.interval,
            backoff: options.backoff,
        });

        Ok(())
    }
}

impl Drop for JobOrchestrator {
    /// Teardown hook: the owner is gone, so nothing it started may keep
    /// running.
    fn drop(&mut self) {
        self.cancel_with(CancelReason::Canceled);
    }
}
