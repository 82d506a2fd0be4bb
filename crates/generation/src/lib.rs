//! Client-side orchestration of long-running keepsake generation jobs.
//!
//! [`orchestrator::JobOrchestrator`] submits a multipart job to the
//! generation service, then supervises it through a single status-polling
//! loop ([`poll`]) until the service reports a terminal status or the job
//! is cancelled. All state lands in a [`store::JobStore`] that UI code
//! reads and subscribes to.

pub mod api;
pub mod config;
pub mod messages;
pub mod orchestrator;
pub mod poll;
pub mod store;
