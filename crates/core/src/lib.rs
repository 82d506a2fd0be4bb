//! Domain types for the invitation keepsake generation workflow.
//!
//! Holds the job input model, the lifecycle phases shared by the
//! orchestrator and its readers, and the status normalizer that turns
//! remote status strings into a closed set of canonical phases.

pub mod error;
pub mod job;
pub mod phase;
pub mod types;
