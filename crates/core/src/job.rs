//! Generation job input and the shared job state record.

use serde::Serialize;

use crate::error::CoreError;
use crate::phase::JobPhase;
use crate::types::{AttemptId, Timestamp};

/// Maximum number of optional secondary assets per submission.
pub const MAX_SECONDARY_ASSETS: usize = 2;

/// Content type sent when the file extension is not recognised.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One uploaded file attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Build an asset whose content type is inferred from the file name.
    pub fn from_file_name(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name);
        Self::new(file_name, content_type, data)
    }
}

/// Infer an image content type from a file extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Inputs for one generation attempt.
///
/// `primary` is optional at the type level so that an incomplete form can
/// be handed straight to the orchestrator, which rejects it in
/// [`JobInput::validate`] before any network call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInput {
    pub primary: Option<Asset>,
    pub secondary: Vec<Asset>,
}

impl JobInput {
    pub fn new(primary: Asset) -> Self {
        Self {
            primary: Some(primary),
            secondary: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, asset: Asset) -> Self {
        self.secondary.push(asset);
        self
    }

    /// Check the submission preconditions.
    ///
    /// - A primary asset must be present.
    /// - At most [`MAX_SECONDARY_ASSETS`] secondary assets are allowed.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.primary.is_none() {
            return Err(CoreError::Validation(
                "A primary asset is required to start generation".to_string(),
            ));
        }
        if self.secondary.len() > MAX_SECONDARY_ASSETS {
            return Err(CoreError::Validation(format!(
                "At most {MAX_SECONDARY_ASSETS} secondary assets are allowed, got {}",
                self.secondary.len()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The single source of truth for the current generation job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobState {
    pub phase: JobPhase,
    /// Identifier assigned by the remote service, once known.
    pub job_id: Option<String>,
    /// Result references in the order the service reported them.
    pub result_assets: Vec<String>,
    pub error_message: Option<String>,
    /// Free-text progress message from the service.
    pub status_message: Option<String>,
    /// Set at submission. Diagnostics only.
    pub started_at: Option<Timestamp>,
    pub attempt_id: Option<AttemptId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
