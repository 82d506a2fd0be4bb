//! Wire types for the generation service.
//!
//! The service speaks camelCase JSON (`resultReferences`, `jobId`);
//! snake_case spellings are accepted as aliases. A submission may be
//! acknowledged with an empty body, which parses as a default
//! [`SubmitResponse`].

use serde::Deserialize;

/// Body returned by the submission endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitResponse {
    /// Identifier assigned to the queued job, if the service exposes one.
    #[serde(alias = "job_id")]
    pub job_id: Option<String>,
    /// Early partial results (e.g. preview renders).
    #[serde(alias = "result_references")]
    pub result_references: Option<Vec<String>>,
    pub message: Option<String>,
    pub status: Option<String>,
}

/// Body returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Raw status token. Normalized by the poll loop, never matched here.
    pub status: String,
    #[serde(default, alias = "result_references")]
    pub result_references: Option<Vec<String>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "job_id")]
    pub job_id: Option<String>,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            result_references: None,
            message: None,
            job_id: None,
        }
    }

    pub fn with_results<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_references = Some(refs.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Parse a submission body, treating an empty (or whitespace) body as a
/// bare acknowledgement.
pub fn parse_submit_body(body: &str) -> Result<SubmitResponse, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(SubmitResponse::default());
    }
    serde_json::from_str(body)
}
