//! REST client for the keepsake generation service.
//!
//! [`JobService`] is the seam the orchestrator talks through: one
//! multipart submission call and one status call. [`GenerationApi`]
//! implements it over [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use keepsake_core::job::{Asset, JobInput};
use reqwest::multipart::{Form, Part};

use crate::messages::{parse_submit_body, StatusResponse, SubmitResponse};

/// Multipart field carrying the primary asset.
pub const PRIMARY_ASSET_FIELD: &str = "primary_asset";
/// Multipart field repeated once per secondary asset.
pub const SECONDARY_ASSETS_FIELD: &str = "secondary_assets";
/// Placeholder in a status path that is replaced by the job id.
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

/// Errors from the generation REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("Malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The two remote calls a generation job needs.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload the job's assets to `path`.
    async fn submit(&self, path: &str, input: &JobInput) -> Result<SubmitResponse, ApiError>;

    /// Fetch the current status from `path`, keyed by `job_id` when the
    /// service assigned one.
    async fn fetch_status(
        &self,
        path: &str,
        job_id: Option<&str>,
    ) -> Result<StatusResponse, ApiError>;
}

/// HTTP client for a single generation service.
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
}

impl GenerationApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8080`.
    /// * `timeout` - Per-request timeout; `None` leaves only the
    ///   transport's own limits in place.
    pub fn new(api_url: String, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Build the multipart form: one primary part, then one part per
    /// secondary asset under the same field name.
    fn build_form(input: &JobInput) -> Result<Form, ApiError> {
        let mut form = Form::new();
        if let Some(primary) = &input.primary {
            form = form.part(PRIMARY_ASSET_FIELD, Self::asset_part(primary)?);
        }
        for asset in &input.secondary {
            form = form.part(SECONDARY_ASSETS_FIELD, Self::asset_part(asset)?);
        }
        Ok(form)
    }

    fn asset_part(asset: &Asset) -> Result<Part, ApiError> {
        Ok(Part::bytes(asset.data.clone())
            .file_name(asset.file_name.clone())
            .mime_str(&asset.content_type)?)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobService for GenerationApi {
    /// Sends `POST {api_url}{path}` with the assets as multipart parts.
    /// An empty success body is a valid acknowledgement.
    async fn submit(&self, path: &str, input: &JobInput) -> Result<SubmitResponse, ApiError> {
        let form = Self::build_form(input)?;

        let response = self.client.post(self.url(path)).multipart(form).send().await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;

        Ok(parse_submit_body(&body)?)
    }

    /// Sends `GET {api_url}{path}`, substituting the job id into the path
    /// when it contains [`JOB_ID_PLACEHOLDER`].
    async fn fetch_status(
        &self,
        path: &str,
        job_id: Option<&str>,
    ) -> Result<StatusResponse, ApiError> {
        let response = self
            .client
            .get(self.url(&status_path(path, job_id)))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        Ok(response.json::<StatusResponse>().await?)
    }
}

/// Resolve the status path for a job.
///
/// Without a job id, or without a placeholder, the path is used as is and
/// the service keys the request by its own session context.
pub fn status_path(path: &str, job_id: Option<&str>) -> String {
    match job_id {
        Some(id) if path.contains(JOB_ID_PLACEHOLDER) => path.replace(JOB_ID_PLACEHOLDER, id),
        _ => path.to_string(),
    }
}
