//! Generation client configuration.
//!
//! [`GenerationConfig`] carries the environment's defaults;
//! [`StartOptions`] carries the per-call overrides passed to
//! [`JobOrchestrator::start`](crate::orchestrator::JobOrchestrator::start).

use std::time::Duration;

use keepsake_core::error::CoreError;

use crate::poll::PollBackoff;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_SUBMIT_PATH: &str = "/api/invitations/model/generate";
const DEFAULT_STATUS_PATH: &str = "/api/invitations/model/status";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Generation service configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Base HTTP URL of the generation service.
    pub api_url: String,
    /// Default submission path.
    pub submit_path: String,
    /// Default status path. May contain `{job_id}`.
    pub status_path: String,
    /// Default delay between poll ticks.
    pub poll_interval: Duration,
    /// Per-request timeout. Zero disables it.
    pub request_timeout: Duration,
    /// Delay growth after consecutive poll request errors.
    pub backoff: PollBackoff,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            submit_path: DEFAULT_SUBMIT_PATH.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            backoff: PollBackoff {
                multiplier: DEFAULT_BACKOFF_MULTIPLIER,
                max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            },
        }
    }
}

impl GenerationConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default                            |
    /// |--------------------------------------|------------------------------------|
    /// | `GENERATION_API_URL`                 | `http://localhost:8080`            |
    /// | `GENERATION_SUBMIT_PATH`             | `/api/invitations/model/generate`  |
    /// | `GENERATION_STATUS_PATH`             | `/api/invitations/model/status`    |
    /// | `GENERATION_POLL_INTERVAL_MS`        | `3000`                             |
    /// | `GENERATION_REQUEST_TIMEOUT_SECS`    | `30`                               |
    /// | `GENERATION_POLL_BACKOFF_MULTIPLIER` | `1.0`                              |
    /// | `GENERATION_POLL_MAX_DELAY_MS`       | `30000`                            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("GENERATION_API_URL").unwrap_or(defaults.api_url);
        let submit_path = lookup("GENERATION_SUBMIT_PATH").unwrap_or(defaults.submit_path);
        let status_path = lookup("GENERATION_STATUS_PATH").unwrap_or(defaults.status_path);

        let poll_interval_ms: u64 = parse_var(
            &lookup,
            "GENERATION_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            "a positive integer",
        )?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "GENERATION_POLL_INTERVAL_MS",
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }

        let request_timeout_secs: u64 = parse_var(
            &lookup,
            "GENERATION_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            "a non-negative integer",
        )?;

        let multiplier: f64 = parse_var(
            &lookup,
            "GENERATION_POLL_BACKOFF_MULTIPLIER",
            DEFAULT_BACKOFF_MULTIPLIER,
            "a number >= 1.0",
        )?;
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(ConfigError::Invalid {
                var: "GENERATION_POLL_BACKOFF_MULTIPLIER",
                expected: "a number >= 1.0",
                value: multiplier.to_string(),
            });
        }

        let max_delay_ms: u64 = parse_var(
            &lookup,
            "GENERATION_POLL_MAX_DELAY_MS",
            DEFAULT_MAX_DELAY_MS,
            "a non-negative integer",
        )?;

        Ok(Self {
            api_url,
            submit_path,
            status_path,
            poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            backoff: PollBackoff {
                multiplier,
                max_delay: Duration::from_millis(max_delay_ms),
            },
        })
    }

    /// The request timeout to configure on the HTTP client, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }

    /// Fill the unset fields of `options` from these defaults.
    pub fn resolve(&self, options: StartOptions) -> ResolvedOptions {
        ResolvedOptions {
            submit_path: options.submit_path.unwrap_or_else(|| self.submit_path.clone()),
            status_path: options.status_path.unwrap_or_else(|| self.status_path.clone()),
            interval: options.interval.unwrap_or(self.poll_interval),
            backoff: self.backoff.clone(),
        }
    }
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
    }
}

/// Per-call overrides for [`JobOrchestrator::start`](crate::orchestrator::JobOrchestrator::start).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub submit_path: Option<String>,
    pub status_path: Option<String>,
    pub interval: Option<Duration>,
}

impl StartOptions {
    pub fn submit_path(mut self, path: impl Into<String>) -> Self {
        self.submit_path = Some(path.into());
        self
    }

    pub fn status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Reject overrides the environment config would also reject.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval.is_some_and(|interval| interval.is_zero()) {
            return Err(CoreError::Validation(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// [`StartOptions`] with every field filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub submit_path: String,
    pub status_path: String,
    pub interval: Duration,
    pub backoff: PollBackoff,
}
