//! Scripted [`JobService`] used by the orchestrator integration tests.
//!
//! Each call pops the next [`Step`] from its script. An empty submission
//! script acknowledges with an empty body; an empty status script never
//! answers, which parks the poll loop on an in-flight request.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keepsake_core::job::{Asset, JobInput};
use keepsake_generation::api::{ApiError, JobService};
use keepsake_generation::config::GenerationConfig;
use keepsake_generation::messages::{StatusResponse, SubmitResponse};
use tokio::sync::oneshot;

/// Poll interval used by every test orchestrator.
pub const INTERVAL: Duration = Duration::from_secs(1);

/// One scripted reply.
pub enum Step<T> {
    Reply(T),
    /// Connection-level failure.
    Transport,
    /// Non-2xx response.
    Status(u16, &'static str),
    /// Answer once the paired sender fires; hang if it is dropped.
    Wait(oneshot::Receiver<T>),
}

#[derive(Default)]
pub struct ScriptedService {
    submits: Mutex<VecDeque<Step<SubmitResponse>>>,
    statuses: Mutex<VecDeque<Step<StatusResponse>>>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    submit_paths: Mutex<Vec<String>>,
    status_requests: Mutex<Vec<(String, Option<String>)>>,
    submitted_files: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, step: Step<SubmitResponse>) {
        self.submits.lock().unwrap().push_back(step);
    }

    pub fn push_status(&self, step: Step<StatusResponse>) {
        self.statuses.lock().unwrap().push_back(step);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Status requests currently awaiting an answer.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submit_paths(&self) -> Vec<String> {
        self.submit_paths.lock().unwrap().clone()
    }

    pub fn status_requests(&self) -> Vec<(String, Option<String>)> {
        self.status_requests.lock().unwrap().clone()
    }

    pub fn submitted_files(&self) -> Vec<String> {
        self.submitted_files.lock().unwrap().clone()
    }
}

/// Decrements the in-flight counter when a status request finishes or is
/// dropped mid-flight.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn play<T>(step: Step<T>) -> Result<T, ApiError> {
    match step {
        Step::Reply(value) => Ok(value),
        Step::Transport => Err(transport_error().await),
        Step::Status(status, body) => Err(ApiError::ApiError {
            status,
            body: body.to_string(),
        }),
        Step::Wait(rx) => match rx.await {
            Ok(value) => Ok(value),
            Err(_) => std::future::pending().await,
        },
    }
}

#[async_trait]
impl JobService for ScriptedService {
    async fn submit(&self, path: &str, input: &JobInput) -> Result<SubmitResponse, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit_paths.lock().unwrap().push(path.to_string());
        if let Some(primary) = &input.primary {
            self.submitted_files
                .lock()
                .unwrap()
                .push(primary.file_name.clone());
        }

        let step = self.submits.lock().unwrap().pop_front();
        match step {
            Some(step) => play(step).await,
            None => Ok(SubmitResponse::default()),
        }
    }

    async fn fetch_status(
        &self,
        path: &str,
        job_id: Option<&str>,
    ) -> Result<StatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_requests
            .lock()
            .unwrap()
            .push((path.to_string(), job_id.map(str::to_string)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let step = self.statuses.lock().unwrap().pop_front();
        match step {
            Some(step) => play(step).await,
            None => std::future::pending().await,
        }
    }
}

/// A genuine `reqwest` transport error: the request never leaves the
/// client because the URL does not parse.
pub async fn transport_error() -> ApiError {
    let err = reqwest::Client::new()
        .get("not a url")
        .send()
        .await
        .expect_err("an unparseable URL must fail");
    ApiError::Request(err)
}

pub fn config() -> GenerationConfig {
    GenerationConfig {
        poll_interval: INTERVAL,
        ..GenerationConfig::default()
    }
}

pub fn input(name: &str) -> JobInput {
    JobInput::new(Asset::from_file_name(name, vec![0xFF, 0xD8, 0xFF]))
}

pub fn status(raw: &str) -> Step<StatusResponse> {
    Step::Reply(StatusResponse::new(raw))
}

/// Let every spawned task run until it parks, advancing the paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}

/// Yield until `cond` holds, without advancing the clock.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
