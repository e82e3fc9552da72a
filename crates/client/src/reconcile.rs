//! Merging poll snapshots and push events into one view.
//!
//! [`Reconciler`] is a plain state machine: it owns the [`ViewState`]
//! for one job, applies inputs from either source and returns the
//! [`Effect`]s the caller must carry out. It never performs I/O, so
//! every ordering of inputs can be tested directly.
//!
//! Rules:
//! - Before a terminal status is seen, status never moves backwards
//!   along `loading -> pending -> running -> terminal`.
//! - The first terminal status from either source latches. Later
//!   inputs can enrich the snapshot but never change its status.
//! - A `completed` latch requests the result exactly once; an `error`
//!   latch never does.

use jobwatch_core::job::{Job, JobResult, JobStatus};
use jobwatch_core::job_events::COMPLETION_MARKER;
use jobwatch_core::types::JobId;
use serde::Serialize;

use crate::messages::{LogEntry, ProgressEvent};

/// Where an input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Poll,
    Push,
}

/// Lifecycle of the final artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResultState {
    /// The job has not finished yet.
    #[default]
    Idle,
    /// The job completed and the result request is in flight.
    Fetching,
    Ready(JobResult),
    /// The result request failed; carries the response body as sent,
    /// or the transport error text.
    Failed(String),
    /// The job itself ended in `error`; nothing is fetched.
    JobFailed(String),
}

/// Everything a consumer renders for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub job: Job,
    /// Transcript lines from the push channel, in arrival order.
    pub logs: Vec<LogEntry>,
    pub connected: bool,
    /// The agent is still working (typing indicator).
    pub busy: bool,
    /// A terminal status has been observed.
    pub done: bool,
    /// Most recent error reported on the push channel.
    pub error: Option<String>,
    pub result: ResultState,
}

impl ViewState {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job: Job::loading(job_id),
            logs: Vec::new(),
            connected: false,
            busy: true,
            done: false,
            error: None,
            result: ResultState::Idle,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    /// Terminal, and the result is no longer being fetched.
    pub fn is_settled(&self) -> bool {
        self.done && !matches!(self.result, ResultState::Idle | ResultState::Fetching)
    }
}

/// Side effects requested by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The job just reached a terminal status.
    Terminal { status: JobStatus, source: Source },
    /// Polling is no longer needed.
    StopPolling,
    /// Fetch the final result.
    FetchResult,
}

pub struct Reconciler {
    view: ViewState,
    latched: Option<(JobStatus, Source)>,
}

impl Reconciler {
    pub fn new(job_id: JobId) -> Self {
        Self {
            view: ViewState::new(job_id),
            latched: None,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// The latched terminal status and the source that reported it first.
    pub fn terminal(&self) -> Option<(JobStatus, Source)> {
        self.latched
    }

    /// Apply an authoritative snapshot from the status endpoint.
    pub fn apply_poll(&mut self, mut job: Job) -> Vec<Effect> {
        if self.latched.is_some() && !job.is_terminal() {
            tracing::debug!(
                job_id = %self.view.job.job_id,
                status = %job.status,
                "Ignoring stale poll snapshot after terminal status",
            );
            return Vec::new();
        }

        job.job_id = self.view.job.job_id.clone();
        job.status = self.guard_status(self.view.job.status, job.status);
        self.view.job = job;
        self.check_terminal(Source::Poll)
    }

    /// Apply one decoded push event.
    pub fn apply_push(&mut self, event: &ProgressEvent) -> Vec<Effect> {
        match event {
            ProgressEvent::Heartbeat => Vec::new(),
            ProgressEvent::Log(entry) => {
                if !self.view.done {
                    self.view.busy = !entry.message.contains(COMPLETION_MARKER);
                }
                self.view.logs.push(entry.clone());
                Vec::new()
            }
            ProgressEvent::Error { message } => {
                self.view.error = Some(message.clone());
                Vec::new()
            }
            ProgressEvent::Status(patch) => {
                let before = self.view.job.status;
                self.view.job.apply_patch(patch);
                self.view.job.status = self.guard_status(before, self.view.job.status);
                self.check_terminal(Source::Push)
            }
        }
    }

    /// Record push connectivity. Returns whether it changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.view.connected != connected;
        self.view.connected = connected;
        changed
    }

    /// Record the outcome of the result fetch.
    ///
    /// Ignored unless a fetch is outstanding. Returns whether the view
    /// changed.
    pub fn apply_result(&mut self, outcome: Result<JobResult, String>) -> bool {
        if self.view.result != ResultState::Fetching {
            return false;
        }
        self.view.result = match outcome {
            Ok(result) => ResultState::Ready(result),
            Err(detail) => ResultState::Failed(detail),
        };
        true
    }

    fn guard_status(&self, current: JobStatus, incoming: JobStatus) -> JobStatus {
        match self.latched {
            Some((status, _)) => status,
            None if incoming.rank() >= current.rank() => incoming,
            None => current,
        }
    }

    fn check_terminal(&mut self, source: Source) -> Vec<Effect> {
        let status = self.view.job.status;
        if self.latched.is_some() || !status.is_terminal() {
            return Vec::new();
        }

        self.latched = Some((status, source));
        self.view.done = true;
        self.view.busy = false;

        let mut effects = vec![Effect::Terminal { status, source }, Effect::StopPolling];
        if status == JobStatus::Completed {
            self.view.result = ResultState::Fetching;
            effects.push(Effect::FetchResult);
        } else {
            let message = self
                .view
                .job
                .error
                .clone()
                .or_else(|| self.view.error.clone())
                .unwrap_or_else(|| "Job failed".to_string());
            self.view.result = ResultState::JobFailed(message);
        }
        effects
    }
}
