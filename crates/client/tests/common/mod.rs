//! Scripted backend and push transport shared by the observer tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobwatch_client::api::{ApiError, JobBackend};
use jobwatch_client::client::{PushConnection, PushError, PushTransport};
use jobwatch_client::observer::{ObserverConfig, ProgressObserver};
use jobwatch_client::reconcile::ViewState;
use jobwatch_core::job::{Job, JobResult, JobStatus};
use jobwatch_core::request::JobRequest;
use jobwatch_core::types::JobId;
use tokio::sync::{mpsc, Semaphore};

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn job(status: JobStatus) -> Job {
    Job {
        job_id: JobId::new("job-1"),
        status,
        ..Default::default()
    }
}

pub fn status_frame(status: &str) -> String {
    format!(r#"{{"type":"status","status":{{"status":"{status}"}}}}"#)
}

pub fn log_frame(message: &str) -> String {
    format!(r#"{{"type":"log","message":"{message}"}}"#)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend returning scripted status snapshots.
///
/// Each poll takes the next snapshot; the last one repeats. With a gate,
/// every status request waits for a permit first.
pub struct FakeBackend {
    statuses: Mutex<VecDeque<Job>>,
    result: Mutex<Result<JobResult, (u16, String)>>,
    gate: Option<Semaphore>,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(statuses: Vec<JobStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().map(job).collect()),
            result: Mutex::new(Ok(JobResult {
                result: Some("# Report\n\nAll done.".into()),
                ..Default::default()
            })),
            gate: None,
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
        }
    }

    /// Status requests block until [`release`](Self::release) is called.
    pub fn gated(statuses: Vec<JobStatus>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(statuses)
        }
    }

    pub fn with_result_error(self, status: u16, body: &str) -> Self {
        *self.result.lock().unwrap() = Err((status, body.to_string()));
        self
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn create_job(&self, _request: &dyn JobRequest) -> Result<JobId, ApiError> {
        Ok(JobId::new("job-1"))
    }

    async fn fetch_status(&self, _job_id: &JobId) -> Result<Job, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate should stay open")
                .forget();
        }
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        next.ok_or(ApiError::Status {
            status: 404,
            body: r#"{"detail":"Job not found"}"#.into(),
        })
    }

    async fn fetch_result(&self, _job_id: &JobId) -> Result<JobResult, ApiError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .lock()
            .unwrap()
            .clone()
            .map_err(|(status, body)| ApiError::Status { status, body })
    }
}

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

/// Transport whose connections are fed from test-held senders.
///
/// Each `open` consumes the next prepared channel; once they run out,
/// `open` fails. Dropping a sender closes that connection from the
/// peer side.
pub struct FakeTransport {
    channels: Mutex<VecDeque<mpsc::UnboundedReceiver<String>>>,
    pub opens: AtomicUsize,
    pub close_frames: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn with_channels(count: usize) -> (Self, Vec<mpsc::UnboundedSender<String>>) {
        let mut receivers = VecDeque::new();
        let mut senders = Vec::new();
        for _ in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push_back(rx);
        }
        let transport = Self {
            channels: Mutex::new(receivers),
            opens: AtomicUsize::new(0),
            close_frames: Arc::new(AtomicUsize::new(0)),
        };
        (transport, senders)
    }

    pub fn unavailable() -> Self {
        Self::with_channels(0).0
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_frames(&self) -> usize {
        self.close_frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn open(&self, _job_id: &JobId) -> Result<Box<dyn PushConnection>, PushError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .channels
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PushError::Connection("connection refused".into()))?;
        Ok(Box::new(FakeConnection {
            rx,
            closed: false,
            close_frames: Arc::clone(&self.close_frames),
        }))
    }
}

struct FakeConnection {
    rx: mpsc::UnboundedReceiver<String>,
    closed: bool,
    close_frames: Arc<AtomicUsize>,
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn next_frame(&mut self) -> Option<Result<String, PushError>> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(text) => Some(Ok(text)),
            None => {
                self.closed = true;
                None
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn start(
    backend: &Arc<FakeBackend>,
    transport: &Arc<FakeTransport>,
    config: ObserverConfig,
) -> ProgressObserver {
    ProgressObserver::start(
        JobId::new("job-1"),
        Arc::clone(backend) as Arc<dyn JobBackend>,
        Arc::clone(transport) as Arc<dyn PushTransport>,
        config,
    )
}

pub fn fast_config() -> ObserverConfig {
    ObserverConfig {
        poll_interval: POLL_INTERVAL,
        reconnect: None,
    }
}

pub async fn settled(observer: &ProgressObserver) -> ViewState {
    tokio::time::timeout(TEST_TIMEOUT, observer.wait_until_done())
        .await
        .expect("job should settle in time")
}

/// Wait until `pred` holds for the published view.
pub async fn view_where(observer: &ProgressObserver, pred: impl Fn(&ViewState) -> bool) -> ViewState {
    let mut rx = observer.subscribe();
    let view = tokio::time::timeout(TEST_TIMEOUT, rx.wait_for(|v| pred(v)))
        .await
        .expect("view should reach the expected state in time")
        .expect("observer should still be running")
        .clone();
    view
}
