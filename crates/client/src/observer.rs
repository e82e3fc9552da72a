//! Per-job progress observer.
//!
//! [`ProgressObserver`] watches one job through two sources at once: a
//! periodic status poll and the push channel. Both run as tasks that
//! only decode and forward; a single reconciliation loop owns the
//! [`Reconciler`] and is the only writer of the published
//! [`ViewState`]. Consumers read the view through a
//! [`tokio::sync::watch`] receiver and discrete changes through a
//! [`tokio::sync::broadcast`] channel of [`ObserverEvent`]s.
//!
//! Dropping the observer (or calling [`ProgressObserver::shutdown`])
//! cancels every task, stops polling and closes the push channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobwatch_core::job::{Job, JobResult};
use jobwatch_core::types::JobId;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::JobBackend;
use crate::client::PushTransport;
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::events::ObserverEvent;
use crate::messages::ProgressEvent;
use crate::processor::{process_frames, StreamEnd};
use crate::reconcile::{Effect, Reconciler, ResultState, ViewState};
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::renderer::{ResultFetchError, ResultRenderer};

/// Broadcast channel capacity for observer events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Queue between the source tasks and the reconciliation loop.
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Lower bound for the poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long [`ProgressObserver::shutdown`] waits for its tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub poll_interval: Duration,
    /// Reopen a dropped push channel with backoff. `None` disables it.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect: None,
        }
    }
}

/// Inputs consumed by the reconciliation loop.
#[derive(Debug)]
pub(crate) enum ObserverInput {
    Poll(Job),
    Push(ProgressEvent),
    Connected,
    Disconnected(Option<String>),
    Result(Result<JobResult, ResultFetchError>),
}

/// Tracks one job until it is dropped or shut down.
pub struct ProgressObserver {
    job_id: JobId,
    view_rx: watch::Receiver<ViewState>,
    event_tx: broadcast::Sender<ObserverEvent>,
    /// Receiver created before any task ran; handed out once.
    first_events: Mutex<Option<broadcast::Receiver<ObserverEvent>>>,
    /// Master cancellation token; every task holds a child.
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProgressObserver {
    /// Start polling and listening for `job_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        job_id: JobId,
        backend: Arc<dyn JobBackend>,
        transport: Arc<dyn PushTransport>,
        config: ObserverConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let poll_cancel = cancel.child_token();
        let reconnect_cancel = cancel.child_token();

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(ViewState::new(job_id.clone()));
        let (event_tx, first_events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let reconcile = ReconcileLoop {
            job_id: job_id.clone(),
            reconciler: Reconciler::new(job_id.clone()),
            input_tx: input_tx.clone(),
            view_tx,
            event_tx: event_tx.clone(),
            renderer: ResultRenderer::new(Arc::clone(&backend)),
            cancel: cancel.clone(),
            poll_cancel: poll_cancel.clone(),
            reconnect_cancel: reconnect_cancel.clone(),
        };

        let tasks = vec![
            tokio::spawn(reconcile.run(input_rx)),
            tokio::spawn(run_push_loop(
                job_id.clone(),
                transport,
                input_tx.clone(),
                cancel.clone(),
                reconnect_cancel,
                config.reconnect,
            )),
            tokio::spawn(run_poll_loop(
                job_id.clone(),
                backend,
                config.poll_interval.max(MIN_POLL_INTERVAL),
                input_tx,
                poll_cancel,
            )),
        ];

        tracing::info!(job_id = %job_id, "Observing job");

        Self {
            job_id,
            view_rx,
            event_tx,
            first_events: Mutex::new(Some(first_events)),
            cancel,
            tasks,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Current view.
    pub fn view(&self) -> ViewState {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view_rx.clone()
    }

    /// Receiver of discrete observer events.
    ///
    /// The first call gets every event since [`start`](Self::start);
    /// later calls only see events sent after subscribing.
    pub fn events(&self) -> broadcast::Receiver<ObserverEvent> {
        self.first_events
            .lock()
            .ok()
            .and_then(|mut first| first.take())
            .unwrap_or_else(|| self.event_tx.subscribe())
    }

    /// Resolve once the job is terminal and its result is settled.
    ///
    /// Returns the last published view if the observer stops first.
    pub async fn wait_until_done(&self) -> ViewState {
        let mut rx = self.view_rx.clone();
        if let Ok(view) = rx.wait_for(ViewState::is_settled).await {
            return view.clone();
        }
        let view = rx.borrow().clone();
        view
    }

    /// Cancel every task and wait for them to finish.
    ///
    /// No view updates are published once this returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await;
        match joined {
            Ok(_) => tracing::info!(job_id = %self.job_id, "Observer shut down"),
            Err(_) => tracing::warn!(
                job_id = %self.job_id,
                "Observer tasks did not stop within {}s",
                SHUTDOWN_TIMEOUT.as_secs(),
            ),
        }
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The single writer of the published view.
struct ReconcileLoop {
    job_id: JobId,
    reconciler: Reconciler,
    input_tx: mpsc::Sender<ObserverInput>,
    view_tx: watch::Sender<ViewState>,
    event_tx: broadcast::Sender<ObserverEvent>,
    renderer: ResultRenderer,
    cancel: CancellationToken,
    poll_cancel: CancellationToken,
    reconnect_cancel: CancellationToken,
}

impl ReconcileLoop {
    async fn run(mut self, mut input_rx: mpsc::Receiver<ObserverInput>) {
        loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                input = input_rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            self.handle(input);
        }
        tracing::debug!(job_id = %self.job_id, "Reconciliation loop stopped");
    }

    fn handle(&mut self, input: ObserverInput) {
        let job_id = self.job_id.clone();
        let before = self.reconciler.view().status();
        let mut events = Vec::new();

        let effects = match input {
            ObserverInput::Poll(job) => self.reconciler.apply_poll(job),
            ObserverInput::Push(event) => {
                match &event {
                    ProgressEvent::Log(entry) => events.push(ObserverEvent::Log {
                        job_id: job_id.clone(),
                        entry: entry.clone(),
                    }),
                    ProgressEvent::Error { message } => events.push(ObserverEvent::ErrorReported {
                        job_id: job_id.clone(),
                        message: message.clone(),
                    }),
                    ProgressEvent::Status(_) | ProgressEvent::Heartbeat => {}
                }
                self.reconciler.apply_push(&event)
            }
            ObserverInput::Connected => {
                if self.reconciler.set_connected(true) {
                    events.push(ObserverEvent::Connected {
                        job_id: job_id.clone(),
                    });
                }
                Vec::new()
            }
            ObserverInput::Disconnected(reason) => {
                if self.reconciler.set_connected(false) || reason.is_some() {
                    events.push(ObserverEvent::Disconnected {
                        job_id: job_id.clone(),
                        reason,
                    });
                }
                Vec::new()
            }
            ObserverInput::Result(outcome) => {
                if self.reconciler.apply_result(outcome.map_err(|e| e.raw_text().to_string())) {
                    match &self.reconciler.view().result {
                        ResultState::Ready(_) => events.push(ObserverEvent::ResultReady {
                            job_id: job_id.clone(),
                        }),
                        ResultState::Failed(detail) => events.push(ObserverEvent::ResultFailed {
                            job_id: job_id.clone(),
                            detail: detail.clone(),
                        }),
                        _ => {}
                    }
                }
                Vec::new()
            }
        };

        let after = self.reconciler.view().status();
        if after != before {
            events.push(ObserverEvent::StatusChanged {
                job_id: job_id.clone(),
                status: after,
            });
        }

        for effect in effects {
            match effect {
                Effect::Terminal { status, source } => {
                    tracing::info!(job_id = %job_id, %status, ?source, "Job reached terminal status");
                    events.push(ObserverEvent::Terminal {
                        job_id: job_id.clone(),
                        status,
                        source,
                    });
                }
                Effect::StopPolling => {
                    self.poll_cancel.cancel();
                    self.reconnect_cancel.cancel();
                }
                Effect::FetchResult => self.spawn_result_fetch(),
            }
        }

        // Events go out first: a reader that sees the settled view can
        // drain every event that led to it.
        for event in events {
            let _ = self.event_tx.send(event);
        }

        let view = self.reconciler.view();
        self.view_tx.send_if_modified(|current| {
            if current == view {
                false
            } else {
                *current = view.clone();
                true
            }
        });
    }

    fn spawn_result_fetch(&self) {
        let renderer = self.renderer.clone();
        let tx = self.input_tx.clone();
        let job_id = self.job_id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = renderer.fetch_result(&job_id) => outcome,
            };
            let _ = tx.send(ObserverInput::Result(outcome)).await;
        });
    }
}

/// Poll the status endpoint until the job is terminal or `cancel` fires.
async fn run_poll_loop(
    job_id: JobId,
    backend: Arc<dyn JobBackend>,
    interval: Duration,
    tx: mpsc::Sender<ObserverInput>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = backend.fetch_status(&job_id) => fetched,
        };

        match fetched {
            Ok(job) => {
                let terminal = job.is_terminal();
                if tx.send(ObserverInput::Poll(job)).await.is_err() || terminal {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Status poll failed");
            }
        }
    }

    tracing::debug!(job_id = %job_id, "Status polling stopped");
}

/// Open the push channel and forward its frames, reconnecting if
/// configured to.
async fn run_push_loop(
    job_id: JobId,
    transport: Arc<dyn PushTransport>,
    tx: mpsc::Sender<ObserverInput>,
    cancel: CancellationToken,
    reconnect_cancel: CancellationToken,
    reconnect: Option<ReconnectConfig>,
) {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = transport.open(&job_id) => opened,
    };

    let mut conn = match opened {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Push channel unavailable");
            let _ = tx.send(ObserverInput::Disconnected(Some(e.to_string()))).await;
            let Some(config) = &reconnect else { return };
            match reconnect_loop(transport.as_ref(), &job_id, config, &reconnect_cancel).await {
                Some(conn) => conn,
                None => return,
            }
        }
    };

    loop {
        if tx.send(ObserverInput::Connected).await.is_err() {
            conn.close().await;
            return;
        }

        let end = process_frames(conn.as_mut(), &job_id, &tx, &cancel).await;
        conn.close().await;

        let reason = match end {
            StreamEnd::Cancelled => return,
            StreamEnd::Closed => None,
            StreamEnd::Failed(reason) => Some(reason),
        };
        tracing::info!(job_id = %job_id, ?reason, "Push channel ended");
        let _ = tx.send(ObserverInput::Disconnected(reason)).await;

        let Some(config) = &reconnect else { return };
        match reconnect_loop(transport.as_ref(), &job_id, config, &reconnect_cancel).await {
            Some(next) => conn = next,
            None => return,
        }
    }
}
