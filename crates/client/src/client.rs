//! Push channel: the transport seam plus its WebSocket implementation.
//!
//! [`PushTransport`] opens one [`PushConnection`] per job. The observer
//! only reads text frames from it and closes it; [`WsTransport`] backs
//! both with `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use jobwatch_core::types::JobId;
use reqwest::Url;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::build_url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens push connections for jobs.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, job_id: &JobId) -> Result<Box<dyn PushConnection>, PushError>;
}

/// A live, job-scoped push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Next text frame. `None` once the peer closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, PushError>>;

    /// Close the channel. Only the first call sends anything.
    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// WebSocket transport addressed by a push path template.
pub struct WsTransport {
    ws_url: Url,
    template: String,
}

impl WsTransport {
    /// * `ws_url`   - WebSocket base URL, e.g. `ws://host:8000`.
    /// * `template` - push path, e.g. `/ws/console/{id}`.
    pub fn new(ws_url: Url, template: impl Into<String>) -> Self {
        Self {
            ws_url,
            template: template.into(),
        }
    }

    pub fn url_for(&self, job_id: &JobId) -> Result<Url, PushError> {
        build_url(&self.ws_url, &self.template, Some(job_id), &[])
            .map_err(|e| PushError::Connection(e.to_string()))
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn open(&self, job_id: &JobId) -> Result<Box<dyn PushConnection>, PushError> {
        let url = self.url_for(job_id)?;
        let (stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            PushError::Connection(format!("Failed to connect to {url}: {e}"))
        })?;

        tracing::info!(job_id = %job_id, "Push channel connected to {url}");

        Ok(Box::new(WsConnection {
            job_id: job_id.clone(),
            stream,
            closed: false,
        }))
    }
}

/// A live WebSocket connection for one job.
pub struct WsConnection {
    job_id: JobId,
    stream: WsStream,
    closed: bool,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<String, PushError>> {
        if self.closed {
            return None;
        }
        while let Some(msg_result) = self.stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::trace!(job_id = %self.job_id, "Ignoring non-UTF-8 binary frame");
                    }
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(job_id = %self.job_id, ?frame, "Push channel closed by peer");
                    self.closed = true;
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    self.closed = true;
                    return Some(Err(PushError::Protocol(e.to_string())));
                }
            }
        }
        self.closed = true;
        None
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.send(Message::Close(None)).await {
            tracing::debug!(job_id = %self.job_id, error = %e, "Close frame not delivered");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
