//! Push frame processing loop.
//!
//! Reads raw text frames from a [`PushConnection`], decodes them with
//! [`parse_message`] and forwards the resulting events to the observer's
//! reconciliation loop. Malformed frames are logged and dropped.

use jobwatch_core::types::JobId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::PushConnection;
use crate::messages::{parse_message, ProgressEvent};
use crate::observer::ObserverInput;

/// Why [`process_frames`] returned.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// The peer closed the channel or the stream ended.
    Closed,
    /// A receive error on an established channel.
    Failed(String),
    /// The observer is shutting down.
    Cancelled,
}

/// Forward decoded frames until the channel ends or `cancel` fires.
pub(crate) async fn process_frames(
    conn: &mut dyn PushConnection,
    job_id: &JobId,
    tx: &mpsc::Sender<ObserverInput>,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            frame = conn.next_frame() => frame,
        };

        let text = match frame {
            None => return StreamEnd::Closed,
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Push channel receive error");
                return StreamEnd::Failed(e.to_string());
            }
        };

        match parse_message(&text) {
            Ok(event) => {
                if event == ProgressEvent::Heartbeat {
                    tracing::trace!(job_id = %job_id, "Heartbeat");
                }
                if tx.send(ObserverInput::Push(event)).await.is_err() {
                    return StreamEnd::Cancelled;
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse push frame",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use crate::client::PushError;

    struct ScriptedConnection {
        frames: VecDeque<Result<String, PushError>>,
    }

    #[async_trait]
    impl PushConnection for ScriptedConnection {
        async fn next_frame(&mut self) -> Option<Result<String, PushError>> {
            self.frames.pop_front()
        }
        async fn close(&mut self) {}
        fn is_closed(&self) -> bool {
            self.frames.is_empty()
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let mut conn = ScriptedConnection {
            frames: VecDeque::from([
                Ok("{not json".to_string()),
                Ok(r#"{"type":"log","message":"Step 1"}"#.to_string()),
                Ok(r#"{"type":"mystery"}"#.to_string()),
            ]),
        };
        let (tx, mut rx) = mpsc::channel(8);

        let end = process_frames(&mut conn, &JobId::new("j"), &tx, &CancellationToken::new()).await;
        assert_eq!(end, StreamEnd::Closed);

        assert_matches!(rx.try_recv(), Ok(ObserverInput::Push(ProgressEvent::Log(entry))) => {
            assert_eq!(entry.message, "Step 1");
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn receive_error_ends_stream() {
        let mut conn = ScriptedConnection {
            frames: VecDeque::from([Err(PushError::Protocol("reset".into()))]),
        };
        let (tx, _rx) = mpsc::channel(8);
        let end = process_frames(&mut conn, &JobId::new("j"), &tx, &CancellationToken::new()).await;
        assert_matches!(end, StreamEnd::Failed(reason) if reason.contains("reset"));
    }

    #[tokio::test]
    async fn cancelled_before_reading() {
        let mut conn = ScriptedConnection {
            frames: VecDeque::from([Ok(r#"{"type":"heartbeat"}"#.to_string())]),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(process_frames(&mut conn, &JobId::new("j"), &tx, &cancel).await, StreamEnd::Cancelled);
        assert!(rx.try_recv().is_err());
    }
}
