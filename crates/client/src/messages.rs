//! Typed push-channel frames.
//!
//! Every frame is a JSON object with a `type` discriminator. Session
//! backends send `log`, `status` and `error`; the content console sends
//! `info`, `success` and `warning` lines. Both send `heartbeat`.
//!
//! Use [`parse_message`] to turn a raw text frame into a
//! [`ProgressEvent`].

use jobwatch_core::job::JobPatch;
use jobwatch_core::types::{deserialize_opt_timestamp, Timestamp};
use serde::{Deserialize, Serialize};

/// Severity of a transcript line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    Warning,
}

/// One transcript line as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Option<Timestamp>,
}

/// A decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A transcript line, appended verbatim.
    Log(LogEntry),
    /// A (possibly partial) job snapshot to merge.
    Status(JobPatch),
    /// An error message; not terminal on its own.
    Error { message: String },
    /// Keepalive with no state.
    Heartbeat,
}

#[derive(Debug, Deserialize)]
struct LineData {
    message: String,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    timestamp: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: JobPatch,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatData {}

/// Wire representation, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Log(LineData),
    Info(LineData),
    Success(LineData),
    Warning(LineData),
    Status(StatusData),
    Error(ErrorData),
    Heartbeat(HeartbeatData),
}

impl From<Frame> for ProgressEvent {
    fn from(frame: Frame) -> Self {
        let line = |level: LogLevel, data: LineData| {
            ProgressEvent::Log(LogEntry {
                level,
                message: data.message,
                timestamp: data.timestamp,
            })
        };
        match frame {
            Frame::Log(data) | Frame::Info(data) => line(LogLevel::Info, data),
            Frame::Success(data) => line(LogLevel::Success, data),
            Frame::Warning(data) => line(LogLevel::Warning, data),
            Frame::Status(data) => ProgressEvent::Status(data.status),
            Frame::Error(data) => ProgressEvent::Error {
                message: data
                    .message
                    .or(data.error)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
            Frame::Heartbeat(_) => ProgressEvent::Heartbeat,
        }
    }
}

/// Parse a raw text frame into a [`ProgressEvent`].
///
/// Unknown `type` values and malformed payloads are errors; callers log
/// and drop them.
pub fn parse_message(text: &str) -> Result<ProgressEvent, serde_json::Error> {
    serde_json::from_str::<Frame>(text).map(ProgressEvent::from)
}
