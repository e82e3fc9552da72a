//! Markers carried inside push-channel payloads.

/// Substring of a log line that means the run has finished.
pub const COMPLETION_MARKER: &str = "completed";
