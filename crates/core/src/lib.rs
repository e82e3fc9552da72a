//! Domain types for tracking remote AI-agent jobs.
//!
//! No I/O lives here: the job snapshot model, request payloads with
//! their validation, push message constants and shared error types.

pub mod error;
pub mod job;
pub mod job_events;
pub mod request;
pub mod types;
