//! Events emitted by a [`ProgressObserver`](crate::observer::ProgressObserver).
//!
//! These are the discrete changes behind the continuously published
//! [`ViewState`](crate::reconcile::ViewState): useful for printing a
//! transcript or reacting to completion without diffing views.

use jobwatch_core::job::JobStatus;
use jobwatch_core::types::JobId;
use serde::Serialize;

use crate::messages::LogEntry;
use crate::reconcile::Source;

#[derive(Debug, Clone, Serialize)]
pub enum ObserverEvent {
    /// The push channel was established.
    Connected { job_id: JobId },

    /// The push channel was lost or closed.
    Disconnected {
        job_id: JobId,
        reason: Option<String>,
    },

    /// A transcript line arrived.
    Log { job_id: JobId, entry: LogEntry },

    /// The job status moved forward.
    StatusChanged { job_id: JobId, status: JobStatus },

    /// The backend reported an error message on the push channel.
    ErrorReported { job_id: JobId, message: String },

    /// The job reached a terminal status.
    Terminal {
        job_id: JobId,
        status: JobStatus,
        /// Whichever source reported the terminal status first.
        source: Source,
    },

    /// The final result was fetched.
    ResultReady { job_id: JobId },

    /// Fetching the final result failed.
    ResultFailed { job_id: JobId, detail: String },
}
