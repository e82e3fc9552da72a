//! Job submission.

use std::sync::Arc;

use jobwatch_core::error::CoreError;
use jobwatch_core::request::JobRequest;
use jobwatch_core::types::JobId;

use crate::api::{ApiError, JobBackend};

/// Why a job could not be created.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The request failed local validation; nothing was sent.
    #[error("Invalid request: {0}")]
    Invalid(#[from] CoreError),

    /// The backend refused the request.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        /// The backend's own message, or a generic fallback.
        message: String,
    },

    /// The backend accepted the request but returned no id.
    #[error("Backend response did not include a job id")]
    MissingJobId,
}

impl From<ApiError> for SubmitError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::MissingJobId => SubmitError::MissingJobId,
            other => SubmitError::Rejected {
                status: other.status_code(),
                message: other.backend_message(),
            },
        }
    }
}

/// Validates requests and creates jobs on a backend.
#[derive(Clone)]
pub struct JobInitiator {
    backend: Arc<dyn JobBackend>,
}

impl JobInitiator {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    /// Validate `request` and create the job it describes.
    ///
    /// An invalid request fails before any network call. For two-step
    /// session backends the returned id refers to a session whose run
    /// has already been started.
    pub async fn submit(&self, request: &dyn JobRequest) -> Result<JobId, SubmitError> {
        request.ensure_valid()?;

        match self.backend.create_job(request).await {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, "Job submitted");
                Ok(job_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Job submission failed");
                Err(e.into())
            }
        }
    }
}
