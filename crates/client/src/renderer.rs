//! Fetching and presenting the final artifact.

use std::sync::{Arc, LazyLock};

use jobwatch_core::job::{Job, JobMetadata, JobResult};
use jobwatch_core::types::JobId;
use regex::Regex;

use crate::api::{ApiError, JobBackend};
use crate::reconcile::{ResultState, ViewState};

/// Shown when a completed job carries no text at all.
pub const EMPTY_RESULT_TEXT: &str = "No content found.";

/// The result endpoint failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to fetch result: {detail}")]
pub struct ResultFetchError {
    /// HTTP status, when the backend answered at all.
    pub status: Option<u16>,
    /// Backend detail message, or the transport error text.
    pub detail: String,
    /// Raw response body of a non-success answer, when it had one.
    pub body: Option<String>,
}

impl ResultFetchError {
    /// What to show the user: the response body as sent, else `detail`.
    pub fn raw_text(&self) -> &str {
        self.body.as_deref().unwrap_or(&self.detail)
    }
}

impl From<ApiError> for ResultFetchError {
    fn from(err: ApiError) -> Self {
        let body = match &err {
            ApiError::Status { body, .. } if !body.trim().is_empty() => Some(body.clone()),
            _ => None,
        };
        Self {
            status: err.status_code(),
            detail: err.backend_message(),
            body,
        }
    }
}

/// Fetches the artifact of a completed job.
#[derive(Clone)]
pub struct ResultRenderer {
    backend: Arc<dyn JobBackend>,
}

impl ResultRenderer {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    pub async fn fetch_result(&self, job_id: &JobId) -> Result<JobResult, ResultFetchError> {
        match self.backend.fetch_result(job_id).await {
            Ok(result) => {
                tracing::info!(
                    job_id = %job_id,
                    chars = result.text().chars().count(),
                    "Fetched job result",
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Result fetch failed");
                Err(e.into())
            }
        }
    }
}

/// What to show once a job has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultView {
    /// Not finished, or the result is still loading.
    Pending,
    Report {
        markdown: String,
        metadata: Option<JobMetadata>,
        /// Human-readable run time, when known.
        duration: Option<String>,
    },
    JobFailed { message: String },
    FetchFailed { detail: String },
}

impl ResultView {
    pub fn from_view(view: &ViewState) -> Self {
        match &view.result {
            ResultState::Idle | ResultState::Fetching => ResultView::Pending,
            ResultState::JobFailed(message) => ResultView::JobFailed {
                message: message.clone(),
            },
            ResultState::Failed(detail) => ResultView::FetchFailed {
                detail: detail.clone(),
            },
            ResultState::Ready(result) => Self::report(result, Some(&view.job)),
        }
    }

    /// Report for a result fetched outside an observer.
    pub fn from_result(result: &JobResult) -> Self {
        Self::report(result, None)
    }

    /// Prefers the fetched text, then the snapshot's, then a placeholder.
    fn report(result: &JobResult, job: Option<&Job>) -> Self {
        let markdown = [result.result.as_deref(), job.and_then(|j| j.result.as_deref())]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
            .unwrap_or(EMPTY_RESULT_TEXT)
            .to_string();
        let metadata = result
            .metadata
            .clone()
            .or_else(|| job.and_then(|j| j.metadata.clone()));
        let duration = metadata
            .as_ref()
            .and_then(|m| m.execution_time_seconds)
            .or_else(|| {
                job.and_then(Job::duration)
                    .map(|d| d.num_milliseconds() as f64 / 1000.0)
            })
            .map(format_duration);
        ResultView::Report {
            markdown,
            metadata,
            duration,
        }
    }

    /// The text copy/download/share act on.
    pub fn text(&self) -> Option<&str> {
        match self {
            ResultView::Report { markdown, .. } => Some(markdown),
            _ => None,
        }
    }
}

static AGENT_RESPONSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"## Agent Response\n([\s\S]*?)(?:\n## |$)").expect("valid regex"));

/// Extract the `## Agent Response` section of a session report.
///
/// Returns the trimmed section body, or `None` when the report has no
/// such section.
pub fn agent_response(report: &str) -> Option<String> {
    AGENT_RESPONSE_RE
        .captures(report)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Format a run time as `N seconds` under a minute, else `Mm Ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    if total < 60 {
        format!("{total} seconds")
    } else {
        format!("{}m {}s", total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_core::job::JobStatus;

    fn ready(result: JobResult) -> ViewState {
        let mut view = ViewState::new(JobId::new("job-1"));
        view.job.status = JobStatus::Completed;
        view.done = true;
        view.result = ResultState::Ready(result);
        view
    }

    #[test]
    fn extracts_agent_response_section() {
        let report = "# Session\n\n## Agent Response\nHello there.\nSecond line.\n## Metadata\n- model";
        assert_eq!(
            agent_response(report).as_deref(),
            Some("Hello there.\nSecond line.")
        );
    }

    #[test]
    fn agent_response_runs_to_end_of_text() {
        assert_eq!(
            agent_response("## Agent Response\nOnly section").as_deref(),
            Some("Only section")
        );
        assert!(agent_response("no headings here").is_none());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(42.4), "42 seconds");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(-3.0), "0 seconds");
    }

    #[test]
    fn report_falls_back_to_snapshot_text() {
        let mut view = ready(JobResult::default());
        view.job.result = Some("from status".into());
        assert_eq!(ResultView::from_view(&view).text(), Some("from status"));

        let empty = ready(JobResult::default());
        assert_eq!(ResultView::from_view(&empty).text(), Some(EMPTY_RESULT_TEXT));
    }

    #[test]
    fn report_uses_execution_time() {
        let view = ready(JobResult {
            result: Some("# Done".into()),
            metadata: Some(JobMetadata {
                execution_time_seconds: Some(75.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        match ResultView::from_view(&view) {
            ResultView::Report { duration, .. } => assert_eq!(duration.as_deref(), Some("1m 15s")),
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn failures_map_to_their_views() {
        let mut view = ViewState::new(JobId::new("job-1"));
        assert_eq!(ResultView::from_view(&view), ResultView::Pending);
        view.result = ResultState::JobFailed("boom".into());
        assert_eq!(
            ResultView::from_view(&view),
            ResultView::JobFailed {
                message: "boom".into()
            }
        );
        view.result = ResultState::Failed("Job not completed yet".into());
        assert_eq!(ResultView::from_view(&view).text(), None);
    }

    #[test]
    fn api_status_error_becomes_fetch_error() {
        let err: ResultFetchError = ApiError::Status {
            status: 400,
            body: r#"{"detail":"Job not completed yet"}"#.into(),
        }
        .into();
        assert_eq!(err.status, Some(400));
        assert_eq!(err.detail, "Job not completed yet");
        assert_eq!(err.raw_text(), r#"{"detail":"Job not completed yet"}"#);
    }

    #[test]
    fn empty_error_body_falls_back_to_detail() {
        let err: ResultFetchError = ApiError::Status {
            status: 502,
            body: "  ".into(),
        }
        .into();
        assert_eq!(err.body, None);
        assert_eq!(err.raw_text(), "HTTP 502");
    }
}
