//! REST client for job backends.
//!
//! [`JobApi`] wraps the create/status/result/health endpoints of one
//! backend using [`reqwest`]. The observer and initiator only see it
//! through the [`JobBackend`] trait so tests can substitute fakes.

use async_trait::async_trait;
use jobwatch_core::error::CoreError;
use jobwatch_core::job::{Job, JobResult};
use jobwatch_core::request::JobRequest;
use jobwatch_core::types::JobId;
use reqwest::Url;
use serde_json::Value;

use crate::config::{build_url, ClientConfig, Endpoints};

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Backend error ({status}): {body}")]
    Status {
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The creation response carried neither `job_id` nor `session_id`.
    #[error("Response did not contain a job or session id")]
    MissingJobId,

    /// A URL could not be built from the configured templates.
    #[error(transparent)]
    Url(#[from] CoreError),
}

impl ApiError {
    /// The human-readable message the backend sent, if any.
    ///
    /// Looks for `detail`, `message` or `error` in a JSON body and falls
    /// back to the raw text, then to `HTTP <status>`.
    pub fn backend_message(&self) -> String {
        match self {
            ApiError::Status { status, body } => backend_message(*status, body),
            other => other.to_string(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub(crate) fn backend_message(status: u16, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error"] {
            match map.get(key) {
                Some(Value::String(text)) if !text.trim().is_empty() => return text.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.to_string()
    }
}

/// The operations the tracker needs from a backend.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Create (and, for two-step backends, start) a job. Returns its id.
    async fn create_job(&self, request: &dyn JobRequest) -> Result<JobId, ApiError>;

    /// Fetch the authoritative snapshot of a job.
    async fn fetch_status(&self, job_id: &JobId) -> Result<Job, ApiError>;

    /// Fetch the final artifact of a completed job.
    async fn fetch_result(&self, job_id: &JobId) -> Result<JobResult, ApiError>;
}

/// HTTP client for a single backend.
#[derive(Clone)]
pub struct JobApi {
    client: reqwest::Client,
    base_url: Url,
    endpoints: Endpoints,
}

impl JobApi {
    pub fn new(base_url: Url, endpoints: Endpoints) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, endpoints)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pool, timeouts).
    pub fn with_client(client: reqwest::Client, base_url: Url, endpoints: Endpoints) -> Self {
        Self {
            client,
            base_url,
            endpoints,
        }
    }

    /// Build a client honouring the configured request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(
            builder.build()?,
            config.base_url.clone(),
            config.endpoints.clone(),
        ))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Query the backend's health endpoint and return its JSON body.
    pub async fn health(&self) -> Result<Value, ApiError> {
        let url = build_url(&self.base_url, &self.endpoints.health, None, &[])?;
        let response = self.client.get(url).send().await?;
        Self::parse_response(response).await
    }

    fn job_url(&self, template: &str, job_id: &JobId) -> Result<Url, ApiError> {
        Ok(build_url(&self.base_url, template, Some(job_id), &[])?)
    }

    // ---- private helpers ----

    /// Return the response unchanged on 2xx, otherwise an
    /// [`ApiError::Status`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn extract_job_id(body: &Value) -> Result<JobId, ApiError> {
    ["job_id", "session_id"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .filter(|id| !id.trim().is_empty())
        .map(JobId::from)
        .ok_or(ApiError::MissingJobId)
}

#[async_trait]
impl JobBackend for JobApi {
    async fn create_job(&self, request: &dyn JobRequest) -> Result<JobId, ApiError> {
        let params = request.path_params();
        let url = build_url(&self.base_url, &self.endpoints.create, None, &params)?;
        let response = self
            .client
            .post(url)
            .json(&request.create_body())
            .send()
            .await?;
        let body: Value = Self::parse_response(response).await?;
        let job_id = extract_job_id(&body)?;

        if let Some(start) = &self.endpoints.start {
            let url = build_url(&self.base_url, start, Some(&job_id), &params)?;
            let response = self
                .client
                .post(url)
                .json(&request.start_body(&job_id))
                .send()
                .await?;
            Self::ensure_success(response).await?;
            tracing::debug!(job_id = %job_id, "Started session run");
        }

        Ok(job_id)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<Job, ApiError> {
        let url = self.job_url(&self.endpoints.status, job_id)?;
        let response = self.client.get(url).send().await?;
        let mut job: Job = Self::parse_response(response).await?;
        if job.job_id.is_empty() {
            job.job_id = job_id.clone();
        }
        Ok(job)
    }

    async fn fetch_result(&self, job_id: &JobId) -> Result<JobResult, ApiError> {
        let url = self.job_url(&self.endpoints.result, job_id)?;
        let response = self.client.get(url).send().await?;
        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backend_message_prefers_detail() {
        assert_eq!(
            backend_message(400, r#"{"detail":"Job not completed yet"}"#),
            "Job not completed yet"
        );
        assert_eq!(backend_message(500, r#"{"error":"boom"}"#), "boom");
    }

    #[test]
    fn backend_message_falls_back_to_raw_text() {
        assert_eq!(backend_message(500, "rate limited"), "rate limited");
        assert_eq!(backend_message(502, "   "), "HTTP 502");
    }

    #[test]
    fn backend_message_stringifies_structured_detail() {
        let body = r#"{"detail":[{"loc":["body","topic"],"msg":"field required"}]}"#;
        assert!(backend_message(422, body).contains("field required"));
    }

    #[test]
    fn job_id_from_either_key() {
        assert_eq!(
            extract_job_id(&json!({"job_id": "abc", "status": "pending"})).unwrap(),
            JobId::new("abc")
        );
        assert_eq!(
            extract_job_id(&json!({"session_id": "s-1"})).unwrap(),
            JobId::new("s-1")
        );
        assert!(matches!(
            extract_job_id(&json!({"job_id": ""})),
            Err(ApiError::MissingJobId)
        ));
    }
}
