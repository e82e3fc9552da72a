//! Job snapshot model shared by the poll and push sources.
//!
//! A [`Job`] is the client's last known picture of one backend job or
//! agent session. Backends send either full snapshots (status polls) or
//! partial ones (`status` push frames), the latter modelled as a
//! [`JobPatch`] that is shallow-merged into the current snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{deserialize_opt_timestamp, JobId, Timestamp};

/// Lifecycle status of a job.
///
/// `Loading` never comes from a backend: it marks a snapshot that has
/// not been fetched yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Loading,
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    /// `Completed` and `Error` are terminal; no further transitions occur.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Position along `loading -> pending -> running -> terminal`.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Loading => 0,
            JobStatus::Pending => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Loading => "loading",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// Case-insensitive. `loading` is client-only and never parsed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Serde helper: an unrecognised or non-string status reads as absent,
/// so the rest of the snapshot still decodes.
fn deserialize_lenient_status<'de, D>(deserializer: D) -> Result<Option<JobStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(|s| s.parse().ok()))
}

/// Like [`deserialize_lenient_status`] for full snapshots, where an
/// unknown status reads as `Loading`. Its rank never displaces a status
/// already observed.
fn deserialize_snapshot_status<'de, D>(deserializer: D) -> Result<JobStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_lenient_status(deserializer)?.unwrap_or_default())
}

/// Token accounting reported by agent-session backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Execution metadata attached to a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub execution_time_seconds: Option<f64>,
    #[serde(default)]
    pub api_status: Option<String>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
}

/// Last known snapshot of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, alias = "session_id")]
    pub job_id: JobId,
    #[serde(default, deserialize_with = "deserialize_snapshot_status")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Transcript lines kept by session backends.
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metadata: Option<JobMetadata>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Job {
    /// Placeholder snapshot for a job whose status has not been fetched.
    pub fn loading(job_id: JobId) -> Self {
        Self {
            job_id,
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Shallow merge: every field present in `patch` replaces the current
    /// value, absent fields keep theirs. The job id never changes.
    pub fn apply_patch(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        if patch.started_at.is_some() {
            self.started_at = patch.started_at;
        }
        if patch.completed_at.is_some() {
            self.completed_at = patch.completed_at;
        }
        if let Some(result) = &patch.result {
            self.result = Some(result.clone());
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        if let Some(logs) = &patch.logs {
            self.logs = logs.clone();
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = Some(metadata.clone());
        }
        if let Some(topic) = &patch.topic {
            self.topic = Some(topic.clone());
        }
        if let Some(prompt) = &patch.prompt {
            self.prompt = Some(prompt.clone());
        }
    }

    /// `created_at <= started_at <= completed_at` for whichever are present.
    pub fn timestamps_ordered(&self) -> bool {
        let present: Vec<Timestamp> = [self.created_at, self.started_at, self.completed_at]
            .into_iter()
            .flatten()
            .collect();
        present.windows(2).all(|pair| pair[0] <= pair[1])
    }

    /// Wall-clock run time, when both ends are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Partial job snapshot carried by a `status` push frame.
///
/// A JSON `null` is treated the same as an absent field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    /// `None` also for a status value this client does not know.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<JobStatus>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<Timestamp>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Body of the results endpoint.
///
/// Content backends return `{job_id, topic, result, completed_at}`;
/// session backends return their whole session state. Both fit here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub metadata: Option<JobMetadata>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "deserialize_lenient_status")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobResult {
    /// The artifact text, empty when the backend sent none.
    pub fn text(&self) -> &str {
        self.result.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Loading.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn rank_follows_lifecycle() {
        assert!(JobStatus::Loading.rank() < JobStatus::Pending.rank());
        assert!(JobStatus::Pending.rank() < JobStatus::Running.rank());
        assert_eq!(JobStatus::Completed.rank(), JobStatus::Error.rank());
    }

    #[test]
    fn status_names_parse_case_insensitively() {
        assert_eq!("Completed".parse::<JobStatus>(), Ok(JobStatus::Completed));
        assert_eq!(" running ".parse::<JobStatus>(), Ok(JobStatus::Running));
        assert!("loading".parse::<JobStatus>().is_err());
    }

    #[test]
    fn unknown_status_keeps_the_rest_of_the_payload() {
        let patch: JobPatch =
            serde_json::from_str(r#"{"status":"cancelled","result":"partial text"}"#).unwrap();
        assert_eq!(patch.status, None);
        assert_eq!(patch.result.as_deref(), Some("partial text"));

        let job: Job = serde_json::from_str(r#"{"job_id":"a","status":"cancelled","topic":"AI"}"#).unwrap();
        assert_eq!(job.status, JobStatus::Loading);
        assert_eq!(job.topic.as_deref(), Some("AI"));

        let result: JobResult = serde_json::from_str(r#"{"status":7,"result":"done"}"#).unwrap();
        assert_eq!(result.status, None);
        assert_eq!(result.text(), "done");
    }

    #[test]
    fn deserializes_content_generator_snapshot() {
        let json = r#"{
            "job_id": "abc123",
            "status": "running",
            "created_at": "2025-01-02T03:04:05.678901",
            "started_at": "2025-01-02T03:04:06.000001",
            "completed_at": null,
            "result": null,
            "error": null
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_id.as_str(), "abc123");
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.created_at.is_some());
        assert!(job.completed_at.is_none());
        assert!(job.logs.is_empty());
        assert!(job.timestamps_ordered());
    }

    #[test]
    fn deserializes_session_snapshot_with_alias_and_metadata() {
        let json = r###"{
            "session_id": "sess-0001",
            "app_name": "chat-demo",
            "user_id": "user-1",
            "status": "completed",
            "created_at": "2025-01-02T03:04:05+00:00",
            "completed_at": "2025-01-02T03:04:09+00:00",
            "logs": ["Planning", "Agent execution completed"],
            "result": "## Agent Response\nhi",
            "metadata": {
                "model": "gemini-1.5-flash",
                "execution_time_seconds": 4.2,
                "token_usage": {"input_tokens": 3, "output_tokens": 5, "total_tokens": 8}
            }
        }"###;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_id.as_str(), "sess-0001");
        assert!(job.is_terminal());
        assert_eq!(job.logs.len(), 2);
        let metadata = job.metadata.unwrap();
        assert_eq!(metadata.model.as_deref(), Some("gemini-1.5-flash"));
        assert_eq!(metadata.token_usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn patch_replaces_only_present_fields() {
        let mut job = Job::loading(JobId::new("abc"));
        job.apply_patch(&JobPatch {
            status: Some(JobStatus::Running),
            started_at: parse_timestamp("2025-01-01T00:00:01Z"),
            ..Default::default()
        });
        job.apply_patch(&JobPatch {
            result: Some("partial".into()),
            ..Default::default()
        });

        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(job.result.as_deref(), Some("partial"));
        assert_eq!(job.job_id.as_str(), "abc");
    }

    #[test]
    fn patch_sequence_is_last_write_wins() {
        let patches = vec![
            JobPatch {
                status: Some(JobStatus::Pending),
                topic: Some("first".into()),
                ..Default::default()
            },
            JobPatch {
                status: Some(JobStatus::Running),
                error: Some("transient".into()),
                ..Default::default()
            },
            JobPatch {
                topic: Some("third".into()),
                ..Default::default()
            },
            JobPatch {
                status: Some(JobStatus::Completed),
                result: Some("done".into()),
                ..Default::default()
            },
        ];

        let mut merged = Job::loading(JobId::new("x"));
        for patch in &patches {
            merged.apply_patch(patch);
        }

        // Field-wise: last patch that carried the field wins.
        let last = |f: fn(&JobPatch) -> Option<String>| patches.iter().rev().find_map(f);
        assert_eq!(merged.status, JobStatus::Completed);
        assert_eq!(merged.topic, last(|p| p.topic.clone()));
        assert_eq!(merged.error, last(|p| p.error.clone()));
        assert_eq!(merged.result, last(|p| p.result.clone()));
        assert!(merged.prompt.is_none());
    }

    #[test]
    fn null_in_patch_keeps_previous_value() {
        let mut job = Job::loading(JobId::new("abc"));
        job.result = Some("kept".into());
        let patch: JobPatch = serde_json::from_str(r#"{"result": null, "status": "completed"}"#).unwrap();
        job.apply_patch(&patch);
        assert_eq!(job.result.as_deref(), Some("kept"));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn detects_out_of_order_timestamps() {
        let job = Job {
            created_at: parse_timestamp("2025-01-01T00:00:10Z"),
            started_at: parse_timestamp("2025-01-01T00:00:05Z"),
            ..Default::default()
        };
        assert!(!job.timestamps_ordered());
    }

    #[test]
    fn result_body_from_content_backend() {
        let json = r##"{"job_id":"abc","topic":"AI","result":"# AI","completed_at":"2025-01-01T00:00:00"}"##;
        let result: JobResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.text(), "# AI");
        assert_eq!(result.topic.as_deref(), Some("AI"));
        assert!(result.completed_at.is_some());
        assert!(JobResult::default().text().is_empty());
    }

    #[test]
    fn duration_needs_both_ends() {
        let mut job = Job {
            started_at: parse_timestamp("2025-01-01T00:00:00Z"),
            ..Default::default()
        };
        assert!(job.duration().is_none());
        job.completed_at = parse_timestamp("2025-01-01T00:01:05Z");
        assert_eq!(job.duration().unwrap().num_seconds(), 65);
    }
}
