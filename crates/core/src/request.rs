//! Job creation payloads and their client-side validation.
//!
//! Every request kind implements [`JobRequest`]. The initiator calls
//! [`JobRequest::ensure_valid`] before touching the network, so an empty
//! topic or prompt never produces a request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CoreError;
use crate::types::JobId;

pub const MAX_TOPIC_LEN: usize = 500;
pub const MAX_PROMPT_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_MODEL_LEN: usize = 64;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A request that can create a backend job.
pub trait JobRequest: Send + Sync {
    /// Returns an empty `Vec` if valid; otherwise every violation found.
    fn validate(&self) -> Vec<String>;

    /// JSON body for the creation endpoint.
    fn create_body(&self) -> Value;

    /// JSON body for the start endpoint of two-step session backends.
    fn start_body(&self, job_id: &JobId) -> Value {
        let mut body = self.create_body();
        if let Value::Object(map) = &mut body {
            map.insert("session_id".into(), Value::String(job_id.to_string()));
        }
        body
    }

    /// Values substituted into path templates (`{app}`, `{user}`).
    fn path_params(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn ensure_valid(&self) -> Result<(), CoreError> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::from_violations(violations))
        }
    }
}

fn check_required(errors: &mut Vec<String>, field: &str, value: &str, max_len: usize) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field} must not be empty"));
    } else if trimmed.chars().count() > max_len {
        errors.push(format!("{field} must be at most {max_len} characters"));
    }
}

/// Content-generator request: a topic plus optional agent/task overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Value>,
}

impl ContentRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

impl JobRequest for ContentRequest {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_required(&mut errors, "topic", &self.topic, MAX_TOPIC_LEN);
        for (name, value) in [("agents", &self.agents), ("tasks", &self.tasks)] {
            if matches!(value, Some(v) if !v.is_object()) {
                errors.push(format!("{name} must be a JSON object"));
            }
        }
        errors
    }

    fn create_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("topic".into(), Value::String(self.topic.trim().to_string()));
        if let Some(agents) = &self.agents {
            body.insert("agents".into(), agents.clone());
        }
        if let Some(tasks) = &self.tasks {
            body.insert("tasks".into(), tasks.clone());
        }
        Value::Object(body)
    }
}

/// Model parameters for an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl AgentConfig {
    fn validate_into(&self, errors: &mut Vec<String>) {
        check_required(errors, "config.model", &self.model, MAX_MODEL_LEN);
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push("config.temperature must be between 0.0 and 2.0".to_string());
        }
        if !(64..=8192).contains(&self.max_tokens) {
            errors.push("config.max_tokens must be between 64 and 8192".to_string());
        }
    }
}

/// Agent-session request (chat and quickstart console).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunRequest {
    pub app_name: String,
    pub user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub config: AgentConfig,
}

impl AgentRunRequest {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            config: AgentConfig::default(),
        }
    }
}

impl JobRequest for AgentRunRequest {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_required(&mut errors, "app_name", &self.app_name, MAX_NAME_LEN);
        check_required(&mut errors, "user_id", &self.user_id, MAX_NAME_LEN);
        check_required(&mut errors, "prompt", &self.prompt, MAX_PROMPT_LEN);
        self.config.validate_into(&mut errors);
        errors
    }

    fn create_body(&self) -> Value {
        json!({
            "config": self.config,
            "prompt": self.prompt.trim(),
        })
    }

    fn start_body(&self, job_id: &JobId) -> Value {
        json!({
            "session_id": job_id,
            "app_name": self.app_name,
            "user_id": self.user_id,
            "config": self.config,
            "prompt": self.prompt.trim(),
        })
    }

    fn path_params(&self) -> Vec<(&'static str, String)> {
        vec![("app", self.app_name.clone()), ("user", self.user_id.clone())]
    }
}
