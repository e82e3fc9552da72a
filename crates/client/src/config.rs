//! Backend endpoint profiles and environment-driven client configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jobwatch_core::error::CoreError;
use jobwatch_core::types::JobId;
use reqwest::Url;

use crate::observer::ObserverConfig;
use crate::reconnect::ReconnectConfig;

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Which backend family the client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Profile {
    /// One-step content generation (`/api/generate`).
    #[default]
    Content,
    /// Two-step agent sessions (create, then run).
    Sessions,
}

/// A profile name that is neither `content` nor `sessions`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile '{0}' (expected content or sessions)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" => Ok(Profile::Content),
            "sessions" | "session" | "adk" => Ok(Profile::Sessions),
            other => Err(UnknownProfile(other.to_string())),
        }
    }
}

/// Path templates for one backend family.
///
/// Templates use `{id}` for the job id plus request-specific
/// placeholders such as `{app}` and `{user}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub create: String,
    /// Second call that actually starts the run, if the backend needs one.
    pub start: Option<String>,
    pub status: String,
    pub result: String,
    pub push: String,
    pub health: String,
}

impl Endpoints {
    pub fn content() -> Self {
        Self {
            create: "/api/generate".into(),
            start: None,
            status: "/api/status/{id}".into(),
            result: "/api/result/{id}".into(),
            push: "/ws/console/{id}".into(),
            health: "/api/status".into(),
        }
    }

    pub fn sessions() -> Self {
        Self {
            create: "/api/apps/{app}/users/{user}/sessions".into(),
            start: Some("/api/run".into()),
            status: "/api/sessions/{id}/status".into(),
            result: "/api/sessions/{id}/results".into(),
            push: "/ws/sessions/{id}".into(),
            health: "/api/agent".into(),
        }
    }

    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Content => Self::content(),
            Profile::Sessions => Self::sessions(),
        }
    }
}

/// Resolve a path template against a base URL.
///
/// Each path segment is substituted and percent-encoded separately, so
/// an app name containing `/` or spaces stays inside its segment.
pub fn build_url(
    base: &Url,
    template: &str,
    job_id: Option<&JobId>,
    params: &[(&str, String)],
) -> Result<Url, CoreError> {
    let mut url = base.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|()| CoreError::Config {
            key: "base_url",
            message: format!("{base} cannot be used as a base URL"),
        })?;
        segments.pop_if_empty();
        for raw in template.split('/').filter(|s| !s.is_empty()) {
            let mut segment = raw.to_string();
            if let Some(id) = job_id {
                segment = segment.replace("{id}", id.as_str());
            }
            for (name, value) in params {
                segment = segment.replace(&format!("{{{name}}}"), value);
            }
            if segment.contains('{') {
                return Err(CoreError::Validation(format!(
                    "no value for path placeholder in '{template}'"
                )));
            }
            segments.push(&segment);
        }
    }
    Ok(url)
}

/// Derive the push base URL from the HTTP one (`http` -> `ws`, `https` -> `wss`).
pub fn derive_ws_url(base: &Url) -> Result<Url, CoreError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::Config {
                key: "JOBWATCH_WS_URL",
                message: format!("cannot derive a WebSocket URL from scheme '{other}'"),
            })
        }
    };
    let mut ws = base.clone();
    ws.set_scheme(scheme).map_err(|()| CoreError::Config {
        key: "JOBWATCH_WS_URL",
        message: format!("cannot switch {base} to {scheme}"),
    })?;
    Ok(ws)
}

/// Client configuration loaded from environment variables.
///
/// | Env var                         | Default                 |
/// |---------------------------------|-------------------------|
/// | `JOBWATCH_BASE_URL`             | `http://localhost:8000` |
/// | `JOBWATCH_WS_URL`               | derived from base URL   |
/// | `JOBWATCH_PROFILE`              | `content`               |
/// | `JOBWATCH_POLL_INTERVAL_MS`     | `2000`                  |
/// | `JOBWATCH_REQUEST_TIMEOUT_SECS` | unset (no timeout)      |
/// | `JOBWATCH_RECONNECT`            | `false`                 |
/// | `JOBWATCH_DOWNLOAD_DIR`         | `.`                     |
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub ws_url: Url,
    pub profile: Profile,
    pub endpoints: Endpoints,
    pub poll_interval: Duration,
    pub request_timeout: Option<Duration>,
    pub reconnect: bool,
    pub download_dir: PathBuf,
}

impl ClientConfig {
    /// Config for `base_url` with every other setting at its default.
    pub fn new(base_url: &str, profile: Profile) -> Result<Self, CoreError> {
        let base_url = parse_url("JOBWATCH_BASE_URL", base_url)?;
        let ws_url = derive_ws_url(&base_url)?;
        Ok(Self {
            base_url,
            ws_url,
            profile,
            endpoints: Endpoints::for_profile(profile),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: None,
            reconnect: false,
            download_dir: PathBuf::from("."),
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Malformed values are reported as [`CoreError::Config`] naming the
    /// offending variable.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let profile = match lookup("JOBWATCH_PROFILE") {
            Some(raw) => raw.parse().map_err(|e: UnknownProfile| CoreError::Config {
                key: "JOBWATCH_PROFILE",
                message: e.to_string(),
            })?,
            None => Profile::default(),
        };
        let base = lookup("JOBWATCH_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let mut config = Self::new(&base, profile)?;

        if let Some(raw) = lookup("JOBWATCH_WS_URL") {
            config.ws_url = parse_url("JOBWATCH_WS_URL", &raw)?;
        }
        if let Some(raw) = lookup("JOBWATCH_POLL_INTERVAL_MS") {
            let ms = parse_u64("JOBWATCH_POLL_INTERVAL_MS", &raw)?;
            if ms == 0 {
                return Err(CoreError::Config {
                    key: "JOBWATCH_POLL_INTERVAL_MS",
                    message: "must be greater than zero".into(),
                });
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("JOBWATCH_REQUEST_TIMEOUT_SECS") {
            let secs = parse_u64("JOBWATCH_REQUEST_TIMEOUT_SECS", &raw)?;
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("JOBWATCH_RECONNECT") {
            config.reconnect = parse_bool("JOBWATCH_RECONNECT", &raw)?;
        }
        if let Some(raw) = lookup("JOBWATCH_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(raw);
        }
        Ok(config)
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            poll_interval: self.poll_interval,
            reconnect: self.reconnect.then(ReconnectConfig::default),
        }
    }
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw.trim()).map_err(|e| CoreError::Config {
        key,
        message: format!("invalid URL '{raw}': {e}"),
    })
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, CoreError> {
    raw.trim().parse().map_err(|_| CoreError::Config {
        key,
        message: format!("expected a whole number, got '{raw}'"),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, CoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CoreError::Config {
            key,
            message: format!("expected true or false, got '{raw}'"),
        }),
    }
}
