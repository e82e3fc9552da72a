//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Args;
use jobwatch_client::affordances::{self, SharePlatform, SystemClipboard};
use jobwatch_client::api::JobApi;
use jobwatch_client::client::WsTransport;
use jobwatch_client::config::{ClientConfig, Endpoints, Profile};
use jobwatch_client::initiator::JobInitiator;
use jobwatch_client::observer::ProgressObserver;
use jobwatch_client::reconcile::ViewState;
use jobwatch_client::renderer::{agent_response, ResultRenderer, ResultView};
use jobwatch_core::request::{AgentConfig, AgentRunRequest, ContentRequest};
use jobwatch_core::types::JobId;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use crate::output::{format_event, format_report};

/// File name prefix for downloaded content reports.
const CONTENT_FILE_PREFIX: &str = "content";

/// File name prefix for downloaded session reports.
const SESSION_FILE_PREFIX: &str = "adk-session";

/// What to do with a finished report.
#[derive(Debug, Clone, Default, Args)]
pub struct ActionArgs {
    /// Copy the report to the clipboard
    #[arg(long)]
    pub copy: bool,

    /// Save the report as markdown in the download directory
    #[arg(long)]
    pub download: bool,

    /// Open a share link (twitter, linkedin, facebook)
    #[arg(long)]
    pub share: Option<SharePlatform>,

    /// Page URL shared on LinkedIn and Facebook (defaults to the backend URL)
    #[arg(long)]
    pub page_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Topic to write about
    #[arg(required = true, num_args = 1..)]
    pub topic: Vec<String>,

    /// JSON file with agent overrides
    #[arg(long)]
    pub agents: Option<PathBuf>,

    /// JSON file with task overrides
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Do not print progress lines
    #[arg(long, short)]
    pub quiet: bool,

    #[command(flatten)]
    pub actions: ActionArgs,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Agent application name
    #[arg(long, default_value = "chat-demo")]
    pub app: String,

    /// User id (random when omitted)
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, default_value = jobwatch_core::request::DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = jobwatch_core::request::DEFAULT_TEMPERATURE)]
    pub temperature: f64,

    #[arg(long, default_value_t = jobwatch_core::request::DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// Print the whole session report instead of just the agent's answer
    #[arg(long)]
    pub full: bool,

    /// Do not print progress lines
    #[arg(long, short)]
    pub quiet: bool,

    /// Message for the agent
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    #[command(flatten)]
    pub actions: ActionArgs,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    pub job_id: String,

    /// Backend family (content or sessions)
    #[arg(long)]
    pub profile: Option<Profile>,

    #[arg(long, short)]
    pub quiet: bool,

    #[command(flatten)]
    pub actions: ActionArgs,
}

#[derive(Debug, Args)]
pub struct ResultArgs {
    pub job_id: String,

    /// Backend family (content or sessions)
    #[arg(long)]
    pub profile: Option<Profile>,

    #[command(flatten)]
    pub actions: ActionArgs,
}

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Backend family (content or sessions)
    #[arg(long)]
    pub profile: Option<Profile>,
}

/// Configuration plus the HTTP client shared by every command.
pub struct Context {
    config: ClientConfig,
    api: Arc<JobApi>,
}

impl Context {
    pub fn new(mut config: ClientConfig, profile: Option<Profile>) -> Result<Self> {
        if let Some(profile) = profile {
            config.profile = profile;
            config.endpoints = Endpoints::for_profile(profile);
        }
        let api = JobApi::from_config(&config).context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            api: Arc::new(api),
        })
    }

    fn file_prefix(&self) -> &'static str {
        match self.config.profile {
            Profile::Content => CONTENT_FILE_PREFIX,
            Profile::Sessions => SESSION_FILE_PREFIX,
        }
    }

    fn observe(&self, job_id: JobId) -> ProgressObserver {
        let transport = WsTransport::new(self.config.ws_url.clone(), self.config.endpoints.push.clone());
        ProgressObserver::start(
            job_id,
            self.api.clone(),
            Arc::new(transport),
            self.config.observer_config(),
        )
    }
}

pub async fn generate(ctx: &Context, args: GenerateArgs) -> Result<()> {
    let mut request = ContentRequest::new(args.topic.join(" "));
    request.agents = read_json(args.agents.as_deref())?;
    request.tasks = read_json(args.tasks.as_deref())?;

    let job_id = JobInitiator::new(ctx.api.clone()).submit(&request).await?;
    println!("Job {job_id} submitted");

    let view = follow(ctx, job_id.clone(), args.quiet).await?;
    let report = finished_report(&view)?;
    print_report(&report)?;
    run_actions(ctx, &job_id, &report, &args.actions).await
}

pub async fn chat(ctx: &Context, args: ChatArgs) -> Result<()> {
    let user = args.user.clone().unwrap_or_else(default_user_id);
    let mut request = AgentRunRequest::new(&args.app, user, args.prompt.join(" "));
    request.config = AgentConfig {
        model: args.model.clone(),
        temperature: args.temperature,
        max_tokens: args.max_tokens,
    };

    let job_id = JobInitiator::new(ctx.api.clone()).submit(&request).await?;
    tracing::info!(job_id = %job_id, app = %args.app, "Session started");

    let view = follow(ctx, job_id.clone(), args.quiet).await?;
    let report = finished_report(&view)?;
    let text = report.text().unwrap_or_default();
    match agent_response(text) {
        Some(answer) if !args.full => println!("{answer}"),
        _ => print_report(&report)?,
    }
    run_actions(ctx, &job_id, &report, &args.actions).await
}

pub async fn watch(ctx: &Context, args: WatchArgs) -> Result<()> {
    let job_id = JobId::new(args.job_id);
    let view = follow(ctx, job_id.clone(), args.quiet).await?;
    let report = finished_report(&view)?;
    print_report(&report)?;
    run_actions(ctx, &job_id, &report, &args.actions).await
}

pub async fn result(ctx: &Context, args: ResultArgs) -> Result<()> {
    let job_id = JobId::new(args.job_id);
    let result = ResultRenderer::new(ctx.api.clone())
        .fetch_result(&job_id)
        .await?;
    let report = ResultView::from_result(&result);
    print_report(&report)?;
    run_actions(ctx, &job_id, &report, &args.actions).await
}

pub async fn health(ctx: &Context) -> Result<()> {
    let body = ctx
        .api
        .health()
        .await
        .with_context(|| format!("Backend at {} is not healthy", ctx.config.base_url))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Observe `job_id`, printing progress, until it settles or Ctrl-C.
async fn follow(ctx: &Context, job_id: JobId, quiet: bool) -> Result<ViewState> {
    let observer = ctx.observe(job_id);
    let mut events = observer.events();
    let print = |event| {
        if !quiet {
            if let Some(line) = format_event(&event) {
                println!("{line}");
            }
        }
    };

    let outcome = {
        let done = observer.wait_until_done();
        tokio::pin!(done);
        loop {
            tokio::select! {
                view = &mut done => break Some(view),
                event = events.recv() => match event {
                    Ok(event) => print(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed progress events");
                    }
                    Err(RecvError::Closed) => break Some((&mut done).await),
                },
                _ = tokio::signal::ctrl_c() => break None,
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print(event);
    }
    observer.shutdown().await;
    outcome.ok_or_else(|| anyhow!("Interrupted"))
}

fn finished_report(view: &ViewState) -> Result<ResultView> {
    match ResultView::from_view(view) {
        ResultView::JobFailed { message } => bail!("Job failed: {message}"),
        ResultView::FetchFailed { detail } => bail!("Could not fetch result: {detail}"),
        ResultView::Pending => bail!("Job did not finish"),
        report => Ok(report),
    }
}

fn print_report(report: &ResultView) -> Result<()> {
    let text = format_report(report).ok_or_else(|| anyhow!("No report to print"))?;
    println!("\n{text}");
    Ok(())
}

async fn run_actions(ctx: &Context, job_id: &JobId, report: &ResultView, actions: &ActionArgs) -> Result<()> {
    let Some(text) = report.text() else {
        return Ok(());
    };

    if actions.copy {
        if affordances::copy_to_clipboard(&SystemClipboard, text).await {
            println!("Copied to clipboard");
        } else {
            println!("Could not copy to clipboard");
        }
    }

    if actions.download {
        let path = affordances::download(&ctx.config.download_dir, ctx.file_prefix(), job_id, text).await?;
        println!("Saved {}", path.display());
    }

    if let Some(platform) = actions.share {
        let page_url = actions
            .page_url
            .clone()
            .unwrap_or_else(|| ctx.config.base_url.to_string());
        if let Some(url) = affordances::share(platform, text, &page_url).await {
            println!("Share link: {url}");
        }
    }
    Ok(())
}

fn read_json(path: Option<&Path>) -> Result<Option<Value>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(Some(value))
}

fn default_user_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("user-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_client::reconcile::ResultState;
    use jobwatch_core::job::JobResult;

    #[test]
    fn read_json_loads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        std::fs::write(&path, r#"{"researcher":{"role":"Analyst"}}"#).unwrap();

        let value = read_json(Some(&path)).unwrap().unwrap();
        assert_eq!(value["researcher"]["role"], "Analyst");
        assert!(read_json(None).unwrap().is_none());
    }

    #[test]
    fn read_json_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{oops").unwrap();
        let err = read_json(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn profile_override_switches_endpoints() {
        let config = ClientConfig::new("http://localhost:8000", Profile::Content).unwrap();
        let ctx = Context::new(config, Some(Profile::Sessions)).unwrap();
        assert_eq!(ctx.config.endpoints.push, "/ws/sessions/{id}");
        assert_eq!(ctx.file_prefix(), SESSION_FILE_PREFIX);
    }

    #[test]
    fn generated_user_ids_are_short() {
        let id = default_user_id();
        assert!(id.starts_with("user-"));
        assert_eq!(id.len(), 13);
    }

    #[test]
    fn failed_jobs_are_errors() {
        let mut view = ViewState::new(JobId::new("a"));
        view.done = true;
        view.result = ResultState::JobFailed("quota exceeded".into());
        let err = finished_report(&view).unwrap_err();
        assert_eq!(err.to_string(), "Job failed: quota exceeded");

        view.result = ResultState::Ready(JobResult {
            result: Some("# ok".into()),
            ..Default::default()
        });
        assert_eq!(finished_report(&view).unwrap().text(), Some("# ok"));
    }
}
