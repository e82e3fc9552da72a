//! `jobwatch`: submit backend jobs and follow them to completion.
//!
//! Progress lines and the final report go to stdout; diagnostics go to
//! stderr through `tracing`.

mod commands;
mod output;

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use jobwatch_client::config::{ClientConfig, Profile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{ChatArgs, Context, GenerateArgs, HealthArgs, ResultArgs, WatchArgs};

#[derive(Parser)]
#[command(name = "jobwatch", about = "Follow long-running backend jobs")]
struct Cli {
    /// Backend base URL (overrides JOBWATCH_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Status poll interval in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Reopen the live channel after it drops
    #[arg(long, global = true)]
    reconnect: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a content-generation job and follow it
    Generate(GenerateArgs),
    /// Run an agent session and print its answer
    Chat(ChatArgs),
    /// Follow an existing job
    Watch(WatchArgs),
    /// Fetch the result of a finished job
    #[command(name = "result")]
    Fetch(ResultArgs),
    /// Query the backend health endpoint
    Health(HealthArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch_cli=info,jobwatch_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::debug!(base_url = %config.base_url, profile = ?config.profile, "Loaded configuration");

    match cli.command {
        Command::Generate(args) => {
            let ctx = Context::new(config, Some(Profile::Content))?;
            commands::generate(&ctx, args).await
        }
        Command::Chat(args) => {
            let ctx = Context::new(config, Some(Profile::Sessions))?;
            commands::chat(&ctx, args).await
        }
        Command::Watch(args) => {
            let ctx = Context::new(config, args.profile)?;
            commands::watch(&ctx, args).await
        }
        Command::Fetch(args) => {
            let ctx = Context::new(config, args.profile)?;
            commands::result(&ctx, args).await
        }
        Command::Health(args) => {
            let ctx = Context::new(config, args.profile)?;
            commands::health(&ctx).await
        }
    }
}

/// Environment first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("Invalid environment configuration")?;
    if let Some(base_url) = &cli.base_url {
        let overridden = ClientConfig::new(base_url, config.profile)
            .with_context(|| format!("Invalid --base-url {base_url}"))?;
        config.base_url = overridden.base_url;
        config.ws_url = overridden.ws_url;
    }
    if let Some(ms) = cli.poll_interval_ms {
        anyhow::ensure!(ms > 0, "--poll-interval-ms must be greater than zero");
        config.poll_interval = Duration::from_millis(ms);
    }
    if cli.reconnect {
        config.reconnect = true;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_profile_flag_is_reported_as_a_flag_error() {
        let err = Cli::try_parse_from(["jobwatch", "watch", "abc", "--profile", "batch"])
            .err()
            .expect("parsing should fail");
        let text = err.to_string();
        assert!(text.contains("unknown profile 'batch'"), "{text}");
        assert!(!text.contains("JOBWATCH_PROFILE"), "{text}");
    }

    #[test]
    fn watch_accepts_profile_flag() {
        let cli = Cli::try_parse_from(["jobwatch", "watch", "sess-1", "--profile", "sessions"])
            .expect("arguments should parse");
        match cli.command {
            Command::Watch(args) => assert_eq!(args.profile, Some(Profile::Sessions)),
            _ => panic!("expected the watch command"),
        }
    }
}
