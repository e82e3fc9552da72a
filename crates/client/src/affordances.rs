//! Copy, download and share actions on a finished result.
//!
//! Clipboard and share actions are best-effort: failures are logged and
//! reported as `false`/`None`, never raised. Downloads return an error
//! since the caller usually wants to tell the user where the file went.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use jobwatch_core::types::JobId;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Characters of the result quoted in a tweet.
pub const TWEET_EXCERPT_CHARS: usize = 280;

/// Length of the job-id prefix used in file names.
const FILE_ID_PREFIX_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AffordanceError {
    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("Failed to write {}: {source}", path.display())]
    Download {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build share link: {0}")]
    Share(String),

    #[error("Failed to open {url}: {message}")]
    Open { url: String, message: String },
}

/// Something that can hold text for pasting.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn set_text(&self, text: &str) -> Result<(), AffordanceError>;
}

#[cfg(target_os = "macos")]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("pbcopy", &[])];

#[cfg(windows)]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("clip", &[])];

#[cfg(not(any(target_os = "macos", windows)))]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

/// The desktop clipboard, reached through the platform's copy command.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn set_text(&self, text: &str) -> Result<(), AffordanceError> {
        let mut last_error = String::from("no clipboard command found");
        for (program, args) in CLIPBOARD_COMMANDS {
            match pipe_to(program, args, text).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = format!("{program}: {e}"),
            }
        }
        Err(AffordanceError::Clipboard(last_error))
    }
}

async fn pipe_to(program: &str, args: &[&str], text: &str) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
    }
    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("exited with {status}")))
    }
}

/// Copy `text`, returning whether it worked.
pub async fn copy_to_clipboard(clipboard: &dyn Clipboard, text: &str) -> bool {
    match clipboard.set_text(text).await {
        Ok(()) => {
            tracing::info!(chars = text.chars().count(), "Copied result to clipboard");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Copy to clipboard failed");
            false
        }
    }
}

/// `<prefix>-<first 8 chars of id>.md`
pub fn download_file_name(prefix: &str, job_id: &JobId) -> String {
    format!("{prefix}-{}.md", job_id.prefix(FILE_ID_PREFIX_LEN))
}

/// Write `text` as a markdown file in `dir` and return its path.
pub async fn download(
    dir: &Path,
    prefix: &str,
    job_id: &JobId,
    text: &str,
) -> Result<PathBuf, AffordanceError> {
    let path = dir.join(download_file_name(prefix, job_id));
    tokio::fs::write(&path, text)
        .await
        .map_err(|source| AffordanceError::Download {
            path: path.clone(),
            source,
        })?;
    tracing::info!(path = %path.display(), "Saved result");
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharePlatform {
    Twitter,
    LinkedIn,
    Facebook,
}

impl FromStr for SharePlatform {
    type Err = AffordanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(SharePlatform::Twitter),
            "linkedin" => Ok(SharePlatform::LinkedIn),
            "facebook" => Ok(SharePlatform::Facebook),
            other => Err(AffordanceError::Share(format!("unknown platform '{other}'"))),
        }
    }
}

/// The first `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the share link for `platform`.
///
/// Twitter quotes an excerpt of the text; LinkedIn and Facebook share
/// `page_url`.
pub fn share_url(platform: SharePlatform, text: &str, page_url: &str) -> Result<Url, AffordanceError> {
    let (base, key, value) = match platform {
        SharePlatform::Twitter => (
            "https://twitter.com/intent/tweet",
            "text",
            excerpt(text, TWEET_EXCERPT_CHARS),
        ),
        SharePlatform::LinkedIn => (
            "https://www.linkedin.com/sharing/share-offsite/",
            "url",
            page_url,
        ),
        SharePlatform::Facebook => ("https://www.facebook.com/sharer/sharer.php", "u", page_url),
    };
    Url::parse_with_params(base, &[(key, value)]).map_err(|e| AffordanceError::Share(e.to_string()))
}

/// Open `url` in the default browser.
pub async fn open_url(url: &Url) -> Result<(), AffordanceError> {
    let (program, args): (&str, Vec<&str>) = if cfg!(target_os = "macos") {
        ("open", vec![url.as_str()])
    } else if cfg!(windows) {
        ("cmd", vec!["/C", "start", "", url.as_str()])
    } else {
        ("xdg-open", vec![url.as_str()])
    };
    let status = Command::new(program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| AffordanceError::Open {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(AffordanceError::Open {
            url: url.to_string(),
            message: format!("{program} exited with {status}"),
        })
    }
}

/// Build and open a share link. Returns the link whether or not a
/// browser could be launched, `None` only if it could not be built.
pub async fn share(platform: SharePlatform, text: &str, page_url: &str) -> Option<Url> {
    let url = match share_url(platform, text, page_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, ?platform, "Share failed");
            return None;
        }
    };
    if let Err(e) = open_url(&url).await {
        tracing::warn!(error = %e, ?platform, "Could not open share link");
    }
    Some(url)
}
