//! Terminal rendering of transcript lines, events and results.

use jobwatch_client::events::ObserverEvent;
use jobwatch_client::messages::{LogEntry, LogLevel};
use jobwatch_client::renderer::ResultView;
use jobwatch_core::job::JobMetadata;

pub fn log_icon(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "ℹ",
        LogLevel::Success => "✔",
        LogLevel::Warning => "⚠",
    }
}

/// `[HH:MM:SS] <icon> message`, without the clock when no timestamp was sent.
pub fn format_log(entry: &LogEntry) -> String {
    let icon = log_icon(entry.level);
    match entry.timestamp {
        Some(ts) => format!("[{}] {icon} {}", ts.format("%H:%M:%S"), entry.message),
        None => format!("{icon} {}", entry.message),
    }
}

/// One line per event worth showing; `None` for the rest.
pub fn format_event(event: &ObserverEvent) -> Option<String> {
    match event {
        ObserverEvent::Log { entry, .. } => Some(format_log(entry)),
        ObserverEvent::StatusChanged { status, .. } => Some(format!("… status: {status}")),
        ObserverEvent::ErrorReported { message, .. } => Some(format!("✖ {message}")),
        ObserverEvent::Disconnected {
            reason: Some(reason),
            ..
        } => Some(format!("… live updates unavailable ({reason}), polling only")),
        ObserverEvent::Connected { .. }
        | ObserverEvent::Disconnected { reason: None, .. }
        | ObserverEvent::Terminal { .. }
        | ObserverEvent::ResultReady { .. }
        | ObserverEvent::ResultFailed { .. } => None,
    }
}

pub fn format_metadata(metadata: &JobMetadata) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(model) = &metadata.model {
        lines.push(format!("Model:       {model}"));
    }
    if let Some(temperature) = metadata.temperature {
        lines.push(format!("Temperature: {temperature}"));
    }
    if let Some(max_tokens) = metadata.max_tokens {
        lines.push(format!("Max tokens:  {max_tokens}"));
    }
    if let Some(usage) = &metadata.token_usage {
        lines.push(format!(
            "Tokens used: {} ({} in / {} out)",
            usage.total_tokens, usage.input_tokens, usage.output_tokens
        ));
    }
    if let Some(api_status) = &metadata.api_status {
        lines.push(format!("API status:  {api_status}"));
    }
    lines
}

/// Full report block for `ResultView::Report`.
pub fn format_report(view: &ResultView) -> Option<String> {
    let ResultView::Report {
        markdown,
        metadata,
        duration,
    } = view
    else {
        return None;
    };
    let mut out = String::new();
    out.push_str(markdown.trim_end());
    out.push('\n');

    let mut footer: Vec<String> = metadata.as_ref().map(format_metadata).unwrap_or_default();
    if let Some(duration) = duration {
        footer.push(format!("Duration:    {duration}"));
    }
    if !footer.is_empty() {
        out.push_str("\n---\n");
        for line in footer {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Some(out)
}
