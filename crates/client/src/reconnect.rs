//! Exponential-backoff reconnection for push channels.
//!
//! Reconnecting is opt-in: an observer only calls [`reconnect_loop`]
//! when its [`ObserverConfig`](crate::observer::ObserverConfig) carries
//! a [`ReconnectConfig`].

use std::time::Duration;

use jobwatch_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::client::{PushConnection, PushTransport};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to
/// [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Wait, then retry opening the push channel until it succeeds.
///
/// Returns `None` if `cancel` fires first.
pub async fn reconnect_loop(
    transport: &dyn PushTransport,
    job_id: &JobId,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<Box<dyn PushConnection>> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        tracing::info!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting push channel",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job_id, "Reconnect cancelled");
                return None;
            }
            result = transport.open(job_id) => match result {
                Ok(conn) => {
                    tracing::info!(job_id = %job_id, attempt, "Push channel reconnected");
                    return Some(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Reconnect attempt {attempt} failed",
                    );
                }
            }
        }

        delay = next_delay(delay, config);
    }
}
