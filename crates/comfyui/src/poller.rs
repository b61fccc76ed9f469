//! Exponential-backoff polling of a submitted prompt.
//!
//! [`poll_until_done`] asks the backend for the prompt's history with
//! growing delays until it completes, fails, runs out of time, sees too
//! many consecutive errors, or the [`CancellationToken`] fires.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::messages::{OutputImage, PromptStatus};

/// Tunable parameters for the polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second status check.
    pub initial_delay: Duration,
    /// Upper bound on the delay between checks.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each check.
    pub multiplier: f64,
    /// Total time allowed from the first check.
    pub timeout: Duration,
    /// Consecutive failed status requests tolerated before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
            timeout: Duration::from_secs(120),
            max_consecutive_errors: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Why polling stopped without output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("prompt did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("backend unreachable after {attempts} consecutive failures: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("backend execution failed: {0}")]
    Failed(String),

    #[error("polling cancelled")]
    Cancelled,
}

/// Wait for `prompt_id` to finish and return its saved output images.
pub async fn poll_until_done(
    backend: &dyn GenerationBackend,
    prompt_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<Vec<OutputImage>, PollError> {
    let deadline = Instant::now() + config.timeout;
    let mut delay = config.initial_delay;
    let mut consecutive_errors = 0u32;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let check = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(PollError::TimedOut(config.timeout)),
            result = backend.prompt_status(prompt_id) => result,
        };

        match check {
            Ok(PromptStatus::Completed(images)) => {
                tracing::debug!(prompt_id, attempt, images = images.len(), "Prompt completed");
                return Ok(images);
            }
            Ok(PromptStatus::Failed(message)) => {
                tracing::warn!(prompt_id, attempt, %message, "Prompt failed on backend");
                return Err(PollError::Failed(message));
            }
            Ok(PromptStatus::InProgress) => {
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(
                    backend = backend.name(),
                    prompt_id,
                    attempt,
                    consecutive_errors,
                    error = %e,
                    "Status check failed",
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    return Err(PollError::Unavailable {
                        attempts: consecutive_errors,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        // Wait before the next check, respecting cancellation and the deadline.
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(PollError::TimedOut(config.timeout)),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
