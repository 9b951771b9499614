//! Retry loop for background syncs.
//!
//! Delays follow a [`RetryPolicy`]: fixed by default (backoff factor 1.0),
//! optionally exponential and jittered, always capped at the policy's
//! maximum delay. Unbounded policies keep retrying until success or
//! cancellation.

use crate::cancel::CancellationToken;
use crate::config::{clamped_secs, RetryPolicy};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_factor.max(1.0).powi(attempt.min(64) as i32);
        let max_secs = self.max_delay().as_secs_f64();
        let capped_secs = (self.delay().as_secs_f64() * multiplier).min(max_secs);

        let final_secs = if self.jitter {
            // Scale by 0.5..1.5 so the mean delay is unchanged.
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(max_secs)
        } else {
            capped_secs
        };

        clamped_secs(final_secs)
    }

    fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Whether retrying stopped because of cancellation.
    pub cancelled: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation according to `policy`.
///
/// Stops early when `should_retry` rejects an error or `cancel` fires while
/// waiting between attempts; the last error is returned in both cases.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt: u32 = 0;

    loop {
        stats.attempts = attempt + 1;

        let error = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("{} succeeded after {} attempts", label, attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(error.to_string());

        if !should_retry(&error) {
            debug!("{} failed with a non-retryable error: {}", label, error);
            return (Err(error), stats);
        }

        if !policy.allows_attempt(attempt + 1) {
            warn!(
                "{}: all {} attempts exhausted. Last error: {}",
                label, stats.attempts, error
            );
            return (Err(error), stats);
        }

        let delay = policy.calculate_delay(attempt);
        stats.total_delay += delay;

        match policy.max_attempts {
            Some(max) => warn!(
                "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                label,
                attempt + 1,
                max,
                error,
                delay
            ),
            None => warn!(
                "{}: attempt {} failed: {}. Retrying in {:?}",
                label,
                attempt + 1,
                error,
                delay
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                debug!("{}: retry cancelled", label);
                stats.cancelled = true;
                return (Err(error), stats);
            }
        }

        attempt += 1;
    }
}
