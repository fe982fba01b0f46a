use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;
use tracing::Instrument;

use crate::constants::LOG_TARGET;
use crate::BackoffPolicy;
use crate::Result;

/// Delay sequence `base, 2*base, 4*base, ...` capped at the policy maximum
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Returns the delay before the next retry and advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        // 2^20 * base is far beyond any sane maximum
        let factor = 1u64 << self.attempts.min(20);
        let delay = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Spawns a named background task, logging its error if it fails.
///
/// The task runs inside the caller's span.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(
        async move {
            if let Err(e) = task_fn().await {
                error!(target: LOG_TARGET, "spawned task: {name} stopped or encountered an error: {:?}", e);
            }
        }
        .in_current_span(),
    )
}
