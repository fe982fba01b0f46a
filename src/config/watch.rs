use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::constants::DEFAULT_TIMEOUT_MS;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Long-poll wait passed to the registry (blocking query `wait`).
    /// The cache itself never times out a caller.
    /// Default: 10000
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry delay after a failed long-poll
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("watch.timeout_ms must be > 0".into()));
        }
        self.backoff.validate()
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
