// -
// Watch policy

/// Consecutive failures after which a watched resource is torn down
pub const WATCH_ERROR_LIMIT: u32 = 20;

/// Upper bound for the transport's retry delay after a watch error
pub const BACKOFF_MAX_MS: u64 = 20_000;

/// Default long-poll wait handed to the registry transport
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// -
// Logging

/// Target every watch/registration event is emitted under
pub const LOG_TARGET: &str = "consul_discovery";

// -
// Consul HTTP API

pub(crate) const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
pub(crate) const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// Extra time granted on top of the blocking-query wait before the HTTP
/// request itself is considered timed out
pub(crate) const REQUEST_TIMEOUT_MARGIN_MS: u64 = 5_000;
