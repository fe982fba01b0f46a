use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::HeaderMap;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Url;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::AgentService;
use super::RegistryClient;
use super::RegistryClientFactory;
use super::RegistryResult;
use super::ServiceRegistration;
use super::Subscription;
use super::SubscriptionSender;
use crate::constants::CONSUL_INDEX_HEADER;
use crate::constants::CONSUL_TOKEN_HEADER;
use crate::constants::LOG_TARGET;
use crate::constants::REQUEST_TIMEOUT_MARGIN_MS;
use crate::utils::ExponentialBackoff;
use crate::BackoffPolicy;
use crate::DiscoveryConfig;
use crate::HealthEntry;
use crate::RawKvRecord;
use crate::RawPayload;
use crate::RegistryError;
use crate::ResourceKind;
use crate::Result;

/// HTTP client for a Consul agent.
///
/// Watches are blocking queries: each request carries the last seen
/// `X-Consul-Index` and a `wait`, and the agent answers when the data moves
/// or the wait elapses. A change is emitted only when the index moves.
#[derive(Clone, Debug)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    datacenter: Option<String>,
    wait: Duration,
    backoff: BackoffPolicy,
}

/// Successful blocking-query response
#[derive(Debug)]
pub(crate) struct QueryOutcome {
    pub(crate) index: u64,
    pub(crate) payload: RawPayload,
}

impl ConsulClient {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let wait = config.watch.timeout();
        let http = build_http(wait + Duration::from_millis(REQUEST_TIMEOUT_MARGIN_MS))?;

        let base_url = config.registry.base_url();
        let base_url = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| RegistryError::Unavailable(format!("invalid agent address: {base_url}")))?;

        Ok(Self {
            http,
            base_url,
            token: config.registry.token.clone(),
            datacenter: config.registry.datacenter.clone(),
            wait,
            backoff: config.watch.backoff,
        })
    }

    /// Overrides the HTTP timeout derived from the watch wait
    #[cfg(test)]
    pub(crate) fn with_request_timeout(
        mut self,
        timeout: Duration,
    ) -> RegistryResult<Self> {
        self.http = build_http(timeout)?;
        Ok(self)
    }

    /// `{base}/v1/{segments...}`, each segment percent-encoded
    pub(crate) fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Url {
        let mut url = self.base_url.clone();
        // Always Ok: `new` rejects cannot-be-a-base addresses
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn request<'a>(
        &self,
        method: Method,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(segments));
        if let Some(token) = &self.token {
            builder = builder.header(CONSUL_TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        builder
    }

    /// Path segments of the blocking query for a resource. KV keys keep
    /// their `/` hierarchy.
    pub(crate) fn watch_segments(
        kind: ResourceKind,
        name: &str,
    ) -> Vec<&str> {
        match kind {
            ResourceKind::Discovery => vec!["health", "service", name],
            ResourceKind::Kv => kv_segments(name),
        }
    }

    async fn query(
        &self,
        kind: ResourceKind,
        name: &str,
        index: u64,
    ) -> RegistryResult<QueryOutcome> {
        let wait = format!("{}ms", self.wait.as_millis());
        let mut builder = self
            .request(Method::GET, Self::watch_segments(kind, name))
            .query(&[("index", index.to_string()), ("wait", wait)]);
        if kind == ResourceKind::Discovery {
            builder = builder.query(&[("passing", "true")]);
        }
        let response = builder.send().await?;

        let next_index = parse_index(response.headers());

        let payload = match kind {
            ResourceKind::Discovery => {
                let entries: Vec<HealthEntry> = ensure_success(response).await?.json().await?;
                RawPayload::Discovery(entries)
            }
            ResourceKind::Kv if response.status() == StatusCode::NOT_FOUND => RawPayload::Kv(None),
            ResourceKind::Kv => {
                let records: Vec<RawKvRecord> = ensure_success(response).await?.json().await?;
                let record = records.into_iter().next().map(decode_kv_value).transpose()?;
                RawPayload::Kv(record)
            }
        };

        Ok(QueryOutcome {
            index: next_index,
            payload,
        })
    }

    async fn watch_loop(
        self,
        kind: ResourceKind,
        name: String,
        sender: SubscriptionSender,
    ) {
        let mut index = 0u64;
        let mut first = true;
        let mut backoff = ExponentialBackoff::new(self.backoff);

        loop {
            let result = tokio::select! {
                biased;
                _ = sender.ended() => break,
                r = self.query(kind, &name, index) => r,
            };

            match result {
                Ok(outcome) => {
                    backoff.reset();
                    let indexed = outcome.index != 0;
                    let changed = first || (indexed && outcome.index != index);
                    first = false;
                    index = next_watch_index(index, outcome.index);
                    trace!(target: LOG_TARGET, %kind, %name, index, changed, "blocking query returned");

                    if changed && !sender.change(outcome.payload) {
                        break;
                    }

                    // Without an index the agent cannot block, so poll once per wait
                    if !indexed {
                        debug!(target: LOG_TARGET, %kind, %name, "response carried no {CONSUL_INDEX_HEADER}");
                        tokio::select! {
                            biased;
                            _ = sender.ended() => break,
                            _ = tokio::time::sleep(self.wait) => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, %kind, %name, error = %e, "blocking query failed");
                    if !sender.error(e) {
                        break;
                    }
                    let delay = backoff.next_delay();
                    tokio::select! {
                        biased;
                        _ = sender.ended() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!(target: LOG_TARGET, %kind, %name, "watch loop stopped");
    }
}

#[async_trait]
impl RegistryClient for ConsulClient {
    fn watch(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Subscription {
        let (sender, subscription) = Subscription::channel();
        tokio::spawn(self.clone().watch_loop(kind, name.to_string(), sender));
        subscription
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> RegistryResult<()> {
        let response = self
            .request(Method::PUT, ["agent", "service", "register"])
            .json(registration)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn list_services(&self) -> RegistryResult<HashMap<String, AgentService>> {
        let response = self.request(Method::GET, ["agent", "services"]).send().await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn kv_set(
        &self,
        key: &str,
        value: &str,
    ) -> RegistryResult<bool> {
        let response = self
            .request(Method::PUT, kv_segments(key))
            .body(value.to_string())
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

/// Builds [`ConsulClient`]s; the default factory of a discovery context
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsulClientFactory;

impl RegistryClientFactory for ConsulClientFactory {
    fn create(
        &self,
        config: &DiscoveryConfig,
    ) -> Result<Arc<dyn RegistryClient>> {
        Ok(Arc::new(ConsulClient::new(config)?))
    }
}

fn build_http(timeout: Duration) -> RegistryResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RegistryError::Unavailable(e.to_string()))
}

fn kv_segments(key: &str) -> Vec<&str> {
    std::iter::once("kv")
        .chain(key.trim_start_matches('/').split('/'))
        .collect()
}

async fn ensure_success(response: Response) -> RegistryResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let endpoint = response.url().path().to_string();
    let message = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status: status.as_u16(),
        endpoint,
        message,
    })
}

pub(crate) fn parse_index(headers: &HeaderMap) -> u64 {
    headers
        .get(CONSUL_INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Index to send with the next blocking query.
///
/// A missing index (`0`) never drops below 1, since `index=0` does not block.
/// An index that goes backwards means the agent's state was reset, so the
/// next query starts over without blocking.
pub(crate) fn next_watch_index(
    previous: u64,
    returned: u64,
) -> u64 {
    if returned == 0 {
        previous.max(1)
    } else if returned < previous {
        0
    } else {
        returned
    }
}

/// KV values travel base64-encoded and must hold UTF-8 text
pub(crate) fn decode_kv_value(mut record: RawKvRecord) -> RegistryResult<RawKvRecord> {
    if let Some(encoded) = record.value.take() {
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| RegistryError::Decode(format!("kv value of {}: {}", record.key, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| RegistryError::Decode(format!("kv value of {} is not UTF-8: {}", record.key, e)))?;
        record.value = Some(text);
    }
    Ok(record)
}
