use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::DiscoveryContext;
use crate::constants::LOG_TARGET;
use crate::utils::async_task::spawn_task;
use crate::watch::WatchController;
use crate::AgentService;
use crate::Completion;
use crate::ConnectionEndpoint;
use crate::DiscoveryConfig;
use crate::NormalizedKvRecord;
use crate::RegistryClient;
use crate::ResourceKind;
use crate::ResourceSnapshot;
use crate::Result;
use crate::ServiceRegistration;
use crate::WatchError;

/// Pull API over the watch cache.
///
/// The first request for a resource starts a watch on it; later requests are
/// served from the cached value while the watch keeps it fresh.
pub struct ConsulDiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<dyn RegistryClient>,
    controller: Arc<WatchController>,
    registration_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsulDiscoveryService {
    pub fn new(context: DiscoveryContext) -> Result<Self> {
        let DiscoveryContext {
            config,
            registry_factory,
        } = context;
        let registry = registry_factory.create(&config)?;
        debug!(target: LOG_TARGET, agent = %config.registry.base_url(), "discovery service created");

        Ok(Self {
            controller: WatchController::new(registry.clone()),
            registry,
            config,
            registration_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Completion that settles once `name` has usable data of `kind`.
    ///
    /// Starts the watch on first use. Concurrent callers on a resource
    /// without data share one completion; with data already cached the
    /// completion comes back fulfilled. Must be called inside a Tokio runtime.
    pub fn ready(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> Completion<ResourceSnapshot, WatchError> {
        self.controller.ready(name, kind)
    }

    /// All healthy endpoints of `service`
    pub async fn get_connections(
        &self,
        service: &str,
    ) -> Result<Vec<ConnectionEndpoint>> {
        let snapshot = self.ready(service, ResourceKind::Discovery).await?;
        Ok(snapshot.connections().to_vec())
    }

    /// One healthy endpoint of `service`, picked uniformly at random
    pub async fn get_connection(
        &self,
        service: &str,
    ) -> Result<Option<ConnectionEndpoint>> {
        let connections = self.get_connections(service).await?;
        Ok(connections.choose(&mut rand::thread_rng()).cloned())
    }

    pub async fn get_kv(
        &self,
        key: &str,
    ) -> Result<NormalizedKvRecord> {
        let snapshot = self.ready(key, ResourceKind::Kv).await?;
        Ok(snapshot.kv().cloned().unwrap_or_default())
    }

    /// Writes a KV value through the agent. Watchers of the key see it on
    /// their next change.
    pub async fn set_kv(
        &self,
        key: &str,
        value: &str,
    ) -> Result<bool> {
        let stored = self.registry.kv_set(key, value).await.map_err(|e| {
            error!(target: LOG_TARGET, key, error = %e, "kv write failed");
            e
        })?;
        Ok(stored)
    }

    /// Registers this process as a service instance unless the agent already
    /// lists it.
    ///
    /// With `check_interval`, the registration is re-asserted on every tick
    /// so an agent restart does not lose it. Calling `register` again
    /// replaces the previous schedule.
    pub async fn register(
        &self,
        registration: ServiceRegistration,
        check_interval: Option<Duration>,
    ) -> Result<()> {
        self.stop_registration_task();

        let result = register_once(self.registry.as_ref(), &registration).await;

        if let Some(interval) = check_interval {
            let registry = self.registry.clone();
            let handle = spawn_task("service registration", move || {
                registration_loop(registry, registration, interval)
            });
            if let Some(previous) = self.registration_task.lock().replace(handle) {
                previous.abort();
            }
        }

        result
    }

    /// Services known to the local agent, keyed by id
    pub async fn list(&self) -> Result<HashMap<String, AgentService>> {
        Ok(self.registry.list_services().await?)
    }

    pub async fn find(
        &self,
        id: &str,
    ) -> Result<Option<AgentService>> {
        Ok(self.list().await?.remove(id))
    }

    /// Stops the registration schedule and drops every watch. Callers still
    /// waiting are rejected with [`WatchError::Cleared`].
    pub fn clear(&self) {
        self.stop_registration_task();
        self.controller.clear_all();
        info!(target: LOG_TARGET, "discovery cache cleared");
    }

    /// Builds a unique instance id:
    /// `{service}-{remote}-{local}-{port}-{random}` with dots turned into dashes.
    pub fn generate_id(opts: &GenerateIdOpts) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            opts.service_name,
            opts.remote_address.as_deref().unwrap_or(UNSPECIFIED_ADDRESS),
            opts.local_address.as_deref().unwrap_or(UNSPECIFIED_ADDRESS),
            opts.port.as_deref().unwrap_or_default(),
            nanoid::nanoid!()
        )
        .replace('.', "-")
    }

    /// Resources currently watched, sorted by name
    pub fn watched_resources(&self) -> Vec<(String, ResourceKind)> {
        self.controller.watched_resources()
    }

    pub fn contains(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> bool {
        self.controller.contains(name, kind)
    }

    fn stop_registration_task(&self) {
        if let Some(task) = self.registration_task.lock().take() {
            task.abort();
            debug!(target: LOG_TARGET, "registration schedule stopped");
        }
    }

    #[cfg(test)]
    pub(crate) fn controller(&self) -> &Arc<WatchController> {
        &self.controller
    }
}

impl Drop for ConsulDiscoveryService {
    fn drop(&mut self) {
        self.stop_registration_task();
    }
}

const UNSPECIFIED_ADDRESS: &str = "0.0.0.0";

/// Inputs of [`ConsulDiscoveryService::generate_id`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateIdOpts {
    pub service_name: String,
    /// Default: `0.0.0.0`
    pub local_address: Option<String>,
    /// Default: `0.0.0.0`
    pub remote_address: Option<String>,
    /// Default: empty
    pub port: Option<String>,
}

impl GenerateIdOpts {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn local_address(
        mut self,
        address: impl Into<String>,
    ) -> Self {
        self.local_address = Some(address.into());
        self
    }

    pub fn remote_address(
        mut self,
        address: impl Into<String>,
    ) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn port(
        mut self,
        port: impl ToString,
    ) -> Self {
        self.port = Some(port.to_string());
        self
    }
}

async fn register_once(
    registry: &dyn RegistryClient,
    registration: &ServiceRegistration,
) -> Result<()> {
    let id = registration.identity();

    let services = registry.list_services().await.map_err(|e| {
        error!(target: LOG_TARGET, service = id, error = %e, "listing agent services failed");
        e
    })?;
    if services.contains_key(id) {
        debug!(target: LOG_TARGET, service = id, "service already registered");
        return Ok(());
    }

    registry.register_service(registration).await.map_err(|e| {
        error!(target: LOG_TARGET, service = id, error = %e, "service registration failed");
        e
    })?;
    info!(target: LOG_TARGET, service = id, "service registered");
    Ok(())
}

async fn registration_loop(
    registry: Arc<dyn RegistryClient>,
    registration: ServiceRegistration,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; `register` has just run
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = register_once(registry.as_ref(), &registration).await {
            warn!(target: LOG_TARGET, service = registration.identity(), error = %e, "scheduled registration failed");
        }
    }
}
