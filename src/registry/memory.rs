use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::AgentService;
use super::RegistryClient;
use super::RegistryClientFactory;
use super::RegistryResult;
use super::ServiceRegistration;
use super::Subscription;
use super::SubscriptionSender;
use crate::DiscoveryConfig;
use crate::RawKvRecord;
use crate::RawPayload;
use crate::RegistryError;
use crate::ResourceKind;
use crate::Result;

type WatchKey = (ResourceKind, String);

/// Registry kept entirely in process.
///
/// Subscriptions only receive what the holder pushes with
/// [`emit_change`](InMemoryRegistry::emit_change) and
/// [`emit_error`](InMemoryRegistry::emit_error), plus KV writes made through
/// [`RegistryClient::kv_set`]. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    watchers: HashMap<WatchKey, Vec<SubscriptionSender>>,
    watches_started: HashMap<WatchKey, usize>,
    services: HashMap<String, AgentService>,
    registrations: Vec<ServiceRegistration>,
    kv: HashMap<String, RawKvRecord>,
    kv_index: u64,
    registration_failure: Option<RegistryError>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a change to every live subscription on the resource.
    /// Returns how many subscriptions received it.
    pub fn emit_change(
        &self,
        kind: ResourceKind,
        name: &str,
        payload: RawPayload,
    ) -> usize {
        self.emit(kind, name, |sender| sender.change(payload.clone()))
    }

    /// Pushes an error to every live subscription on the resource
    pub fn emit_error(
        &self,
        kind: ResourceKind,
        name: &str,
        error: RegistryError,
    ) -> usize {
        self.emit(kind, name, |sender| sender.error(error.clone()))
    }

    fn emit(
        &self,
        kind: ResourceKind,
        name: &str,
        send: impl Fn(&SubscriptionSender) -> bool,
    ) -> usize {
        let mut state = self.state.lock();
        let Some(senders) = state.watchers.get_mut(&(kind, name.to_string())) else {
            return 0;
        };
        senders.retain(|sender| !sender.is_ended());
        senders.iter().filter(|sender| send(sender)).count()
    }

    /// Subscriptions ever opened on the resource
    pub fn watches_started(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> usize {
        self.state
            .lock()
            .watches_started
            .get(&(kind, name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Subscriptions on the resource that have not been ended
    pub fn active_watches(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> usize {
        self.state
            .lock()
            .watchers
            .get(&(kind, name.to_string()))
            .map(|senders| senders.iter().filter(|s| !s.is_ended()).count())
            .unwrap_or(0)
    }

    /// Every registration call that reached the agent, in order
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.state.lock().registrations.clone()
    }

    /// Makes subsequent registrations fail with `error` (`None` to recover)
    pub fn fail_registrations_with(
        &self,
        error: Option<RegistryError>,
    ) {
        self.state.lock().registration_failure = error;
    }

    /// Drops a service as if its registration expired on the agent
    pub fn deregister(
        &self,
        id: &str,
    ) -> Option<AgentService> {
        self.state.lock().services.remove(id)
    }

    pub fn kv_value(
        &self,
        key: &str,
    ) -> Option<String> {
        self.state.lock().kv.get(key).and_then(|r| r.value.clone())
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    fn watch(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Subscription {
        let (sender, subscription) = Subscription::channel();
        let key = (kind, name.to_string());
        let mut state = self.state.lock();
        *state.watches_started.entry(key.clone()).or_default() += 1;
        state.watchers.entry(key).or_default().push(sender);
        subscription
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> RegistryResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.registration_failure.clone() {
            return Err(error);
        }
        state.registrations.push(registration.clone());
        state
            .services
            .insert(registration.identity().to_string(), AgentService::from(registration));
        Ok(())
    }

    async fn list_services(&self) -> RegistryResult<HashMap<String, AgentService>> {
        Ok(self.state.lock().services.clone())
    }

    async fn kv_set(
        &self,
        key: &str,
        value: &str,
    ) -> RegistryResult<bool> {
        let record = {
            let mut state = self.state.lock();
            state.kv_index += 1;
            let index = state.kv_index;
            let record = state.kv.entry(key.to_string()).or_insert_with(|| RawKvRecord {
                create_index: index,
                key: key.to_string(),
                ..Default::default()
            });
            record.modify_index = index;
            record.value = Some(value.to_string());
            record.clone()
        };

        self.emit_change(ResourceKind::Kv, key, RawPayload::Kv(Some(record)));
        Ok(true)
    }
}

impl RegistryClientFactory for InMemoryRegistry {
    fn create(
        &self,
        _config: &DiscoveryConfig,
    ) -> Result<Arc<dyn RegistryClient>> {
        Ok(Arc::new(self.clone()))
    }
}
