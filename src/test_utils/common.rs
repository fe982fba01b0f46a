use std::sync::Arc;
use std::time::Duration;

use crate::ConsulDiscoveryService;
use crate::DiscoveryConfig;
use crate::DiscoveryContext;
use crate::HealthEntry;
use crate::InMemoryRegistry;
use crate::RawKvRecord;
use crate::RawPayload;

/// Polls `condition` until it holds. Panics after two seconds.
pub(crate) async fn eventually(
    what: &str,
    condition: impl Fn() -> bool,
) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), poll).await.is_err() {
        panic!("timed out waiting for: {what}");
    }
}

/// Health list where every instance carries its own service address
pub(crate) fn health_payload(instances: &[(&str, &str)]) -> RawPayload {
    RawPayload::Discovery(
        instances
            .iter()
            .map(|(address, port)| HealthEntry::new(Some(*address), Some((*port).into()), None))
            .collect(),
    )
}

pub(crate) fn kv_payload(
    key: &str,
    value: Option<&str>,
) -> RawPayload {
    RawPayload::Kv(Some(RawKvRecord {
        create_index: 5,
        modify_index: 7,
        key: key.to_string(),
        value: value.map(str::to_string),
        ..Default::default()
    }))
}

/// Discovery service wired to a fresh in-memory registry
pub(crate) fn memory_service() -> (Arc<ConsulDiscoveryService>, InMemoryRegistry) {
    let registry = InMemoryRegistry::new();
    let context = DiscoveryContext::builder()
        .config(DiscoveryConfig::default())
        .registry_factory(Arc::new(registry.clone()))
        .build()
        .expect("context");
    let service = ConsulDiscoveryService::new(context).expect("service");
    (Arc::new(service), registry)
}
