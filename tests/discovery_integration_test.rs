//! End-to-end flows through the public API, backed by the in-memory registry

use std::sync::Arc;
use std::time::Duration;

use consul_discovery::ConnectionEndpoint;
use consul_discovery::ConsulDiscoveryService;
use consul_discovery::DiscoveryConfig;
use consul_discovery::DiscoveryContext;
use consul_discovery::Error;
use consul_discovery::HealthEntry;
use consul_discovery::InMemoryRegistry;
use consul_discovery::RawPayload;
use consul_discovery::RegistryError;
use consul_discovery::ResourceKind;
use consul_discovery::WatchError;

const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (Arc<ConsulDiscoveryService>, InMemoryRegistry) {
    let registry = InMemoryRegistry::new();
    let context = DiscoveryContext::builder()
        .config(DiscoveryConfig::default())
        .registry_factory(Arc::new(registry.clone()))
        .build()
        .expect("context");
    (Arc::new(ConsulDiscoveryService::new(context).expect("service")), registry)
}

fn instances(addresses: &[&str]) -> RawPayload {
    RawPayload::Discovery(
        addresses
            .iter()
            .map(|address| HealthEntry::new(Some(*address), Some(8080u16.into()), None))
            .collect(),
    )
}

#[tokio::test]
async fn concurrent_callers_resolve_from_one_watch() {
    let (service, registry) = setup();

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.get_connections("billing").await })
        })
        .collect();

    tokio::time::timeout(WAIT, async {
        while registry.watches_started(ResourceKind::Discovery, "billing") == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("watch should start");
    registry.emit_change(ResourceKind::Discovery, "billing", instances(&["10.0.0.1"]));

    for caller in callers {
        let connections = tokio::time::timeout(WAIT, caller).await.unwrap().unwrap().unwrap();
        assert_eq!(connections, vec![ConnectionEndpoint::new("10.0.0.1", "8080")]);
    }
    assert_eq!(registry.watches_started(ResourceKind::Discovery, "billing"), 1);
}

#[tokio::test]
async fn failed_fresh_watch_is_recreated_on_next_access() {
    let (service, registry) = setup();

    let first = service.ready("billing", ResourceKind::Discovery);
    registry.emit_error(
        ResourceKind::Discovery,
        "billing",
        RegistryError::Transport("connection refused".into()),
    );
    let err: Error = tokio::time::timeout(WAIT, first).await.unwrap().unwrap_err().into();
    assert!(matches!(err, Error::Watch(WatchError::Transport(_))));
    assert!(!service.contains("billing", ResourceKind::Discovery));

    let retry = service.ready("billing", ResourceKind::Discovery);
    assert_eq!(registry.watches_started(ResourceKind::Discovery, "billing"), 2);
    registry.emit_change(ResourceKind::Discovery, "billing", instances(&["10.0.0.2"]));

    let snapshot = tokio::time::timeout(WAIT, retry).await.unwrap().unwrap();
    assert_eq!(snapshot.connections(), &[ConnectionEndpoint::new("10.0.0.2", "8080")]);
}

#[tokio::test]
async fn kv_write_round_trips_through_the_watch() {
    let (service, _registry) = setup();

    let waiting = service.ready("feature/flag", ResourceKind::Kv);
    assert!(service.set_kv("feature/flag", "enabled").await.unwrap());

    let snapshot = tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
    assert_eq!(snapshot.kv().and_then(|r| r.value.as_deref()), Some("enabled"));
    assert_eq!(
        service.get_kv("feature/flag").await.unwrap().value.as_deref(),
        Some("enabled")
    );
}
