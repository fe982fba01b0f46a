use std::sync::Arc;
use std::time::Duration;

use tracing_test::traced_test;

use super::*;
use crate::test_utils::eventually;
use crate::test_utils::health_payload;
use crate::test_utils::kv_payload;
use crate::ConnectionEndpoint;
use crate::InMemoryRegistry;
use crate::MockRegistryClient;
use crate::RegistryError;
use crate::ResourceKind;
use crate::Subscription;
use crate::WatchError;
use crate::WATCH_ERROR_LIMIT;

const SVC: &str = "svc";

fn setup() -> (Arc<WatchController>, InMemoryRegistry) {
    let registry = InMemoryRegistry::new();
    (WatchController::new(Arc::new(registry.clone())), registry)
}

async fn settle(completion: ReadyCompletion) -> Result<ResourceSnapshot, WatchError> {
    tokio::time::timeout(Duration::from_secs(2), completion)
        .await
        .expect("completion should settle")
}

fn transport_error() -> RegistryError {
    RegistryError::Transport("connection reset".into())
}

/// Brings `SVC` to Ready with one endpoint
async fn ready_with_data(
    controller: &Arc<WatchController>,
    registry: &InMemoryRegistry,
) {
    let pending = controller.ready(SVC, ResourceKind::Discovery);
    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[("10.0.0.1", "8080")]));
    settle(pending).await.expect("first change is usable");
}

#[tokio::test]
async fn test_concurrent_first_ready_calls_share_one_completion() {
    let (controller, registry) = setup();

    let first = controller.ready(SVC, ResourceKind::Discovery);
    let second = controller.ready(SVC, ResourceKind::Discovery);

    assert!(first.ptr_eq(&second));
    assert!(!first.is_settled());
    assert_eq!(registry.watches_started(ResourceKind::Discovery, SVC), 1);
}

#[tokio::test]
async fn test_same_name_different_kind_are_separate_entries() {
    let (controller, registry) = setup();

    let discovery = controller.ready(SVC, ResourceKind::Discovery);
    let kv = controller.ready(SVC, ResourceKind::Kv);

    assert!(!discovery.ptr_eq(&kv));
    assert_eq!(registry.watches_started(ResourceKind::Discovery, SVC), 1);
    assert_eq!(registry.watches_started(ResourceKind::Kv, SVC), 1);
    assert_eq!(
        controller.watched_resources(),
        vec![(SVC.to_string(), ResourceKind::Discovery), (SVC.to_string(), ResourceKind::Kv)]
    );
}

#[tokio::test]
async fn test_usable_change_fulfils_pending_callers() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);

    registry.emit_change(
        ResourceKind::Discovery,
        SVC,
        health_payload(&[("10.0.0.1", "8080"), ("10.0.0.2", "8081")]),
    );

    let snapshot = settle(pending).await.unwrap();
    assert_eq!(snapshot.name, SVC);
    assert_eq!(snapshot.kind, ResourceKind::Discovery);
    assert_eq!(
        snapshot.connections(),
        &[ConnectionEndpoint::new("10.0.0.1", "8080"), ConnectionEndpoint::new("10.0.0.2", "8081")]
    );
}

#[tokio::test]
async fn test_ready_with_cached_data_returns_settled_completion() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    let first = controller.ready(SVC, ResourceKind::Discovery);
    let second = controller.ready(SVC, ResourceKind::Discovery);

    assert!(first.is_settled());
    assert!(!first.ptr_eq(&second));
    assert_eq!(settle(first).await.unwrap().connections().len(), 1);
}

#[tokio::test]
async fn test_update_replaces_data_wholesale() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[("10.0.0.9", "9000")]));

    eventually("data replaced", || {
        controller
            .snapshot(SVC, ResourceKind::Discovery)
            .is_some_and(|s| s.connections() == [ConnectionEndpoint::new("10.0.0.9", "9000")])
    })
    .await;
}

#[tokio::test]
async fn test_repeated_attach_keeps_one_handler() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    for _ in 0..3 {
        let _ = controller.ready(SVC, ResourceKind::Discovery);
    }
    registry.emit_error(ResourceKind::Discovery, SVC, transport_error());

    eventually("error handled", || {
        controller.consecutive_failures(SVC, ResourceKind::Discovery) == Some(1)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.consecutive_failures(SVC, ResourceKind::Discovery), Some(1));
    assert_eq!(registry.watches_started(ResourceKind::Discovery, SVC), 1);
}

#[tokio::test]
async fn test_empty_change_with_cached_data_keeps_entry() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[]));

    eventually("failure counted", || {
        controller.consecutive_failures(SVC, ResourceKind::Discovery) == Some(1)
    })
    .await;
    let snapshot = controller.snapshot(SVC, ResourceKind::Discovery).unwrap();
    assert_eq!(snapshot.connections(), &[ConnectionEndpoint::new("10.0.0.1", "8080")]);

    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[("10.0.0.3", "80")]));
    eventually("counter reset", || {
        controller.consecutive_failures(SVC, ResourceKind::Discovery) == Some(0)
    })
    .await;
}

#[tokio::test]
async fn test_empty_change_on_fresh_entry_rejects_and_tears_down() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);

    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[]));

    let err = settle(pending).await.unwrap_err();
    assert_eq!(err, WatchError::EmptyUpdate(ResourceKind::Discovery));
    assert_eq!(err.to_string(), "got empty or invalid connection params");
    assert!(!controller.contains(SVC, ResourceKind::Discovery));
    assert_eq!(registry.active_watches(ResourceKind::Discovery, SVC), 0);
}

#[tokio::test]
async fn test_null_kv_value_rejects() {
    let (controller, registry) = setup();
    let pending = controller.ready("config/app", ResourceKind::Kv);

    registry.emit_change(ResourceKind::Kv, "config/app", kv_payload("config/app", None));

    let err = settle(pending).await.unwrap_err();
    assert_eq!(err.to_string(), "got empty or invalid kv data");
    assert!(!controller.contains("config/app", ResourceKind::Kv));
}

#[tokio::test]
async fn test_empty_kv_string_is_usable() {
    let (controller, registry) = setup();
    let pending = controller.ready("config/app", ResourceKind::Kv);

    registry.emit_change(ResourceKind::Kv, "config/app", kv_payload("config/app", Some("")));

    let snapshot = settle(pending).await.unwrap();
    assert_eq!(snapshot.kv().and_then(|r| r.value.as_deref()), Some(""));
}

#[tokio::test]
async fn test_mismatched_payload_shape_counts_as_empty() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);

    registry.emit_change(ResourceKind::Discovery, SVC, kv_payload(SVC, Some("x")));

    assert_eq!(
        settle(pending).await.unwrap_err(),
        WatchError::EmptyUpdate(ResourceKind::Discovery)
    );
}

#[tokio::test]
async fn test_error_limit_on_fresh_entry() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);

    let delivered: usize = (0..WATCH_ERROR_LIMIT)
        .map(|_| registry.emit_error(ResourceKind::Discovery, SVC, transport_error()))
        .sum();

    assert!(delivered >= 1);
    assert_eq!(
        settle(pending).await.unwrap_err(),
        WatchError::Transport(transport_error())
    );
    eventually("entry removed", || !controller.contains(SVC, ResourceKind::Discovery)).await;
    assert_eq!(registry.active_watches(ResourceKind::Discovery, SVC), 0);
}

#[tokio::test]
#[traced_test]
async fn test_error_limit_on_entry_with_data() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    for _ in 0..WATCH_ERROR_LIMIT - 1 {
        registry.emit_error(ResourceKind::Discovery, SVC, transport_error());
    }
    eventually("19 failures counted", || {
        controller.consecutive_failures(SVC, ResourceKind::Discovery) == Some(WATCH_ERROR_LIMIT - 1)
    })
    .await;
    assert!(controller.contains(SVC, ResourceKind::Discovery));
    assert!(!logs_contain("watcher error limit is reached"));

    registry.emit_error(ResourceKind::Discovery, SVC, transport_error());

    eventually("entry removed", || !controller.contains(SVC, ResourceKind::Discovery)).await;
    assert_eq!(registry.active_watches(ResourceKind::Discovery, SVC), 0);
    assert!(logs_contain("watcher error limit is reached"));
}

#[tokio::test]
async fn test_transport_timeout_tears_down_entry_with_data() {
    let (controller, registry) = setup();
    ready_with_data(&controller, &registry).await;

    registry.emit_error(
        ResourceKind::Discovery,
        SVC,
        RegistryError::Timeout {
            endpoint: "/v1/health/service/svc".into(),
        },
    );

    eventually("entry removed", || !controller.contains(SVC, ResourceKind::Discovery)).await;
}

#[tokio::test]
async fn test_recreated_entry_ignores_old_subscription() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);
    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[]));
    settle(pending).await.unwrap_err();

    let pending = controller.ready(SVC, ResourceKind::Discovery);
    assert_eq!(registry.watches_started(ResourceKind::Discovery, SVC), 2);
    assert_eq!(registry.active_watches(ResourceKind::Discovery, SVC), 1);

    registry.emit_change(ResourceKind::Discovery, SVC, health_payload(&[("10.0.0.5", "81")]));
    let snapshot = settle(pending).await.unwrap();
    assert_eq!(snapshot.connections(), &[ConnectionEndpoint::new("10.0.0.5", "81")]);
}

#[tokio::test]
async fn test_closed_subscription_rejects_and_tears_down() {
    let mut registry = MockRegistryClient::new();
    // Sender dropped right away: the stream ends immediately
    registry.expect_watch().returning(|_, _| Subscription::channel().1);
    let controller = WatchController::new(Arc::new(registry));

    let pending = controller.ready(SVC, ResourceKind::Discovery);

    assert!(matches!(settle(pending).await, Err(WatchError::SubscriptionClosed(_))));
    eventually("entry removed", || !controller.contains(SVC, ResourceKind::Discovery)).await;
}

#[tokio::test]
async fn test_clear_all_rejects_waiters_and_ends_watches() {
    let (controller, registry) = setup();
    let pending = controller.ready(SVC, ResourceKind::Discovery);
    let _ = controller.ready("config/app", ResourceKind::Kv);

    controller.clear_all();

    assert_eq!(settle(pending).await.unwrap_err(), WatchError::Cleared);
    assert!(controller.watched_resources().is_empty());
    assert_eq!(registry.active_watches(ResourceKind::Discovery, SVC), 0);
    assert_eq!(registry.active_watches(ResourceKind::Kv, "config/app"), 0);
}
