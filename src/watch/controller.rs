//! Watch-driven cache state machine.
//!
//! Every watched resource has one [`ResourceEntry`] in the controller's map
//! and one event pump task draining its subscription. The pump applies each
//! event while holding the map lock, so events of one resource are handled
//! strictly in delivery order and never interleave with `ready`.
//!
//! ```text
//! Uninitialized --ready()--> Watching --usable change--> Ready
//!                               |                         |
//!                               +--error / empty change---+--> Degraded
//!                                                               |
//!       no usable data, transport timeout, 20 failures, clear --+--> Terminated
//! ```

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ReadyCompletion;
use super::ResourceEntry;
use super::ResourceKey;
use super::ResourceSnapshot;
use crate::constants::LOG_TARGET;
use crate::constants::WATCH_ERROR_LIMIT;
use crate::normalize_payload;
use crate::utils::async_task::spawn_task;
use crate::Completion;
use crate::RawPayload;
use crate::RegistryClient;
use crate::ResourceKind;
use crate::WatchError;
use crate::WatchEvent;

type EntryMap = HashMap<ResourceKey, ResourceEntry>;

pub(crate) struct WatchController {
    entries: Mutex<EntryMap>,
    registry: Arc<dyn RegistryClient>,
    next_id: AtomicU64,
}

impl WatchController {
    pub(crate) fn new(registry: Arc<dyn RegistryClient>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            registry,
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns a completion that settles once the resource has usable data.
    ///
    /// Callers racing on a resource without data share one pending
    /// completion. When data is already cached the completion is returned
    /// fulfilled.
    pub(crate) fn ready(
        self: &Arc<Self>,
        name: &str,
        kind: ResourceKind,
    ) -> ReadyCompletion {
        let mut entries = self.entries.lock();
        let key = ResourceKey::new(kind, name);

        let entry = entries.entry(key.clone()).or_insert_with(|| self.create_entry(&key));

        let completion = if let Some(pending) = entry.unsettled_pending() {
            pending
        } else if entry.has_usable_data() {
            Completion::fulfilled(entry.snapshot())
        } else {
            let pending = Completion::new();
            entry.pending = Some(pending.clone());
            pending
        };

        self.watch_on_change(&key, entry);
        self.watch_on_error(&key, entry);

        completion
    }

    fn create_entry(
        &self,
        key: &ResourceKey,
    ) -> ResourceEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = self.registry.watch(key.kind, &key.name);
        debug!(target: LOG_TARGET, resource = %key, id, "watcher initialized");
        ResourceEntry::new(id, &key.name, key.kind, subscription)
    }

    /// Attaches the change handler. A second attach is a no-op.
    pub(crate) fn watch_on_change(
        self: &Arc<Self>,
        key: &ResourceKey,
        entry: &mut ResourceEntry,
    ) {
        if entry.listeners.change {
            return;
        }
        entry.listeners.change = true;
        self.ensure_pump(key, entry);
    }

    /// Attaches the error handler. A second attach is a no-op.
    pub(crate) fn watch_on_error(
        self: &Arc<Self>,
        key: &ResourceKey,
        entry: &mut ResourceEntry,
    ) {
        if entry.listeners.error {
            return;
        }
        entry.listeners.error = true;
        self.ensure_pump(key, entry);
    }

    /// Starts draining the subscription, once per entry
    fn ensure_pump(
        self: &Arc<Self>,
        key: &ResourceKey,
        entry: &mut ResourceEntry,
    ) {
        let Some(events) = entry.subscription.take_events() else {
            return;
        };
        let controller = Arc::downgrade(self);
        let cancel = entry.subscription.cancellation();
        let key = key.clone();
        let id = entry.id;

        spawn_task(&format!("watch pump {key}"), move || async move {
            Self::pump(controller, key, id, events, cancel).await;
            Ok(())
        });
    }

    async fn pump(
        controller: Weak<Self>,
        key: ResourceKey,
        id: u64,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            let Some(this) = controller.upgrade() else {
                break;
            };

            match event {
                Some(event) => this.dispatch(&key, id, event),
                None => {
                    this.close(&key, id);
                    break;
                }
            }
        }
        trace!(target: LOG_TARGET, resource = %key, id, "watch pump stopped");
    }

    fn dispatch(
        &self,
        key: &ResourceKey,
        id: u64,
        event: WatchEvent,
    ) {
        let mut entries = self.entries.lock();
        let Some(listeners) = entries.get(key).filter(|e| e.id == id).map(|e| e.listeners) else {
            trace!(target: LOG_TARGET, resource = %key, id, "dropping event of a stale watcher");
            return;
        };

        match event {
            WatchEvent::Change(payload) if listeners.change => {
                Self::on_change(&mut entries, key, payload);
            }
            WatchEvent::Error(e) if listeners.error => {
                Self::handle_error(&mut entries, key, WatchError::Transport(e));
            }
            _ => trace!(target: LOG_TARGET, resource = %key, "no handler attached for event"),
        }
    }

    /// Commits a usable update, or degrades the entry on an empty one
    fn on_change(
        entries: &mut EntryMap,
        key: &ResourceKey,
        payload: RawPayload,
    ) {
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        let data = normalize_payload(entry.kind, payload);
        if data.is_usable() {
            entry.commit(data);
            trace!(target: LOG_TARGET, resource = %key, "watcher data updated");
            return;
        }

        warn!(
            target: LOG_TARGET,
            resource = %key,
            data = ?data,
            "watcher got empty or invalid {}",
            key.kind.payload_label()
        );
        Self::handle_error(entries, key, WatchError::EmptyUpdate(key.kind));
    }

    /// Single place where an entry degrades. The failure is always counted and
    /// rejects the pending completion; the entry is torn down when it has no
    /// usable data left or when the failure forces it.
    fn handle_error(
        entries: &mut EntryMap,
        key: &ResourceKey,
        err: WatchError,
    ) {
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        let failures = entry.fail(&err);
        error!(target: LOG_TARGET, resource = %key, error = %err, "watcher error");
        info!(target: LOG_TARGET, resource = %key, consecutive_failures = failures);

        let id = entry.id;
        let usable = entry.has_usable_data();
        if err.is_transport_timeout() {
            info!(target: LOG_TARGET, resource = %key, "watcher timed out, dropping it");
            Self::clear_service(entries, key, id);
        } else if !usable {
            Self::clear_service(entries, key, id);
        } else if failures >= WATCH_ERROR_LIMIT {
            error!(target: LOG_TARGET, resource = %key, "watcher error limit is reached");
            Self::clear_service(entries, key, id);
        }
    }

    /// The producer went away without the entry being torn down
    fn close(
        &self,
        key: &ResourceKey,
        id: u64,
    ) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key).filter(|e| e.id == id) else {
            return;
        };
        warn!(target: LOG_TARGET, resource = %key, "watch subscription closed");
        entry.reject_pending(WatchError::SubscriptionClosed(key.to_string()));
        Self::clear_service(&mut entries, key, id);
    }

    /// Ends the subscription and forgets the entry. No-op when the entry with
    /// this id is already gone.
    fn clear_service(
        entries: &mut EntryMap,
        key: &ResourceKey,
        id: u64,
    ) {
        if entries.get(key).map(|e| e.id) != Some(id) {
            return;
        }
        if let Some(entry) = entries.remove(key) {
            entry.subscription.end();
            debug!(target: LOG_TARGET, resource = %key, id, "watcher cleared");
        }
    }

    /// Rejects every waiting caller and drops every watch
    pub(crate) fn clear_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (key, mut entry) in drained {
            entry.reject_pending(WatchError::Cleared);
            entry.subscription.end();
            debug!(target: LOG_TARGET, resource = %key, "watcher cleared");
        }
    }

    //-----------------------------------------------------------
    // Introspection

    pub(crate) fn watched_resources(&self) -> Vec<(String, ResourceKind)> {
        let mut resources: Vec<_> = self
            .entries
            .lock()
            .keys()
            .map(|key| (key.name.clone(), key.kind))
            .collect();
        resources.sort_by_key(|(name, kind)| (name.clone(), kind.to_string()));
        resources
    }

    pub(crate) fn contains(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> bool {
        self.entries.lock().contains_key(&ResourceKey::new(kind, name))
    }

    /// Cached value of a resource, usable or not
    pub(crate) fn snapshot(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> Option<ResourceSnapshot> {
        self.entries
            .lock()
            .get(&ResourceKey::new(kind, name))
            .map(ResourceEntry::snapshot)
    }

    pub(crate) fn consecutive_failures(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> Option<u32> {
        self.entries
            .lock()
            .get(&ResourceKey::new(kind, name))
            .map(|e| e.consecutive_failures)
    }
}
