use std::fmt::Display;

use crate::Completion;
use crate::ConnectionEndpoint;
use crate::NormalizedKvRecord;
use crate::ResourceData;
use crate::ResourceKind;
use crate::Subscription;
use crate::WatchError;

/// Settles the in-flight `ready` request of one resource
pub(crate) type ReadyCompletion = Completion<ResourceSnapshot, WatchError>;

/// Value of a watched resource at the moment it became ready
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub name: String,
    pub kind: ResourceKind,
    pub data: ResourceData,
}

impl ResourceSnapshot {
    /// Endpoints of a discovery snapshot, empty for a KV snapshot
    pub fn connections(&self) -> &[ConnectionEndpoint] {
        self.data.as_connections().unwrap_or_default()
    }

    pub fn kv(&self) -> Option<&NormalizedKvRecord> {
        self.data.as_kv()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResourceKey {
    pub(crate) kind: ResourceKind,
    pub(crate) name: String,
}

impl ResourceKey {
    pub(crate) fn new(
        kind: ResourceKind,
        name: &str,
    ) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Which event kinds have a handler on the subscription
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Listeners {
    pub(crate) change: bool,
    pub(crate) error: bool,
}

/// Cache state of one watched resource.
///
/// Owned by the controller's entry map; never handed out.
#[derive(Debug)]
pub(crate) struct ResourceEntry {
    /// Generation of this instance. A recreated entry for the same key gets a
    /// new id, so events from the previous subscription are dropped.
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) subscription: Subscription,
    pub(crate) listeners: Listeners,
    pub(crate) data: ResourceData,
    pub(crate) consecutive_failures: u32,
    pub(crate) pending: Option<ReadyCompletion>,
}

impl ResourceEntry {
    pub(crate) fn new(
        id: u64,
        name: &str,
        kind: ResourceKind,
        subscription: Subscription,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            subscription,
            listeners: Listeners::default(),
            data: ResourceData::empty(kind),
            consecutive_failures: 0,
            pending: None,
        }
    }

    pub(crate) fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            data: self.data.clone(),
        }
    }

    pub(crate) fn has_usable_data(&self) -> bool {
        self.data.is_usable()
    }

    /// The stored completion, unless it has already been settled
    pub(crate) fn unsettled_pending(&self) -> Option<ReadyCompletion> {
        self.pending.as_ref().filter(|c| !c.is_settled()).cloned()
    }

    /// Replaces the cached data with a usable update and fulfils the pending
    /// completion, if any.
    pub(crate) fn commit(
        &mut self,
        data: ResourceData,
    ) {
        self.consecutive_failures = 0;
        self.data = data;
        if let Some(pending) = self.pending.take() {
            pending.fulfill(self.snapshot());
        }
    }

    /// Counts a failure and rejects the pending completion, if any.
    /// Returns the new failure count.
    pub(crate) fn fail(
        &mut self,
        error: &WatchError,
    ) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.reject_pending(error.clone());
        self.consecutive_failures
    }

    pub(crate) fn reject_pending(
        &mut self,
        error: WatchError,
    ) {
        if let Some(pending) = self.pending.take() {
            pending.reject(error);
        }
    }
}
