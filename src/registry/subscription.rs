use std::fmt::Debug;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::RawPayload;
use crate::RegistryError;

/// Event delivered by a subscription, in registry delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Change(RawPayload),
    Error(RegistryError),
}

/// Consumer half of a watch on one resource.
///
/// The event stream can be taken exactly once; whoever takes it is the only
/// listener. Ending (or dropping) the subscription cancels the producer.
pub struct Subscription {
    events: Option<mpsc::UnboundedReceiver<WatchEvent>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Creates a connected producer/consumer pair
    pub fn channel() -> (SubscriptionSender, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            SubscriptionSender {
                tx,
                cancel: cancel.clone(),
            },
            Subscription {
                events: Some(rx),
                cancel,
            },
        )
    }

    /// Cancels the watch. Idempotent.
    pub fn end(&self) {
        self.cancel.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Takes the event stream. Returns `None` once it has been taken.
    pub(crate) fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<WatchEvent>> {
        self.events.take()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Debug for Subscription {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("events_taken", &self.events.is_none())
            .field("ended", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Producer half of a watch, held by the registry transport
#[derive(Clone, Debug)]
pub struct SubscriptionSender {
    tx: mpsc::UnboundedSender<WatchEvent>,
    cancel: CancellationToken,
}

impl SubscriptionSender {
    /// Emits a change. Returns `false` once the subscription is gone.
    pub fn change(
        &self,
        payload: RawPayload,
    ) -> bool {
        self.emit(WatchEvent::Change(payload))
    }

    /// Emits an error. Returns `false` once the subscription is gone.
    pub fn error(
        &self,
        error: RegistryError,
    ) -> bool {
        self.emit(WatchEvent::Error(error))
    }

    fn emit(
        &self,
        event: WatchEvent,
    ) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the consumer ends or drops the subscription
    pub async fn ended(&self) {
        self.cancel.cancelled().await
    }
}
