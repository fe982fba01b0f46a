//! A one-shot, externally settled completion that many callers can await.
//!
//! Unlike a bare `oneshot` channel, a [`Completion`]:
//! - can be cloned and awaited by any number of callers
//! - is settled from the outside (by the watch controller), exactly once
//! - exposes whether it has been settled, so a settled one can be replaced
//!   instead of handed to a new caller
//!
//! The first call to [`fulfill`](Completion::fulfill) or
//! [`reject`](Completion::reject) wins; later calls are ignored.

use std::fmt::Debug;
use std::future::IntoFuture;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;

type Outcome<T, E> = Option<std::result::Result<T, E>>;

pub struct Completion<T, E> {
    inner: Arc<watch::Sender<Outcome<T, E>>>,
}

impl<T: Clone, E: Clone> Completion<T, E> {
    /// Creates an unsettled completion
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { inner: Arc::new(tx) }
    }

    /// Creates a completion that is already fulfilled with `value`
    pub fn fulfilled(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(Ok(value)));
        Self { inner: Arc::new(tx) }
    }

    /// Creates a completion that is already rejected with `error`
    pub fn rejected(error: E) -> Self {
        let (tx, _rx) = watch::channel(Some(Err(error)));
        Self { inner: Arc::new(tx) }
    }

    /// Settles with a value. Returns `false` if already settled.
    pub fn fulfill(
        &self,
        value: T,
    ) -> bool {
        self.settle(Ok(value))
    }

    /// Settles with an error. Returns `false` if already settled.
    pub fn reject(
        &self,
        error: E,
    ) -> bool {
        self.settle(Err(error))
    }

    fn settle(
        &self,
        outcome: std::result::Result<T, E>,
    ) -> bool {
        let mut outcome = Some(outcome);
        self.inner.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// Returns the outcome without waiting
    pub fn peek(&self) -> Option<std::result::Result<T, E>> {
        self.inner.borrow().clone()
    }

    /// Whether both handles refer to the same completion
    pub fn ptr_eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Waits until the completion is settled and returns its outcome
    pub async fn wait(&self) -> std::result::Result<T, E> {
        let mut rx = self.inner.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            // `self` keeps the sender alive, so this only fails if that invariant breaks
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl<T: Clone, E: Clone> Default for Completion<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Debug for Completion<T, E> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.inner.borrow().is_some())
            .finish()
    }
}

impl<T, E> IntoFuture for Completion<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Output = std::result::Result<T, E>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.wait().await }.boxed()
    }
}
