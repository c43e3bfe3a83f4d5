//! Multi-subscriber notification primitive.
//!
//! Components publish state-change events through [`Alert`] values instead of
//! holding callback lists. Two subscription modes are supported:
//!
//! - **persistent**: [`Alert::subscribe`] returns a broadcast receiver that
//!   observes every subsequent emission.
//! - **one-shot**: [`Alert::once`] returns a oneshot receiver that observes
//!   only the next emission and is then automatically unsubscribed.
//!
//! Emission never blocks and never fails: emissions with no subscribers are
//! silently dropped, and lagging persistent subscribers miss events rather
//! than stalling the publisher.

use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};

/// Capacity of the persistent broadcast channel backing each alert.
const ALERT_CHANNEL_CAPACITY: usize = 32;

/// A single named event source with persistent and one-shot subscribers.
#[derive(Debug)]
pub struct Alert<T> {
    on: broadcast::Sender<T>,
    once: Mutex<Vec<oneshot::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Alert<T> {
    /// Create an alert with no subscribers.
    pub fn new() -> Self {
        let (on, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            on,
            once: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every subsequent emission.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.on.subscribe()
    }

    /// Subscribe to the next emission only.
    ///
    /// The receiver resolves with the next emitted value and the
    /// subscription is removed afterwards. If the alert is cleared before an
    /// emission occurs (for example because the underlying connection went
    /// away), the receiver resolves with an error.
    pub fn once(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.waiters().push(tx);
        rx
    }

    /// Wait for the next emission, returning `None` if the alert was cleared.
    pub async fn next(&self) -> Option<T> {
        self.once().await.ok()
    }

    /// Emit a value to all current subscribers.
    pub fn emit(&self, value: T) {
        // Persistent subscribers first, mirroring registration order.
        let _ = self.on.send(value.clone());
        for waiter in self.waiters().drain(..) {
            let _ = waiter.send(value.clone());
        }
    }

    /// Drop all pending one-shot subscribers without emitting.
    ///
    /// Their receivers resolve with an error, which lets callers waiting on
    /// a response distinguish "no answer is coming" from a valid value.
    pub fn clear_once(&self) {
        self.waiters().clear();
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, Vec<oneshot::Sender<T>>> {
        match self.once.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Alert<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persistent_subscriber_sees_every_emission() {
        let alert = Alert::new();
        let mut rx = alert.subscribe();
        alert.emit(1u32);
        alert.emit(2u32);
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn one_shot_subscriber_sees_only_next_emission() {
        let alert = Alert::new();
        let rx = alert.once();
        alert.emit("first".to_string());
        alert.emit("second".to_string());
        assert_eq!(rx.await.unwrap(), "first");
        // A fresh one-shot picks up from the current emission, not history.
        let rx = alert.once();
        alert.emit("third".to_string());
        assert_eq!(rx.await.unwrap(), "third");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let alert = Alert::new();
        alert.emit(());
    }

    #[tokio::test]
    async fn clear_once_resolves_pending_waiters_with_error() {
        let alert: Alert<f64> = Alert::new();
        let rx = alert.once();
        alert.clear_once();
        assert!(rx.await.is_err());
    }
}
