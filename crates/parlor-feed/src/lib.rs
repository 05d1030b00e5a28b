//! Row-level change feed.
//!
//! A process-wide bus of [`FeedEvent`]s. Writers publish after the store
//! write commits; consumers hold filtered [`Subscription`]s and await typed
//! events instead of registering callbacks. Delivery is at-least-once and
//! FIFO per subscription, with no ordering guarantee across subscriptions.
//!
//! A lagged receiver means events were missed; consumers treat that as a
//! wake-up-and-refetch signal, not as replayable history. A closed bus is
//! retried through [`Feed::resubscribe`] under a bounded budget before the
//! status watch reports [`FeedStatus::Disconnected`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use parlor_types::events::{EventKind, FeedEvent, Table};

const BUS_CAPACITY: usize = 1024;

/// Reconnect budget: attempts and the base delay doubled per attempt.
pub const RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Live,
    Reconnecting,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The subscription fell behind and `n` events were dropped. The
    /// consumer must re-fetch from the record store to close the gap.
    #[error("feed lagged, {0} events missed")]
    Lagged(u64),

    /// The underlying bus is gone; resubscribe or give up.
    #[error("feed transport closed")]
    Closed,

    #[error("subscription cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct Feed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    /// `None` while the transport is down; publishes are dropped (no events
    /// delivered and none synthesized while disconnected).
    bus: RwLock<Option<broadcast::Sender<FeedEvent>>>,
    status_tx: watch::Sender<FeedStatus>,
}

impl Feed {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        let (status_tx, _) = watch::channel(FeedStatus::Live);
        Self {
            inner: Arc::new(FeedInner {
                bus: RwLock::new(Some(bus)),
                status_tx,
            }),
        }
    }

    /// Publish a committed row change to every matching subscription.
    pub fn publish(&self, event: FeedEvent) {
        let bus = self.inner.bus.read().expect("feed bus lock poisoned");
        if let Some(tx) = bus.as_ref() {
            // No receivers is fine; nobody is listening yet.
            let _ = tx.send(event);
        }
    }

    /// Register interest in one table's events. Fails with [`FeedError::Closed`]
    /// while the transport is down.
    pub fn subscribe(&self, table: Table, kinds: &[EventKind]) -> Result<Subscription, FeedError> {
        let bus = self.inner.bus.read().expect("feed bus lock poisoned");
        let tx = bus.as_ref().ok_or(FeedError::Closed)?;
        Ok(Subscription {
            id: Uuid::new_v4(),
            table,
            kinds: kinds.to_vec(),
            rx: tx.subscribe(),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Re-establish a subscription after a [`FeedError::Closed`], retrying
    /// under the bounded budget. On exhaustion the status watch flips to
    /// `Disconnected` so consumers can fall back to manual refresh instead
    /// of waiting forever.
    pub async fn resubscribe(
        &self,
        table: Table,
        kinds: &[EventKind],
    ) -> Result<Subscription, FeedError> {
        let mut delay = RECONNECT_BASE_DELAY;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.subscribe(table, kinds) {
                Ok(sub) => {
                    self.inner.status_tx.send_replace(FeedStatus::Live);
                    return Ok(sub);
                }
                Err(_) if attempt < RECONNECT_ATTEMPTS => {
                    self.inner.status_tx.send_replace(FeedStatus::Reconnecting);
                    tracing::debug!(
                        "feed resubscribe attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        RECONNECT_ATTEMPTS,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    self.inner.status_tx.send_replace(FeedStatus::Disconnected);
                    tracing::warn!("feed resubscribe budget exhausted");
                    return Err(e);
                }
            }
        }
        unreachable!("loop returns on the final attempt");
    }

    /// Watch the feed's liveness. Consumers surface `Disconnected` to the
    /// user as "live updates unavailable".
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Tear down the transport. Existing subscriptions observe
    /// [`FeedError::Closed`] once they drain.
    pub fn disconnect(&self) {
        *self.inner.bus.write().expect("feed bus lock poisoned") = None;
        self.inner.status_tx.send_replace(FeedStatus::Reconnecting);
    }

    /// Bring the transport back up. Subscriptions created before the outage
    /// stay closed; consumers resubscribe and re-fetch.
    pub fn reconnect(&self) {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        *self.inner.bus.write().expect("feed bus lock poisoned") = Some(bus);
        self.inner.status_tx.send_replace(FeedStatus::Live);
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new()
    }
}

/// A filtered, cancellable view of the feed. Events arrive in commit order
/// for this subscription; cancellation is idempotent and a cancelled handle
/// never yields another event.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    table: Table,
    kinds: Vec<EventKind>,
    rx: broadcast::Receiver<FeedEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// A handle that can cancel this subscription from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    fn matches(&self, event: &FeedEvent) -> bool {
        event.table == self.table && self.kinds.contains(&event.kind)
    }

    /// Await the next matching event.
    pub async fn recv(&mut self) -> Result<FeedEvent, FeedError> {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(FeedError::Cancelled);
            }
            match self.rx.recv().await {
                Ok(event) => {
                    // An event already in flight when cancel() ran is dropped
                    // here rather than delivered to a released handle.
                    if self.cancelled.load(Ordering::Acquire) {
                        return Err(FeedError::Cancelled);
                    }
                    if self.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(FeedError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }
}

#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Idempotent; calling it twice is the same as calling it once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_only_matching_events_in_order() {
        let feed = Feed::new();
        let mut sub = feed.subscribe(Table::Messages, &[EventKind::Insert]).unwrap();

        feed.publish(FeedEvent::insert(Table::Stickers, "s1"));
        feed.publish(FeedEvent::insert(Table::Messages, "1"));
        feed.publish(FeedEvent::delete(Table::Messages, "1"));
        feed.publish(FeedEvent::insert(Table::Messages, "2"));

        assert_eq!(sub.recv().await.unwrap().row_id, "1");
        assert_eq!(sub.recv().await.unwrap().row_id, "2");
    }

    #[tokio::test]
    async fn cancelled_subscription_yields_nothing_further() {
        let feed = Feed::new();
        let mut sub = feed.subscribe(Table::Messages, &[EventKind::Insert]).unwrap();
        let handle = sub.cancel_handle();

        feed.publish(FeedEvent::insert(Table::Messages, "1"));
        handle.cancel();
        handle.cancel(); // idempotent

        assert!(matches!(sub.recv().await, Err(FeedError::Cancelled)));
    }

    #[tokio::test]
    async fn disconnect_closes_existing_subscriptions() {
        let feed = Feed::new();
        let mut sub = feed.subscribe(Table::Users, &[EventKind::Delete]).unwrap();

        feed.disconnect();
        // Dropped silently, not queued for later.
        feed.publish(FeedEvent::delete(Table::Users, "u1"));

        assert!(matches!(sub.recv().await, Err(FeedError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_recovers_after_reconnect() {
        let feed = Feed::new();
        feed.disconnect();

        let resub = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.resubscribe(Table::Messages, &[EventKind::Insert]).await })
        };

        // Transport comes back while the budget still has attempts left.
        tokio::time::sleep(Duration::from_millis(300)).await;
        feed.reconnect();

        let mut sub = resub.await.unwrap().unwrap();
        feed.publish(FeedEvent::insert(Table::Messages, "7"));
        assert_eq!(sub.recv().await.unwrap().row_id, "7");
        assert_eq!(*feed.status().borrow(), FeedStatus::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_disconnected() {
        let feed = Feed::new();
        feed.disconnect();

        let err = feed
            .resubscribe(Table::Messages, &[EventKind::Insert])
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Closed));
        assert_eq!(*feed.status().borrow(), FeedStatus::Disconnected);
    }
}
