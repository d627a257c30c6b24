//! Ordered, failure-isolated publish/subscribe hub.
//!
//! A [`Hub`] fans every published item out to its subscribers in the order
//! they subscribed.  Items are wrapped in an [`Arc`] once and shared
//! read-only with every subscriber.
//!
//! # Delivery styles
//!
//! | Style | Registered with | Scheduling |
//! |---|---|---|
//! | Callback | [`Hub::subscribe`] | Synchronous call on the publishing task.  The hub only keeps a [`Weak`] reference; dropping the observer retires it. |
//! | Queue | [`Hub::subscribe_queue`] | Bounded `tokio::mpsc` channel.  `try_send` never blocks the publisher; when the queue is full the item is dropped for that subscriber only. |
//!
//! A callback that returns an error or panics is logged and skipped; the
//! remaining subscribers are still served.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use inolink_types::{InoError, LifecycleEvent, Reading};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default capacity of a queue subscription.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A same-thread subscriber.
///
/// Implemented for any `Fn(&Arc<T>) -> Result<(), InoError>` closure.
pub trait Observer<T>: Send + Sync {
    /// Handle one published item.  Returning an error does not affect other
    /// subscribers; the hub logs it and moves on.
    fn notify(&self, item: &Arc<T>) -> Result<(), InoError>;
}

impl<T, F> Observer<T> for F
where
    F: Fn(&Arc<T>) -> Result<(), InoError> + Send + Sync,
{
    fn notify(&self, item: &Arc<T>) -> Result<(), InoError> {
        self(item)
    }
}

/// Opaque token returned by the `subscribe*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

enum Delivery<T> {
    Callback(Weak<dyn Observer<T>>),
    Queue {
        sender: mpsc::Sender<Arc<T>>,
        dropped: Arc<AtomicU64>,
    },
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        match self {
            Delivery::Callback(weak) => Delivery::Callback(weak.clone()),
            Delivery::Queue { sender, dropped } => Delivery::Queue {
                sender: sender.clone(),
                dropped: Arc::clone(dropped),
            },
        }
    }
}

struct Subscription<T> {
    id: u64,
    delivery: Delivery<T>,
}

struct HubInner<T> {
    next_id: u64,
    subscriptions: Vec<Subscription<T>>,
}

// Outcome of delivering one item to one subscriber.
enum Outcome {
    Delivered,
    Failed,
    Dropped,
    Gone,
}

/// Publish/subscribe hub for items of type `T`.
///
/// Cloning is cheap; all clones share the same subscriber list.
pub struct Hub<T> {
    lane: &'static str,
    inner: Arc<Mutex<HubInner<T>>>,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            lane: self.lane,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Hub<T> {
    /// Create an empty hub.  `lane` names the hub in log records.
    pub fn new(lane: &'static str) -> Self {
        Self {
            lane,
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                subscriptions: Vec::new(),
            })),
        }
    }

    /// Register a callback observer.
    ///
    /// The hub keeps only a weak reference: the caller owns `observer`, and
    /// once the last `Arc` is dropped the subscription is pruned on the next
    /// publish.
    pub fn subscribe<O>(&self, observer: &Arc<O>) -> SubscriptionHandle
    where
        O: Observer<T> + 'static,
    {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn Observer<T>> = weak;
        self.insert(Delivery::Callback(weak))
    }

    /// Register a queue subscriber with room for `capacity` undelivered items
    /// (at least one).
    pub fn subscribe_queue(&self, capacity: usize) -> (SubscriptionHandle, QueueReceiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = self.insert(Delivery::Queue {
            sender,
            dropped: Arc::clone(&dropped),
        });
        (handle, QueueReceiver { receiver, dropped })
    }

    /// Remove a subscription.  Returns `false` if the handle was not (or no
    /// longer) registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != handle.0);
        before != inner.subscriptions.len()
    }

    /// Number of registered subscriptions, including ones whose observer has
    /// been dropped but not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Deliver `item` to every subscriber in subscription order.
    ///
    /// Returns how many subscribers accepted the item.  Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, item: T) -> usize {
        let item = Arc::new(item);
        // Deliver from a snapshot so observers may (un)subscribe re-entrantly.
        let snapshot: Vec<(u64, Delivery<T>)> = self
            .lock()
            .subscriptions
            .iter()
            .map(|s| (s.id, s.delivery.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, delivery) in snapshot {
            match self.deliver(id, &delivery, &item) {
                Outcome::Delivered => delivered += 1,
                Outcome::Failed | Outcome::Dropped => {}
                Outcome::Gone => gone.push(id),
            }
        }

        if !gone.is_empty() {
            debug!(lane = self.lane, pruned = gone.len(), "pruning retired subscriptions");
            self.lock().subscriptions.retain(|s| !gone.contains(&s.id));
        }
        delivered
    }

    fn deliver(&self, id: u64, delivery: &Delivery<T>, item: &Arc<T>) -> Outcome {
        match delivery {
            Delivery::Callback(weak) => {
                let Some(observer) = weak.upgrade() else {
                    return Outcome::Gone;
                };
                match catch_unwind(AssertUnwindSafe(|| observer.notify(item))) {
                    Ok(Ok(())) => Outcome::Delivered,
                    Ok(Err(e)) => {
                        warn!(lane = self.lane, subscription = id, error = %e, "subscriber failed; continuing");
                        Outcome::Failed
                    }
                    Err(_) => {
                        warn!(lane = self.lane, subscription = id, "subscriber panicked; continuing");
                        Outcome::Failed
                    }
                }
            }
            Delivery::Queue { sender, dropped } => match sender.try_send(Arc::clone(item)) {
                Ok(()) => Outcome::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(lane = self.lane, subscription = id, dropped = total, "queue full; item dropped for this subscriber");
                    Outcome::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Outcome::Gone,
            },
        }
    }

    fn insert(&self, delivery: Delivery<T>) -> SubscriptionHandle {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.push(Subscription { id, delivery });
        SubscriptionHandle(id)
    }

    fn lock(&self) -> MutexGuard<'_, HubInner<T>> {
        // Observers never run under this lock, so a poisoned guard still
        // holds a consistent list.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving side of a queue subscription.
///
/// Dropping it retires the subscription on the next publish.
pub struct QueueReceiver<T> {
    receiver: mpsc::Receiver<Arc<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item.  Returns `None` once every hub clone is gone
    /// or the subscription was removed.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }

    /// Take an already-queued item without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        self.receiver.try_recv().ok()
    }

    /// Items discarded because this queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// The two lanes the poller publishes on.
#[derive(Clone)]
pub struct EventBus {
    pub readings: Hub<Reading>,
    pub lifecycle: Hub<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            readings: Hub::new("readings"),
            lifecycle: Hub::new("lifecycle"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Collector {
        seen: StdMutex<Vec<u32>>,
    }

    impl Observer<u32> for Collector {
        fn notify(&self, item: &Arc<u32>) -> Result<(), InoError> {
            self.seen.lock().unwrap().push(**item);
            Ok(())
        }
    }

    impl Collector {
        fn seen(&self) -> Vec<u32> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let hub: Hub<u32> = Hub::new("test");
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut observers = Vec::new();
        for tag in 0..3 {
            let order = Arc::clone(&order);
            let obs = Arc::new(move |_: &Arc<u32>| -> Result<(), InoError> {
                order.lock().unwrap().push(tag);
                Ok(())
            });
            hub.subscribe(&obs);
            observers.push(obs);
        }

        assert_eq!(hub.publish(7), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_subscriber_is_isolated() {
        let hub: Hub<u32> = Hub::new("test");
        let first = Arc::new(Collector::default());
        let failing = Arc::new(|_: &Arc<u32>| -> Result<(), InoError> {
            Err(InoError::Channel("renderer exploded".to_string()))
        });
        let third = Arc::new(Collector::default());

        hub.subscribe(&first);
        hub.subscribe(&failing);
        hub.subscribe(&third);

        assert_eq!(hub.publish(1), 2);
        assert_eq!(first.seen(), vec![1]);
        assert_eq!(third.seen(), vec![1]);
        // A failure is not a retirement.
        assert_eq!(hub.subscriber_count(), 3);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let hub: Hub<u32> = Hub::new("test");
        let panicking = Arc::new(|_: &Arc<u32>| -> Result<(), InoError> {
            panic!("subscriber bug");
        });
        let after = Arc::new(Collector::default());

        hub.subscribe(&panicking);
        hub.subscribe(&after);

        assert_eq!(hub.publish(5), 1);
        assert_eq!(after.seen(), vec![5]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub: Hub<u32> = Hub::new("test");
        let obs = Arc::new(Collector::default());
        let handle = hub.subscribe(&obs);

        hub.publish(1);
        assert!(hub.unsubscribe(handle));
        assert!(!hub.unsubscribe(handle));
        hub.publish(2);

        assert_eq!(obs.seen(), vec![1]);
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let hub: Hub<u32> = Hub::new("test");
        let kept = Arc::new(Collector::default());
        let dropped = Arc::new(Collector::default());
        hub.subscribe(&kept);
        hub.subscribe(&dropped);
        drop(dropped);

        assert_eq!(hub.publish(9), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.seen(), vec![9]);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub: Hub<u32> = Hub::new("test");
        assert_eq!(hub.publish(1), 0);
    }

    #[test]
    fn observer_may_unsubscribe_itself() {
        let hub: Hub<u32> = Hub::new("test");
        let slot: Arc<StdMutex<Option<SubscriptionHandle>>> = Arc::new(StdMutex::new(None));
        let hub_ref = hub.clone();
        let slot_ref = Arc::clone(&slot);
        let once = Arc::new(move |_: &Arc<u32>| -> Result<(), InoError> {
            if let Some(h) = slot_ref.lock().unwrap().take() {
                hub_ref.unsubscribe(h);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(hub.subscribe(&once));

        assert_eq!(hub.publish(1), 1);
        assert_eq!(hub.publish(2), 0);
    }

    #[tokio::test]
    async fn queue_subscriber_receives_items() {
        let hub: Hub<u32> = Hub::new("test");
        let (_handle, mut rx) = hub.subscribe_queue(4);

        hub.publish(10);
        hub.publish(11);

        assert_eq!(*rx.recv().await.unwrap(), 10);
        assert_eq!(*rx.recv().await.unwrap(), 11);
        assert_eq!(rx.dropped(), 0);
    }

    #[test]
    fn full_queue_drops_without_blocking_others() {
        let hub: Hub<u32> = Hub::new("test");
        let (_handle, mut slow) = hub.subscribe_queue(2);
        let fast = Arc::new(Collector::default());
        hub.subscribe(&fast);

        for i in 0..5 {
            hub.publish(i);
        }

        assert_eq!(fast.seen(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slow.dropped(), 3);
        assert_eq!(slow.try_recv().map(|v| *v), Some(0));
        assert_eq!(slow.try_recv().map(|v| *v), Some(1));
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn closed_queue_is_pruned() {
        let hub: Hub<u32> = Hub::new("test");
        let (_handle, rx) = hub.subscribe_queue(1);
        drop(rx);
        assert_eq!(hub.publish(1), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn event_bus_lanes_are_independent() {
        use inolink_types::{Quantity, Unit, Value};

        let bus = EventBus::default();
        let (_h, mut lifecycle) = bus.lifecycle.subscribe_queue(4);
        let (_h2, mut readings) = bus.readings.subscribe_queue(4);

        bus.readings.publish(Reading {
            session: uuid::Uuid::new_v4(),
            feature: "temperature".to_string(),
            value: Value::Quantity(Quantity::new(20.0, Unit::DegC)),
            elapsed: std::time::Duration::from_secs(1),
            captured_at: chrono::Utc::now(),
        });

        assert!(readings.try_recv().is_some());
        assert!(lifecycle.try_recv().is_none());
    }
}
