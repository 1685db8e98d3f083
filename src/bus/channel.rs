//! Change Bus Module
//!
//! Ordered multicast of change records.
//!
//! Producers stage records while they still hold the store lock, so sequence
//! order is commit order. Delivery happens later, outside that lock: whichever
//! caller wins the delivery gate drains the queue in order for everyone, and
//! callers that lose simply leave their records for it. Subscriber lists are
//! copy-on-write, so subscribing never blocks delivery.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{ChangeEvent, ChangeRecord, Observer, SubscriptionHandle};
use crate::error::CacheError;

// == Subscriber Slot ==
struct Subscriber<K, V> {
    id: u64,
    /// First sequence number this subscriber may see
    from_sequence: u64,
    active: Arc<AtomicBool>,
    observer: Arc<dyn Observer<K, V>>,
}

impl<K, V> Subscriber<K, V> {
    fn accepts(&self, sequence: u64) -> bool {
        sequence >= self.from_sequence && self.active.load(Ordering::SeqCst)
    }
}

struct Queue<K, V> {
    next_sequence: u64,
    pending: VecDeque<ChangeEvent<K, V>>,
}

// == Change Bus ==
pub struct ChangeBus<K, V> {
    queue: Mutex<Queue<K, V>>,
    subscribers: Mutex<Arc<Vec<Arc<Subscriber<K, V>>>>>,
    /// Held by the single thread currently draining `queue`
    delivering: Mutex<()>,
    next_subscriber_id: AtomicU64,
}

impl<K, V> Default for ChangeBus<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ChangeBus<K, V> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                next_sequence: 1,
                pending: VecDeque::new(),
            }),
            subscribers: Mutex::new(Arc::new(Vec::new())),
            delivering: Mutex::new(()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    // == Subscribe ==
    /// Adds an observer. It receives every record staged after this call.
    pub fn subscribe(&self, observer: Arc<dyn Observer<K, V>>) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        // The queue lock pins the sequence counter while the subscriber is published.
        let queue = self.queue.lock();
        let subscriber = Arc::new(Subscriber {
            id,
            from_sequence: queue.next_sequence,
            active: active.clone(),
            observer,
        });

        let mut subscribers = self.subscribers.lock();
        let mut next: Vec<_> = subscribers
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .cloned()
            .collect();
        next.push(subscriber);
        *subscribers = Arc::new(next);
        drop(subscribers);
        drop(queue);

        debug!(subscriber = id, "Observer subscribed");
        SubscriptionHandle::new(id, active)
    }

    // == Unsubscribe ==
    /// Disposes the handle and drops it from the subscriber list.
    ///
    /// Returns false if the handle was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.dispose();

        let mut subscribers = self.subscribers.lock();
        let found = subscribers.iter().any(|s| s.id == handle.id());
        let next: Vec<_> = subscribers
            .iter()
            .filter(|s| s.id != handle.id() && s.active.load(Ordering::SeqCst))
            .cloned()
            .collect();
        *subscribers = Arc::new(next);

        if found {
            debug!(subscriber = handle.id(), "Observer unsubscribed");
        }
        found
    }

    /// Number of subscribers that are still active.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    // == Stage ==
    /// Assigns the next sequence number and queues the record.
    ///
    /// Callers hold the store lock so that staging order matches commit order.
    /// Returns the record as it will be delivered.
    pub fn stage(&self, mut record: ChangeRecord<K, V>) -> ChangeRecord<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let mut queue = self.queue.lock();
        record.sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.pending.push_back(ChangeEvent::Change(record.clone()));
        record
    }

    /// Queues a failure for the observers' error channel.
    pub fn stage_failure(&self, error: CacheError) {
        let mut queue = self.queue.lock();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.pending.push_back(ChangeEvent::Failure { sequence, error });
    }

    /// Sequence number the next staged item will get.
    pub fn next_sequence(&self) -> u64 {
        self.queue.lock().next_sequence
    }

    // == Flush ==
    /// Delivers everything staged so far, unless another caller is already doing it.
    ///
    /// Never call this while holding the store lock.
    pub fn flush(&self) {
        loop {
            let Some(gate) = self.delivering.try_lock() else {
                return;
            };
            while let Some(item) = self.pop() {
                self.deliver(&item);
            }
            drop(gate);

            // A producer may have staged after our last pop but before the gate opened.
            if self.queue.lock().pending.is_empty() {
                return;
            }
        }
    }

    fn pop(&self) -> Option<ChangeEvent<K, V>> {
        self.queue.lock().pending.pop_front()
    }

    fn deliver(&self, item: &ChangeEvent<K, V>) {
        let sequence = item.sequence();
        let subscribers = self.subscribers.lock().clone();

        for subscriber in subscribers.iter() {
            if !subscriber.accepts(sequence) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.observer.on_event(item)));
            if outcome.is_err() {
                warn!(
                    subscriber = subscriber.id,
                    sequence, "Observer panicked; continuing delivery"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChangeType;

    type Seen = Arc<Mutex<Vec<ChangeRecord<&'static str, i32>>>>;

    fn recorder() -> (Arc<dyn Observer<&'static str, i32>>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let observer = move |record: &ChangeRecord<&'static str, i32>| {
            seen_clone.lock().push(record.clone());
        };
        (Arc::new(observer), seen)
    }

    fn publish(bus: &ChangeBus<&'static str, i32>, key: &'static str, value: i32) {
        bus.stage(ChangeRecord::added(key, value, 1));
        bus.flush();
    }

    #[test]
    fn test_sequences_increase_in_stage_order() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let (observer, seen) = recorder();
        bus.subscribe(observer);

        publish(&bus, "a", 1);
        publish(&bus, "b", 2);

        let sequences: Vec<u64> = seen.lock().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_fan_out_is_identical_per_subscriber() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        bus.subscribe(first);
        bus.subscribe(second);

        for i in 0..10 {
            publish(&bus, "k", i);
        }

        assert_eq!(first_seen.lock().len(), 10);
        assert_eq!(*first_seen.lock(), *second_seen.lock());
    }

    #[test]
    fn test_late_subscriber_skips_staged_records() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        bus.stage(ChangeRecord::added("a", 1, 1));

        let (observer, seen) = recorder();
        bus.subscribe(observer);
        bus.flush();
        assert!(seen.lock().is_empty());

        publish(&bus, "b", 2);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].key, Some("b"));
    }

    #[test]
    fn test_disposed_handle_stops_delivery() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let (observer, seen) = recorder();
        let handle = bus.subscribe(observer);

        publish(&bus, "a", 1);
        handle.dispose();
        publish(&bus, "b", 2);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_by_handle_identity() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let (observer, seen) = recorder();
        // Same observer registered twice is two subscriptions.
        let first = bus.subscribe(observer.clone());
        let _second = bus.subscribe(observer);

        assert!(bus.unsubscribe(&first));
        assert!(!bus.unsubscribe(&first));
        publish(&bus, "a", 1);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let panicker = |_: &ChangeRecord<&'static str, i32>| panic!("observer bug");
        bus.subscribe(Arc::new(panicker));
        let (observer, seen) = recorder();
        bus.subscribe(observer);

        publish(&bus, "a", 1);
        publish(&bus, "b", 2);

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_failures_reach_error_channel() {
        struct Errors(Mutex<Vec<CacheError>>);
        impl Observer<&'static str, i32> for Errors {
            fn on_change(&self, _: &ChangeRecord<&'static str, i32>) {}
            fn on_error(&self, error: &CacheError) {
                self.0.lock().push(error.clone());
            }
        }

        let bus: ChangeBus<&'static str, i32> = ChangeBus::new();
        let errors = Arc::new(Errors(Mutex::new(Vec::new())));
        bus.subscribe(errors.clone());

        bus.stage_failure(CacheError::Internal("boom".into()));
        bus.flush();

        assert_eq!(errors.0.lock().len(), 1);
    }

    #[test]
    fn test_reentrant_stage_is_delivered_after_current() {
        let bus = Arc::new(ChangeBus::<&'static str, i32>::new());
        let (observer, seen) = recorder();

        let bus_clone = bus.clone();
        let reentrant = move |record: &ChangeRecord<&'static str, i32>| {
            if record.change_type == ChangeType::Added {
                bus_clone.stage(ChangeRecord::removed("a", 1, 2));
                bus_clone.flush();
            }
        };
        bus.subscribe(Arc::new(reentrant));
        bus.subscribe(observer);

        publish(&bus, "a", 1);

        let kinds: Vec<ChangeType> = seen.lock().iter().map(|r| r.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Added, ChangeType::Removed]);
    }
}
