//! Observer Module
//!
//! Observer capability and the handles returned by `subscribe`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::{ChangeEvent, ChangeRecord};
use crate::error::CacheError;

// == Observer ==
/// Receives change records in commit order.
///
/// Callbacks run outside the store lock and may call back into the cache.
/// A panicking callback is logged and skipped; it never affects other observers.
pub trait Observer<K, V>: Send + Sync {
    fn on_change(&self, record: &ChangeRecord<K, V>);

    /// Failures that are not change records, such as an expiration factory error.
    fn on_error(&self, error: &CacheError) {
        let _ = error;
    }

    /// Called by the bus for every delivered event; dispatches to the two
    /// methods above. Override to keep the sequence number of failures.
    fn on_event(&self, event: &ChangeEvent<K, V>) {
        match event {
            ChangeEvent::Change(record) => self.on_change(record),
            ChangeEvent::Failure { error, .. } => self.on_error(error),
        }
    }
}

impl<K, V, F> Observer<K, V> for F
where
    F: Fn(&ChangeRecord<K, V>) + Send + Sync,
{
    fn on_change(&self, record: &ChangeRecord<K, V>) {
        self(record)
    }
}

// == Channel Observer ==
/// Forwards records and failures into an unbounded tokio channel, for async
/// consumers.
pub(crate) struct ChannelObserver<K, V> {
    tx: mpsc::UnboundedSender<ChangeEvent<K, V>>,
}

impl<K, V> ChannelObserver<K, V> {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent<K, V>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<K, V> Observer<K, V> for ChannelObserver<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn on_change(&self, record: &ChangeRecord<K, V>) {
        self.on_event(&ChangeEvent::Change(record.clone()));
    }

    fn on_event(&self, event: &ChangeEvent<K, V>) {
        // A dropped receiver just stops listening.
        let _ = self.tx.send(event.clone());
    }
}

// == Subscription Handle ==
/// Identifies one subscription. Identity is the handle's id, never the observer.
///
/// Dropping a handle does not unsubscribe; call [`SubscriptionHandle::dispose`]
/// or `unsubscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: u64,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, active: Arc<AtomicBool>) -> Self {
        Self { id, active }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the subscription inert. Takes effect no later than the next record.
    pub fn dispose(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
