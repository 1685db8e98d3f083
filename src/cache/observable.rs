//! Observable Cache Module
//!
//! Public facade: mutate, read and subscribe.
//!
//! Per key the state machine is `Absent → Present → (Present | Absent)`.
//! `Expired` is informational and does not change state by itself.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::{ChangeEvent, ChangeRecord, ChannelObserver, Observer, SubscriptionHandle};
use crate::cache::pipeline::{CacheCore, CacheKey, CacheValue};
use crate::cache::{CacheEntry, CacheStats, ExpirationSpec, Resolution};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};

// == Operation ==
/// Mutation accepted by [`ObservableCache::mutate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<V> {
    /// Insert a new key; fails with `DuplicateKey` if present
    Add(V),
    /// Replace the value of a present key; fails with `KeyNotFound` if absent
    SetValue(V),
    /// Remove a present key; fails with `KeyNotFound` if absent
    Remove,
}

// == Observable Cache ==
/// In-memory key/value cache that broadcasts every change in commit order.
///
/// Cheap to clone; clones share the same store and subscribers.
pub struct ObservableCache<K, V> {
    core: Arc<CacheCore<K, V>>,
}

impl<K, V> Clone for ObservableCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for ObservableCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> ObservableCache<K, V> {
    // == Constructor ==
    /// Creates an empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty cache on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            core: Arc::new(CacheCore::new(clock)),
        }
    }

    // == Subscriptions ==
    /// Registers an observer for every record committed after this call.
    pub fn subscribe(&self, observer: impl Observer<K, V> + 'static) -> SubscriptionHandle {
        self.core.bus.subscribe(Arc::new(observer))
    }

    /// Like [`subscribe`](Self::subscribe) for an observer you keep a handle to.
    pub fn subscribe_shared(&self, observer: Arc<dyn Observer<K, V>>) -> SubscriptionHandle {
        self.core.bus.subscribe(observer)
    }

    /// Subscribes an unbounded channel. Records and factory failures arrive in
    /// sequence order.
    pub fn subscribe_channel(
        &self,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ChangeEvent<K, V>>) {
        let (observer, rx) = ChannelObserver::new();
        (self.subscribe(observer), rx)
    }

    /// Ends a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.core.bus.unsubscribe(handle)
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.bus.subscriber_count()
    }

    // == Mutations ==
    /// Applies `operation` to `key` and returns the record it produced.
    pub fn mutate(&self, key: K, operation: Operation<V>) -> Result<ChangeRecord<K, V>> {
        match operation {
            Operation::Add(value) => self.add(key, value),
            Operation::SetValue(value) => self.set_value(key, value),
            Operation::Remove => self.remove(&key),
        }
    }

    pub fn add(&self, key: K, value: V) -> Result<ChangeRecord<K, V>> {
        self.core.add(key, value, None)
    }

    /// Adds a key with its expiration already armed when `Added` is published.
    pub fn add_with_expiration(
        &self,
        key: K,
        value: V,
        spec: ExpirationSpec<K, V>,
    ) -> Result<ChangeRecord<K, V>> {
        self.core.add(key, value, Some(spec))
    }

    /// Replaces a present value and restarts its expiration deadline.
    pub fn set_value(&self, key: K, value: V) -> Result<ChangeRecord<K, V>> {
        self.core.set_value(key, value)
    }

    /// Adds or replaces, emitting `Added` or `ValueReplaced`.
    pub fn put(&self, key: K, value: V) -> Result<ChangeRecord<K, V>> {
        self.core.put(key, value)
    }

    pub fn remove(&self, key: &K) -> Result<ChangeRecord<K, V>> {
        self.core.remove(key)
    }

    /// Removes everything, emitting one `Reset` instead of per-key removals.
    pub fn clear(&self) -> ChangeRecord<K, V> {
        self.core.clear()
    }

    /// Replaces the whole contents, emitting one `Reset`.
    pub fn reset_with(&self, items: impl IntoIterator<Item = (K, V)>) -> ChangeRecord<K, V> {
        self.core.reset_with(items.into_iter().collect())
    }

    // == Expiration ==
    /// Attaches or replaces the expiration policy of a present entry.
    ///
    /// The deadline is armed from now. No change record is emitted.
    pub fn set_expiration(&self, key: &K, spec: ExpirationSpec<K, V>) -> Result<()> {
        let now = self.core.now_ms();
        self.core.store.lock().set_expiration(key, Some(spec), now)?;
        Ok(())
    }

    pub fn clear_expiration(&self, key: &K) -> Result<()> {
        let now = self.core.now_ms();
        self.core.store.lock().set_expiration(key, None, now)?;
        Ok(())
    }

    /// Evaluates the expiration of one key right now.
    pub fn expire(&self, key: &K) -> Resolution {
        let snapshot = self.core.store.lock().get(key);
        match snapshot {
            Some(entry) => self.core.resolve(entry),
            None => Resolution::NotDue,
        }
    }

    /// Resolves every due expiration. Returns how many were resolved.
    pub fn expire_due(&self) -> usize {
        self.core.expire_due()
    }

    // == Reads ==
    /// Returns the current value, resolving a due expiration first.
    ///
    /// A successful read renews a sliding deadline.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key, true).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get) but returns the whole entry snapshot.
    pub fn get_entry(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.lookup(key, true)
    }

    /// Presence check; also resolves a due expiration, but is not counted as a read.
    pub fn contains_key(&self, key: &K) -> bool {
        self.lookup(key, false).is_some()
    }

    fn lookup(&self, key: &K, count: bool) -> Option<CacheEntry<K, V>> {
        let pending = {
            let mut store = self.core.store.lock();
            let now = self.core.now_ms();
            match store.get(key) {
                None => {
                    if count {
                        store.stats_mut().record_miss();
                    }
                    return None;
                }
                Some(entry) if entry.is_due(now) || entry.has_predicate() => entry,
                Some(mut entry) => {
                    if store.renew(key, entry.version, now) {
                        entry.rearm(now);
                    }
                    if count {
                        store.stats_mut().record_hit();
                    }
                    return Some(entry);
                }
            }
        };

        // Due (or predicate-guarded): resolve with the lock released, then re-read.
        self.core.resolve(pending);

        let mut store = self.core.store.lock();
        let current = store.get(key);
        if count {
            match current {
                Some(_) => store.stats_mut().record_hit(),
                None => store.stats_mut().record_miss(),
            }
        }
        current
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.core.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.store.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.core.store.lock().keys()
    }

    /// Snapshot of every entry; does not evaluate expirations.
    pub fn snapshot(&self) -> Vec<CacheEntry<K, V>> {
        self.core.store.lock().snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        self.core.store.lock().stats()
    }

    /// Current time on the cache's clock, in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.core.now_ms()
    }

    /// Sequence number the next change record will carry.
    pub fn next_sequence(&self) -> u64 {
        self.core.bus.next_sequence()
    }

    /// Fails with `KeyNotFound` unless `key` is present (no expiration check).
    pub fn require(&self, key: &K) -> Result<()> {
        if self.core.store.lock().contains_key(key) {
            Ok(())
        } else {
            Err(CacheError::key_not_found(key))
        }
    }
}
