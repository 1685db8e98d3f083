//! Commit Pipeline Module
//!
//! State shared by the facade, the expiration engine and property watches, plus
//! the store-then-bus commit pipeline they all go through.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{ChangeBus, ChangeRecord, ChangeType};
use crate::cache::{CacheEntry, Committed, EntryStore, EntryWatch, ExpirationSpec};
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::watch::{PropertyId, PropertySink, Watchable};

/// Bounds every cache key satisfies.
pub trait CacheKey: Eq + Hash + Clone + Debug + Watchable + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Watchable + Send + Sync + 'static {}

/// Bounds every cache value satisfies.
pub trait CacheValue: Clone + Watchable + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Watchable + Send + Sync + 'static {}

// == Cache Core ==
pub(crate) struct CacheCore<K, V> {
    /// The only shared mutable state. Held for store mutation and record
    /// staging, never across delivery, factories, predicates or guard drops.
    pub(crate) store: Mutex<EntryStore<K, V>>,
    pub(crate) bus: ChangeBus<K, V>,
    pub(crate) clock: Arc<dyn Clock>,
    next_watch_token: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> CacheCore<K, V> {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(EntryStore::new()),
            bus: ChangeBus::new(),
            clock,
            next_watch_token: AtomicU64::new(1),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // == Watches ==
    /// Probes the key and value for property notifications.
    ///
    /// Runs outside the store lock: `watch` is user code.
    pub(crate) fn watch_entry(self: &Arc<Self>, key: &K, value: &V) -> EntryWatch {
        let token = self.next_watch_token.fetch_add(1, Ordering::Relaxed);
        let mut guards = Vec::new();
        if let Some(guard) = key.watch(self.property_sink(key, token, ChangeType::KeyChanged)) {
            guards.push(guard);
        }
        if let Some(guard) = value.watch(self.property_sink(key, token, ChangeType::ValueChanged)) {
            guards.push(guard);
        }
        EntryWatch::new(token, guards)
    }

    fn property_sink(self: &Arc<Self>, key: &K, token: u64, change_type: ChangeType) -> PropertySink {
        let core = Arc::downgrade(self);
        let key = key.clone();
        PropertySink::new(move |property| {
            if let Some(core) = core.upgrade() {
                core.property_changed(&key, token, change_type, property);
            }
        })
    }

    fn property_changed(&self, key: &K, token: u64, change_type: ChangeType, property: PropertyId) {
        let staged = {
            let mut store = self.store.lock();
            store.touch(key, token).map(|entry| {
                self.bus.stage(ChangeRecord::property_changed(
                    change_type,
                    entry.key,
                    entry.value,
                    property,
                    entry.version,
                ))
            })
        };

        match staged {
            Some(record) => {
                debug!(key = ?key, property = ?record.changed_property, "Property change forwarded");
                self.bus.flush();
            }
            None => debug!(key = ?key, token, "Stale property notification ignored"),
        }
    }

    // == Commit Pipeline ==
    /// Inserts a new entry. A given expiration is attached under the same lock,
    /// so the entry is never visible without it.
    pub(crate) fn add(
        self: &Arc<Self>,
        key: K,
        value: V,
        expiration: Option<ExpirationSpec<K, V>>,
    ) -> Result<ChangeRecord<K, V>> {
        let watch = self.watch_entry(&key, &value);
        let (record, displaced) = {
            let mut store = self.store.lock();
            let committed = store.insert(key.clone(), value)?;
            let mut current = current_of(committed)?;
            if expiration.is_some() {
                let now = self.now_ms();
                current = store.set_expiration(&key, expiration, now)?;
            }
            let displaced = store.attach_watch(&key, watch);
            let record = self
                .bus
                .stage(ChangeRecord::added(key, current.value, current.version));
            (record, displaced)
        };
        drop(displaced);

        debug!(key = ?record.key, version = record.version, "Entry added");
        self.bus.flush();
        Ok(record)
    }

    /// Replaces the value of an existing entry.
    pub(crate) fn set_value(self: &Arc<Self>, key: K, value: V) -> Result<ChangeRecord<K, V>> {
        let watch = self.watch_entry(&key, &value);
        let (record, released) = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            let committed = store.update(&key, value, now)?;
            let (record, mut released) = self.stage_replacement(key.clone(), committed)?;
            released.extend(store.attach_watch(&key, watch));
            (record, released)
        };
        drop(released);

        debug!(key = ?record.key, version = record.version, "Entry value replaced");
        self.bus.flush();
        Ok(record)
    }

    /// Inserts or replaces.
    pub(crate) fn put(self: &Arc<Self>, key: K, value: V) -> Result<ChangeRecord<K, V>> {
        let watch = self.watch_entry(&key, &value);
        let (record, released) = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            let committed = store.upsert(key.clone(), value, now);
            let (record, mut released) = if committed.previous.is_some() {
                self.stage_replacement(key.clone(), committed)?
            } else {
                let current = current_of(committed)?;
                let record = self
                    .bus
                    .stage(ChangeRecord::added(key.clone(), current.value, current.version));
                (record, Vec::new())
            };
            released.extend(store.attach_watch(&key, watch));
            (record, released)
        };
        drop(released);

        debug!(key = ?record.key, change = ?record.change_type, "Entry stored");
        self.bus.flush();
        Ok(record)
    }

    /// Removes an entry.
    pub(crate) fn remove(&self, key: &K) -> Result<ChangeRecord<K, V>> {
        let (record, released) = {
            let mut store = self.store.lock();
            let committed = store
                .remove(key)
                .ok_or_else(|| CacheError::key_not_found(key))?;
            let previous = previous_of(committed.previous)?;
            let record = self.bus.stage(ChangeRecord::removed(
                key.clone(),
                previous.value,
                previous.version,
            ));
            (record, committed.released)
        };
        drop(released);

        debug!(key = ?key, "Entry removed");
        self.bus.flush();
        Ok(record)
    }

    /// Empties the cache and emits a single `Reset`.
    pub(crate) fn clear(&self) -> ChangeRecord<K, V> {
        let (record, released, count) = {
            let mut store = self.store.lock();
            let count = store.len();
            let released = store.clear();
            (self.bus.stage(ChangeRecord::reset()), released, count)
        };
        drop(released);

        debug!(cleared = count, "Cache reset");
        self.bus.flush();
        record
    }

    /// Swaps the whole contents for `items` and emits a single `Reset`.
    ///
    /// Later duplicates of a key win.
    pub(crate) fn reset_with(self: &Arc<Self>, items: Vec<(K, V)>) -> ChangeRecord<K, V> {
        let watched: Vec<(K, V, EntryWatch)> = items
            .into_iter()
            .map(|(key, value)| {
                let watch = self.watch_entry(&key, &value);
                (key, value, watch)
            })
            .collect();

        let (record, released) = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            let mut released = store.clear();
            for (key, value, watch) in watched {
                let committed = store.upsert(key.clone(), value, now);
                released.extend(committed.released);
                released.extend(store.attach_watch(&key, watch));
            }
            (self.bus.stage(ChangeRecord::reset()), released)
        };
        drop(released);

        debug!("Cache contents replaced");
        self.bus.flush();
        record
    }

    /// Stages `ValueReplaced` for a committed value swap. Store lock held.
    fn stage_replacement(
        &self,
        key: K,
        committed: Committed<K, V>,
    ) -> Result<(ChangeRecord<K, V>, Vec<EntryWatch>)> {
        let Committed {
            previous,
            current,
            released,
        } = committed;
        let previous = previous_of(previous)?;
        let current = current.ok_or_else(|| CacheError::Internal("replacement left no entry".into()))?;
        let record = self.bus.stage(ChangeRecord::replaced(
            key,
            previous.value,
            current.value,
            current.version,
        ));
        Ok((record, released))
    }
}

pub(crate) fn current_of<K, V>(committed: Committed<K, V>) -> Result<CacheEntry<K, V>> {
    committed
        .current
        .ok_or_else(|| CacheError::Internal("commit left no entry".into()))
}

pub(crate) fn previous_of<K, V>(previous: Option<CacheEntry<K, V>>) -> Result<CacheEntry<K, V>> {
    previous.ok_or_else(|| CacheError::Internal("commit had no previous entry".into()))
}
