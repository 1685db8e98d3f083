//! Entry Store Module
//!
//! Key → entry mapping with optimistic versioning.
//!
//! The store itself is not synchronized; the cache keeps it behind one mutex and
//! every method here runs with that lock held. Nothing in this module calls user
//! code: watch guards that must be released are handed back to the caller so
//! they can be dropped after the lock.

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

use crate::cache::{CacheEntry, CacheStats, ExpirationSpec};
use crate::error::{CacheError, Result};
use crate::watch::WatchGuard;

// == Version Conflict ==
/// The entry moved on (or vanished) since the caller read `expected`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("version conflict: expected {expected}, found {actual:?}")]
pub struct VersionConflict {
    pub expected: u64,
    pub actual: Option<u64>,
}

// == Update ==
/// Mutation applied by [`EntryStore::compare_and_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<V> {
    Remove,
    Replace(V),
}

// == Entry Watch ==
/// Property watches held on behalf of one committed entry.
///
/// `token` identifies the watch generation; notifications carrying an older
/// token are ignored.
#[derive(Debug)]
pub struct EntryWatch {
    pub token: u64,
    guards: Vec<WatchGuard>,
}

impl EntryWatch {
    pub fn new(token: u64, guards: Vec<WatchGuard>) -> Self {
        Self { token, guards }
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }
}

// == Slot ==
#[derive(Debug)]
struct Slot<K, V> {
    entry: CacheEntry<K, V>,
    /// An expiration of the current version is being resolved
    claimed: bool,
    watch: Option<EntryWatch>,
}

impl<K, V> Slot<K, V> {
    fn new(entry: CacheEntry<K, V>) -> Self {
        Self {
            entry,
            claimed: false,
            watch: None,
        }
    }
}

// == Committed ==
/// Outcome of a successful mutation.
#[derive(Debug)]
pub struct Committed<K, V> {
    /// Entry as it was before the mutation
    pub previous: Option<CacheEntry<K, V>>,
    /// Entry as it is now; `None` after a removal
    pub current: Option<CacheEntry<K, V>>,
    /// Watches retired by the mutation; drop after releasing the store lock
    pub released: Vec<EntryWatch>,
}

// == Entry Store ==
#[derive(Debug)]
pub struct EntryStore<K, V> {
    entries: HashMap<K, Slot<K, V>>,
    /// Store-wide counter; a re-added key always gets a higher version than before
    next_version: u64,
    stats: CacheStats,
}

impl<K, V> Default for EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_version: 1,
            stats: CacheStats::new(),
        }
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    // == Get ==
    /// Returns a snapshot of the entry.
    pub fn get(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn entry(&self, key: &K) -> Option<&CacheEntry<K, V>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    // == Insert ==
    /// Adds a new entry; fails if the key is present.
    pub fn insert(&mut self, key: K, value: V) -> Result<Committed<K, V>>
    where
        K: std::fmt::Debug,
    {
        if self.entries.contains_key(&key) {
            return Err(CacheError::duplicate_key(&key));
        }
        let version = self.bump_version();
        let entry = CacheEntry::new(key.clone(), value, version);
        self.entries.insert(key, Slot::new(entry.clone()));
        self.stats.set_total_entries(self.entries.len());

        Ok(Committed {
            previous: None,
            current: Some(entry),
            released: Vec::new(),
        })
    }

    // == Update ==
    /// Replaces the value of an existing entry and re-arms its expiration.
    pub fn update(&mut self, key: &K, value: V, now_ms: u64) -> Result<Committed<K, V>>
    where
        K: std::fmt::Debug,
    {
        if !self.entries.contains_key(key) {
            return Err(CacheError::key_not_found(key));
        }
        Ok(self.replace_value(key, value, now_ms))
    }

    // == Upsert ==
    /// Inserts or replaces.
    pub fn upsert(&mut self, key: K, value: V, now_ms: u64) -> Committed<K, V> {
        if self.entries.contains_key(&key) {
            return self.replace_value(&key, value, now_ms);
        }
        let version = self.bump_version();
        let entry = CacheEntry::new(key.clone(), value, version);
        self.entries.insert(key, Slot::new(entry.clone()));
        self.stats.set_total_entries(self.entries.len());

        Committed {
            previous: None,
            current: Some(entry),
            released: Vec::new(),
        }
    }

    /// Caller guarantees the key is present.
    fn replace_value(&mut self, key: &K, value: V, now_ms: u64) -> Committed<K, V> {
        let version = self.bump_version();
        let Some(slot) = self.entries.get_mut(key) else {
            return Committed {
                previous: None,
                current: None,
                released: Vec::new(),
            };
        };
        let previous = slot.entry.clone();
        slot.entry.value = value;
        slot.entry.version = version;
        slot.entry.rearm(now_ms);
        slot.claimed = false;

        Committed {
            previous: Some(previous),
            current: Some(slot.entry.clone()),
            released: slot.watch.take().into_iter().collect(),
        }
    }

    // == Remove ==
    /// Removes an entry, returning what it was.
    pub fn remove(&mut self, key: &K) -> Option<Committed<K, V>> {
        let slot = self.entries.remove(key)?;
        self.stats.set_total_entries(self.entries.len());

        Some(Committed {
            previous: Some(slot.entry),
            current: None,
            released: slot.watch.into_iter().collect(),
        })
    }

    // == Compare And Update ==
    /// Applies `update` only if the entry is still at `expected_version`.
    ///
    /// The expiration engine's only way in: a conflict means an explicit
    /// mutation got there first.
    pub fn compare_and_update(
        &mut self,
        key: &K,
        expected_version: u64,
        update: Update<V>,
        now_ms: u64,
    ) -> std::result::Result<Committed<K, V>, VersionConflict> {
        let actual = self.entries.get(key).map(|slot| slot.entry.version);
        if actual != Some(expected_version) {
            return Err(VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        match update {
            Update::Remove => Ok(self
                .remove(key)
                .ok_or(VersionConflict {
                    expected: expected_version,
                    actual: None,
                })?),
            Update::Replace(value) => Ok(self.replace_value(key, value, now_ms)),
        }
    }

    // == Expiration Bookkeeping ==
    /// Attaches or clears a policy and arms it from `now_ms`.
    pub fn set_expiration(
        &mut self,
        key: &K,
        spec: Option<ExpirationSpec<K, V>>,
        now_ms: u64,
    ) -> Result<CacheEntry<K, V>>
    where
        K: std::fmt::Debug,
    {
        let slot = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::key_not_found(key))?;
        slot.entry.set_expiration(spec, now_ms);
        slot.claimed = false;
        Ok(slot.entry.clone())
    }

    /// Takes the right to resolve the expiration seen in `snapshot`.
    ///
    /// Returns `None` if the entry's value or policy moved on since the
    /// snapshot, or someone else already holds the claim.
    pub fn claim(&mut self, snapshot: &CacheEntry<K, V>) -> Option<CacheEntry<K, V>> {
        let slot = self.entries.get_mut(&snapshot.key)?;
        if slot.claimed
            || slot.entry.version != snapshot.version
            || slot.entry.policy_generation != snapshot.policy_generation
        {
            return None;
        }
        slot.claimed = true;
        Some(slot.entry.clone())
    }

    /// Gives up a claim and re-arms the policy, e.g. after a factory failure.
    pub fn release_claim(&mut self, key: &K, version: u64, now_ms: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(slot) if slot.entry.version == version => {
                slot.claimed = false;
                slot.entry.rearm(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Pushes a sliding deadline out, unless the entry is being expired.
    pub fn renew(&mut self, key: &K, version: u64, now_ms: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(slot)
                if slot.entry.version == version
                    && !slot.claimed
                    && slot.entry.expiration.as_ref().is_some_and(|s| s.is_sliding()) =>
            {
                slot.entry.rearm(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Snapshots unclaimed entries that are past their deadline or carry a predicate.
    pub fn expiration_candidates(&self, now_ms: u64) -> Vec<CacheEntry<K, V>> {
        self.entries
            .values()
            .filter(|slot| !slot.claimed && (slot.entry.is_due(now_ms) || slot.entry.has_predicate()))
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub fn is_claimed(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|slot| slot.claimed)
    }

    // == Watches ==
    /// Attaches a watch to the entry, returning whichever one it replaces.
    ///
    /// If the key is gone the watch comes straight back.
    pub fn attach_watch(&mut self, key: &K, watch: EntryWatch) -> Option<EntryWatch> {
        match self.entries.get_mut(key) {
            Some(slot) => slot.watch.replace(watch),
            None => Some(watch),
        }
    }

    /// Bumps the version of an entry whose watched key or value reported a change.
    /// Like any other version bump this voids a pending expiration claim.
    ///
    /// Ignored unless `token` is the entry's current watch generation.
    pub fn touch(&mut self, key: &K, token: u64) -> Option<CacheEntry<K, V>> {
        let matches = self
            .entries
            .get(key)
            .and_then(|slot| slot.watch.as_ref())
            .is_some_and(|watch| watch.token == token);
        if !matches {
            return None;
        }
        let version = self.bump_version();
        let slot = self.entries.get_mut(key)?;
        slot.entry.version = version;
        slot.claimed = false;
        Some(slot.entry.clone())
    }

    // == Clear ==
    /// Removes everything; version numbering carries on.
    pub fn clear(&mut self) -> Vec<EntryWatch> {
        let released = self
            .entries
            .drain()
            .filter_map(|(_, slot)| slot.watch)
            .collect();
        self.stats.set_total_entries(0);
        released
    }

    // == Introspection ==
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<CacheEntry<K, V>> {
        self.entries.values().map(|slot| slot.entry.clone()).collect()
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }
}
