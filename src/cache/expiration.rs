//! Expiration Engine Module
//!
//! Decides whether an entry has expired and resolves it by removal or
//! replacement.
//!
//! Resolving an expiration of the entry at version `v` goes:
//! 1. claim `v` and stage `Expired` (one claim per version, so a second sweep
//!    or a racing read backs off),
//! 2. run the factory, if any, with no lock held,
//! 3. `compare_and_update(key, v, ..)`; a conflict means an explicit mutation
//!    won the race and the expiration is dropped without a record.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::ChangeRecord;
use crate::cache::pipeline::{previous_of, CacheCore, CacheKey, CacheValue};
use crate::cache::{CacheEntry, Committed, ExpirationAction, ExpirationPolicy, Update};
use crate::error::CacheError;

// == Resolution ==
/// What happened when an expiration was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No policy, deadline still ahead, or predicate false
    NotDue,
    /// Another resolver holds the claim for this version
    InProgress,
    /// A newer mutation got there first; nothing was done
    Superseded,
    Removed,
    Replaced,
    /// The factory failed; value kept and policy re-armed
    FactoryFailed,
}

impl Resolution {
    /// True when this call committed a `Removed` or `ValueReplaced`.
    pub fn is_resolved(self) -> bool {
        matches!(self, Resolution::Removed | Resolution::Replaced)
    }
}

enum ClaimOutcome<K, V> {
    Claimed(CacheEntry<K, V>),
    Refused(Resolution),
}

impl<K: CacheKey, V: CacheValue> CacheCore<K, V> {
    // == Sweep ==
    /// Evaluates every entry that is due or carries a predicate.
    ///
    /// Returns how many expirations were resolved by this pass.
    pub(crate) fn expire_due(self: &Arc<Self>) -> usize {
        let now = self.now_ms();
        let candidates = self.store.lock().expiration_candidates(now);
        if candidates.is_empty() {
            return 0;
        }

        let examined = candidates.len();
        let resolved = candidates
            .into_iter()
            .map(|snapshot| self.resolve(snapshot))
            .filter(|resolution| resolution.is_resolved())
            .count();

        debug!(examined, resolved, "Expiration sweep finished");
        resolved
    }

    // == Resolve ==
    /// Resolves the expiration of `snapshot`, taken at `snapshot.version`.
    pub(crate) fn resolve(self: &Arc<Self>, snapshot: CacheEntry<K, V>) -> Resolution {
        let Some(spec) = snapshot.expiration.as_ref() else {
            return Resolution::NotDue;
        };

        // Predicates are user code; evaluate them against the snapshot, unlocked.
        let predicate_hit = match &spec.policy {
            ExpirationPolicy::Predicate(predicate) => {
                if !predicate(&snapshot.key, &snapshot.value) {
                    return Resolution::NotDue;
                }
                true
            }
            _ => false,
        };

        let claimed = match self.claim(&snapshot, predicate_hit) {
            ClaimOutcome::Claimed(entry) => entry,
            ClaimOutcome::Refused(resolution) => return resolution,
        };

        // The claim pins the policy generation, so the claimed entry carries
        // the policy that was evaluated.
        let action = match claimed.expiration.as_ref() {
            Some(spec) => spec.action.clone(),
            None => return self.release_unarmed(claimed),
        };

        match action {
            ExpirationAction::Remove => self.resolve_remove(claimed),
            ExpirationAction::Replace(factory) => match factory(&claimed.key, &claimed.value) {
                Ok(value) => self.resolve_replace(claimed, value),
                Err(error) => self.resolve_failure(claimed, error),
            },
        }
    }

    /// Takes the claim and stages `Expired`.
    ///
    /// Refused as superseded when the value or the policy changed since the
    /// snapshot was taken.
    fn claim(&self, snapshot: &CacheEntry<K, V>, predicate_hit: bool) -> ClaimOutcome<K, V> {
        let key = &snapshot.key;
        let version = snapshot.version;

        let outcome = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            let refusal = match store.entry(key) {
                None => Some(Resolution::Superseded),
                Some(entry)
                    if entry.version != version
                        || entry.policy_generation != snapshot.policy_generation =>
                {
                    Some(Resolution::Superseded)
                }
                Some(entry) if predicate_hit && entry.has_predicate() => None,
                Some(entry) if !entry.is_due(now) => Some(Resolution::NotDue),
                Some(_) => None,
            };

            match refusal {
                Some(Resolution::Superseded) => {
                    store.stats_mut().record_superseded();
                    ClaimOutcome::Refused(Resolution::Superseded)
                }
                Some(resolution) => ClaimOutcome::Refused(resolution),
                None => match store.claim(snapshot) {
                    Some(entry) => {
                        store.stats_mut().record_expiration();
                        self.bus.stage(ChangeRecord::expired(
                            entry.key.clone(),
                            entry.value.clone(),
                            entry.version,
                        ));
                        ClaimOutcome::Claimed(entry)
                    }
                    None => ClaimOutcome::Refused(Resolution::InProgress),
                },
            }
        };

        match &outcome {
            ClaimOutcome::Claimed(_) => {
                debug!(key = ?key, version, "Entry expired");
                self.bus.flush();
            }
            ClaimOutcome::Refused(Resolution::Superseded) => {
                debug!(key = ?key, version, "Expiration superseded before claim");
            }
            ClaimOutcome::Refused(_) => {}
        }
        outcome
    }

    /// Drops a claim on an entry that no longer has a policy.
    fn release_unarmed(&self, claimed: CacheEntry<K, V>) -> Resolution {
        let now = self.now_ms();
        self.store
            .lock()
            .release_claim(&claimed.key, claimed.version, now);
        Resolution::Superseded
    }

    fn resolve_remove(&self, claimed: CacheEntry<K, V>) -> Resolution {
        let key = claimed.key;
        let version = claimed.version;

        let committed = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            match store.compare_and_update(&key, version, Update::Remove, now) {
                Ok(committed) => match previous_of(committed.previous) {
                    Ok(previous) => {
                        store.stats_mut().record_removal_by_expiry();
                        self.bus.stage(ChangeRecord::removed(
                            key.clone(),
                            previous.value,
                            previous.version,
                        ));
                        Ok(committed.released)
                    }
                    Err(error) => Err(error.to_string()),
                },
                Err(conflict) => {
                    store.stats_mut().record_superseded();
                    Err(conflict.to_string())
                }
            }
        };

        match committed {
            Ok(released) => {
                drop(released);
                debug!(key = ?key, version, "Expired entry removed");
                self.bus.flush();
                Resolution::Removed
            }
            Err(reason) => {
                debug!(key = ?key, version, %reason, "Expiration superseded");
                Resolution::Superseded
            }
        }
    }

    fn resolve_replace(self: &Arc<Self>, claimed: CacheEntry<K, V>, value: V) -> Resolution {
        let key = claimed.key;
        let version = claimed.version;
        let watch = self.watch_entry(&key, &value);

        let committed = {
            let mut store = self.store.lock();
            let now = self.now_ms();
            match store.compare_and_update(&key, version, Update::Replace(value), now) {
                Ok(Committed {
                    previous,
                    current: Some(current),
                    mut released,
                }) => match previous_of(previous) {
                    Ok(previous) => {
                        store.stats_mut().record_replacement();
                        released.extend(store.attach_watch(&key, watch));
                        self.bus.stage(ChangeRecord::replaced(
                            key.clone(),
                            previous.value,
                            current.value,
                            current.version,
                        ));
                        Ok(released)
                    }
                    Err(error) => Err((error.to_string(), released, watch)),
                },
                Ok(Committed { released, .. }) => {
                    Err(("replacement left no entry".to_string(), released, watch))
                }
                Err(conflict) => {
                    store.stats_mut().record_superseded();
                    Err((conflict.to_string(), Vec::new(), watch))
                }
            }
        };

        match committed {
            Ok(released) => {
                drop(released);
                debug!(key = ?key, version, "Expired entry replaced");
                self.bus.flush();
                Resolution::Replaced
            }
            Err((reason, released, watch)) => {
                drop(released);
                drop(watch);
                debug!(key = ?key, version, %reason, "Expiration superseded; replacement discarded");
                Resolution::Superseded
            }
        }
    }

    fn resolve_failure(&self, claimed: CacheEntry<K, V>, error: anyhow::Error) -> Resolution {
        let key = claimed.key;
        let version = claimed.version;
        warn!(key = ?key, version, error = %format!("{:#}", error), "Expiration factory failed");

        {
            let mut store = self.store.lock();
            let now = self.now_ms();
            store.stats_mut().record_factory_failure();
            if !store.release_claim(&key, version, now) {
                debug!(key = ?key, version, "Entry moved on while the factory ran");
            }
            self.bus.stage_failure(CacheError::factory_failure(&key, &error));
        }

        self.bus.flush();
        Resolution::FactoryFailed
    }
}
