//! Cache Entry Module
//!
//! Defines individual cache entries and the expiration policies attached to them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::duration_ms;

/// Decides whether an entry has expired; evaluated outside the store lock.
pub type Predicate<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// Computes a replacement value for an expired entry.
pub type Factory<K, V> = Arc<dyn Fn(&K, &V) -> anyhow::Result<V> + Send + Sync>;

// == Expiration Policy ==
/// When an entry expires.
#[derive(Clone)]
pub enum ExpirationPolicy<K, V> {
    /// Fixed time-to-live, armed when the policy is attached or re-armed
    Absolute(Duration),
    /// Time-to-idle; every successful read pushes the deadline out again
    Sliding(Duration),
    /// Expires whenever the predicate holds for the current value
    Predicate(Predicate<K, V>),
}

// == Expiration Action ==
/// What happens once an entry has expired.
#[derive(Clone)]
pub enum ExpirationAction<K, V> {
    Remove,
    Replace(Factory<K, V>),
}

// == Expiration Spec ==
/// Policy plus action, attached per entry.
#[derive(Clone)]
pub struct ExpirationSpec<K, V> {
    pub policy: ExpirationPolicy<K, V>,
    pub action: ExpirationAction<K, V>,
}

impl<K, V> ExpirationSpec<K, V> {
    pub fn new(policy: ExpirationPolicy<K, V>, action: ExpirationAction<K, V>) -> Self {
        Self { policy, action }
    }

    /// Removes the entry `ttl` after it is armed.
    pub fn absolute(ttl: Duration) -> Self {
        Self::new(ExpirationPolicy::Absolute(ttl), ExpirationAction::Remove)
    }

    /// Removes the entry after `window` without reads.
    pub fn sliding(window: Duration) -> Self {
        Self::new(ExpirationPolicy::Sliding(window), ExpirationAction::Remove)
    }

    /// Removes the entry once `predicate` returns true.
    pub fn when(predicate: impl Fn(&K, &V) -> bool + Send + Sync + 'static) -> Self {
        Self::new(
            ExpirationPolicy::Predicate(Arc::new(predicate)),
            ExpirationAction::Remove,
        )
    }

    /// Swaps the action to replace the value with what `factory` returns.
    pub fn replace_with(
        mut self,
        factory: impl Fn(&K, &V) -> anyhow::Result<V> + Send + Sync + 'static,
    ) -> Self {
        self.action = ExpirationAction::Replace(Arc::new(factory));
        self
    }

    /// Deadline for a policy armed at `now_ms`; `None` for predicate policies.
    pub fn deadline_from(&self, now_ms: u64) -> Option<u64> {
        match &self.policy {
            ExpirationPolicy::Absolute(ttl) | ExpirationPolicy::Sliding(ttl) => {
                Some(now_ms.saturating_add(duration_ms(*ttl)))
            }
            ExpirationPolicy::Predicate(_) => None,
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self.policy, ExpirationPolicy::Sliding(_))
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self.policy, ExpirationPolicy::Predicate(_))
    }
}

impl<K, V> fmt::Debug for ExpirationSpec<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match &self.policy {
            ExpirationPolicy::Absolute(ttl) => format!("Absolute({:?})", ttl),
            ExpirationPolicy::Sliding(window) => format!("Sliding({:?})", window),
            ExpirationPolicy::Predicate(_) => "Predicate".to_string(),
        };
        let action = match &self.action {
            ExpirationAction::Remove => "Remove",
            ExpirationAction::Replace(_) => "Replace",
        };
        f.debug_struct("ExpirationSpec")
            .field("policy", &policy)
            .field("action", &action)
            .finish()
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    /// Bumped on every committed mutation of this key
    pub version: u64,
    pub expiration: Option<ExpirationSpec<K, V>>,
    /// Armed deadline (Unix milliseconds) for time-based policies
    pub expires_at: Option<u64>,
    /// Bumped whenever the policy is attached, replaced or cleared
    pub policy_generation: u64,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates an entry with no expiration policy.
    pub fn new(key: K, value: V, version: u64) -> Self {
        Self {
            key,
            value,
            version,
            expiration: None,
            expires_at: None,
            policy_generation: 0,
        }
    }

    // == Arm ==
    /// Attaches (or clears) a policy and arms its deadline from `now_ms`.
    pub fn set_expiration(&mut self, spec: Option<ExpirationSpec<K, V>>, now_ms: u64) {
        self.expires_at = spec.as_ref().and_then(|s| s.deadline_from(now_ms));
        self.expiration = spec;
        self.policy_generation += 1;
    }

    /// Restarts the current policy's deadline from `now_ms`.
    pub fn rearm(&mut self, now_ms: u64) {
        self.expires_at = self
            .expiration
            .as_ref()
            .and_then(|s| s.deadline_from(now_ms));
    }

    // == Is Due ==
    /// Checks whether a time-based deadline has passed.
    ///
    /// Boundary condition: an entry is due once the current time is greater than
    /// or equal to its deadline. Predicate policies are never due here; they are
    /// evaluated separately against a snapshot.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(deadline) => now_ms >= deadline,
            None => false,
        }
    }

    /// True when this entry needs its predicate evaluated.
    pub fn has_predicate(&self) -> bool {
        self.expiration.as_ref().is_some_and(|s| s.is_predicate())
    }

    // == Time To Live ==
    /// Returns remaining time in milliseconds, or None if no deadline is armed.
    ///
    /// # Returns
    /// - `Some(0)` if the deadline has passed
    /// - `Some(remaining_ms)` otherwise
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at
            .map(|deadline| deadline.saturating_sub(now_ms))
    }
}
