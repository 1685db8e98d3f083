//! Change Record Module
//!
//! One unit of the notification stream.

use serde::Serialize;

use crate::error::CacheError;
use crate::watch::PropertyId;

// == Change Type ==
/// Kind of transition a [`ChangeRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    KeyChanged,
    ValueChanged,
    ValueReplaced,
    /// Informational; the entry is still present when this is delivered.
    Expired,
    Removed,
    /// Bulk invalidation. Observers must drop derived state and re-read.
    Reset,
}

// == Change Record ==
/// Snapshot of one committed transition.
///
/// Observers only ever see owned clones; nothing here points into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord<K, V> {
    /// Bus sequence number; strictly increasing in commit order
    pub sequence: u64,
    pub change_type: ChangeType,
    /// `None` only for [`ChangeType::Reset`]
    pub key: Option<K>,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
    pub changed_property: Option<PropertyId>,
    /// Entry version this record describes (0 for `Reset`)
    pub version: u64,
}

impl<K, V> ChangeRecord<K, V> {
    /// Builds a keyed record. The sequence number is assigned when staged.
    pub(crate) fn keyed(
        change_type: ChangeType,
        key: K,
        old_value: Option<V>,
        new_value: Option<V>,
        version: u64,
    ) -> Self {
        Self {
            sequence: 0,
            change_type,
            key: Some(key),
            old_value,
            new_value,
            changed_property: None,
            version,
        }
    }

    pub(crate) fn added(key: K, value: V, version: u64) -> Self {
        Self::keyed(ChangeType::Added, key, None, Some(value), version)
    }

    pub(crate) fn replaced(key: K, old: V, new: V, version: u64) -> Self {
        Self::keyed(ChangeType::ValueReplaced, key, Some(old), Some(new), version)
    }

    pub(crate) fn removed(key: K, old: V, version: u64) -> Self {
        Self::keyed(ChangeType::Removed, key, Some(old), None, version)
    }

    pub(crate) fn expired(key: K, current: V, version: u64) -> Self {
        Self::keyed(ChangeType::Expired, key, Some(current), None, version)
    }

    pub(crate) fn property_changed(
        change_type: ChangeType,
        key: K,
        current: V,
        property: PropertyId,
        version: u64,
    ) -> Self {
        let mut record = Self::keyed(change_type, key, None, Some(current), version);
        record.changed_property = Some(property);
        record
    }

    pub(crate) fn reset() -> Self {
        Self {
            sequence: 0,
            change_type: ChangeType::Reset,
            key: None,
            old_value: None,
            new_value: None,
            changed_property: None,
            version: 0,
        }
    }

    pub fn is_reset(&self) -> bool {
        self.change_type == ChangeType::Reset
    }
}

// == Change Event ==
/// One item of the delivery stream: a change record, or a failure that is not
/// a change (an expiration factory error).
///
/// Both kinds share the bus sequence numbering.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<K, V> {
    Change(ChangeRecord<K, V>),
    Failure { sequence: u64, error: CacheError },
}

impl<K, V> ChangeEvent<K, V> {
    pub fn sequence(&self) -> u64 {
        match self {
            ChangeEvent::Change(record) => record.sequence,
            ChangeEvent::Failure { sequence, .. } => *sequence,
        }
    }

    pub fn record(&self) -> Option<&ChangeRecord<K, V>> {
        match self {
            ChangeEvent::Change(record) => Some(record),
            ChangeEvent::Failure { .. } => None,
        }
    }

    pub fn into_record(self) -> Option<ChangeRecord<K, V>> {
        match self {
            ChangeEvent::Change(record) => Some(record),
            ChangeEvent::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CacheError> {
        match self {
            ChangeEvent::Change(_) => None,
            ChangeEvent::Failure { error, .. } => Some(error),
        }
    }
}
