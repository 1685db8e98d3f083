//! Change Journal Module
//!
//! Bounded observer that remembers the most recent change records and
//! expiration failures.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::bus::{ChangeEvent, ChangeRecord, Observer};

// == Change Journal ==
/// Keeps the last `capacity` events, oldest at the front.
///
/// Once full, each new event pushes the oldest one out. Failures are kept with
/// their sequence number alongside the records.
#[derive(Debug)]
pub struct ChangeJournal<K, V> {
    events: Mutex<VecDeque<ChangeEvent<K, V>>>,
    capacity: usize,
}

impl<K, V> ChangeJournal<K, V> {
    // == Constructor ==
    /// Creates a journal. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Sequence number of the newest retained event.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.events.lock().back().map(ChangeEvent::sequence)
    }

    // == Push ==
    fn push(&self, event: ChangeEvent<K, V>) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

impl<K: Clone, V: Clone> ChangeJournal<K, V> {
    // == Since ==
    /// Returns retained events with a sequence number greater than `after`.
    pub fn since(&self, after: u64) -> Vec<ChangeEvent<K, V>> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.sequence() > after)
            .cloned()
            .collect()
    }
}

impl<K, V> Observer<K, V> for ChangeJournal<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn on_change(&self, record: &ChangeRecord<K, V>) {
        self.push(ChangeEvent::Change(record.clone()));
    }

    fn on_event(&self, event: &ChangeEvent<K, V>) {
        self.push(event.clone());
    }
}
