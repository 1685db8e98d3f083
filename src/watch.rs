//! Property Watch Module
//!
//! Lets keys and values report their own property-level changes to the cache.
//!
//! A type opts in by implementing [`Watchable::watch`]; the cache calls it once
//! when an entry is committed and keeps the returned [`WatchGuard`] alongside the
//! entry. Dropping the guard (entry removed or value replaced) ends the watch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

// == Property Id ==
/// Identifier of a changed property, e.g. `"price"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PropertyId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for PropertyId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Property Sink ==
/// Callback handed to a watchable key or value; call [`PropertySink::notify`]
/// whenever one of its properties changes.
#[derive(Clone)]
pub struct PropertySink {
    notify: Arc<dyn Fn(PropertyId) + Send + Sync>,
}

impl PropertySink {
    pub fn new(notify: impl Fn(PropertyId) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn notify(&self, property: impl Into<PropertyId>) {
        (self.notify)(property.into());
    }
}

impl fmt::Debug for PropertySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySink").finish_non_exhaustive()
    }
}

// == Watch Guard ==
/// Ends a property watch when dropped.
#[must_use = "dropping the guard ends the watch immediately"]
pub struct WatchGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

// == Watchable Capability ==
/// Static capability probed once per committed entry.
///
/// The default implementation reports no property changes, which is what plain
/// data types want.
pub trait Watchable {
    fn watch(&self, sink: PropertySink) -> Option<WatchGuard> {
        let _ = sink;
        None
    }
}

macro_rules! impl_unwatched {
    ($($ty:ty),* $(,)?) => {
        $(impl Watchable for $ty {})*
    };
}

impl_unwatched!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str,
);

impl<T> Watchable for Vec<T> {}

impl<T: Watchable> Watchable for Option<T> {
    fn watch(&self, sink: PropertySink) -> Option<WatchGuard> {
        self.as_ref().and_then(|inner| inner.watch(sink))
    }
}

impl<T: Watchable + ?Sized> Watchable for Arc<T> {
    fn watch(&self, sink: PropertySink) -> Option<WatchGuard> {
        (**self).watch(sink)
    }
}

impl<T: Watchable + ?Sized> Watchable for Box<T> {
    fn watch(&self, sink: PropertySink) -> Option<WatchGuard> {
        (**self).watch(sink)
    }
}

// == Notifier ==
/// Reusable fan-out a watchable type can embed.
///
/// Clones share the same listener list, so a value snapshot keeps reporting to
/// whoever watches the original.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

#[derive(Default)]
struct NotifierInner {
    sinks: Mutex<Vec<(u64, PropertySink)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink; the returned guard unregisters it.
    pub fn subscribe(&self, sink: PropertySink) -> WatchGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.lock().push((id, sink));

        let weak: Weak<NotifierInner> = Arc::downgrade(&self.inner);
        WatchGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.sinks.lock().retain(|(sink_id, _)| *sink_id != id);
            }
        })
    }

    /// Tells every registered sink that `property` changed.
    pub fn notify(&self, property: impl Into<PropertyId>) {
        let property = property.into();
        // Sinks run without the listener lock held; they may re-enter.
        let sinks: Vec<PropertySink> = self
            .inner
            .sinks
            .lock()
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();
        for sink in sinks {
            sink.notify(property.clone());
        }
    }

    /// Number of live watches.
    pub fn watcher_count(&self) -> usize {
        self.inner.sinks.lock().len()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
