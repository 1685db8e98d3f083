//! Observable Cache - an in-memory key/value cache that broadcasts its changes
//!
//! Every mutation, expiration and value property change is published as an
//! ordered change record to all current subscribers. Entries can expire on an
//! absolute deadline, a sliding window or a predicate, and be removed or
//! replaced by a factory when they do.

pub mod api;
pub mod bus;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;
pub mod watch;

pub use api::AppState;
pub use bus::{
    ChangeEvent, ChangeJournal, ChangeRecord, ChangeType, Observer, SubscriptionHandle,
};
pub use cache::{ExpirationSpec, ObservableCache, Operation, Resolution};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_expiration_task;
