//! Change Bus Module
//!
//! Ordered, multicast delivery of change records to observers.

mod channel;
mod journal;
mod observer;
mod record;

pub(crate) use observer::ChannelObserver;

pub use channel::ChangeBus;
pub use journal::ChangeJournal;
pub use observer::{Observer, SubscriptionHandle};
pub use record::{ChangeEvent, ChangeRecord, ChangeType};
