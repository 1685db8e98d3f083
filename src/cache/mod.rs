//! Cache Module
//!
//! Entry store, expiration engine and the observable facade built on them.

mod entry;
mod expiration;
mod observable;
mod pipeline;
mod stats;
mod store;


// Re-export public types
pub use entry::{
    CacheEntry, ExpirationAction, ExpirationPolicy, ExpirationSpec, Factory, Predicate,
};
pub use expiration::Resolution;
pub use observable::{ObservableCache, Operation};
pub use pipeline::{CacheKey, CacheValue};
pub use stats::CacheStats;
pub use store::{Committed, EntryStore, EntryWatch, Update, VersionConflict};

// == Public Constants ==
/// Maximum allowed key length in bytes for the HTTP host
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes for the HTTP host
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
