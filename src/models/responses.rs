//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::bus::{ChangeEvent, ChangeRecord, ChangeType};
use crate::cache::CacheStats;

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
    /// Entry version at read time
    pub version: u64,
    /// Milliseconds until the deadline, if the entry has one
    pub expires_in_ms: Option<u64>,
}

/// Response body for every mutation endpoint
///
/// Echoes the change record the mutation produced.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    /// Success message
    pub message: String,
    pub key: String,
    pub change_type: ChangeType,
    pub sequence: u64,
    pub version: u64,
}

impl MutationResponse {
    pub fn from_record(key: impl Into<String>, record: &ChangeRecord<String, String>) -> Self {
        let key = key.into();
        let verb = match record.change_type {
            ChangeType::Added => "added",
            ChangeType::ValueReplaced => "replaced",
            ChangeType::Removed => "deleted",
            ChangeType::Reset => "cleared",
            _ => "changed",
        };
        Self {
            message: format!("Key '{}' {} successfully", key, verb),
            key,
            change_type: record.change_type,
            sequence: record.sequence,
            version: record.version,
        }
    }
}

/// Response body for PUT /expire/:key
#[derive(Debug, Clone, Serialize)]
pub struct ExpireResponse {
    pub message: String,
    pub key: String,
    pub ttl_ms: u64,
    pub sliding: bool,
    pub replaces: bool,
}

/// A replacement factory failure reported on the change feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureResponse {
    /// Sequence number the failure was delivered at
    pub sequence: u64,
    pub error: String,
}

/// Response body for GET /changes
#[derive(Debug, Clone, Serialize)]
pub struct ChangesResponse {
    pub changes: Vec<ChangeRecord<String, String>>,
    pub failures: Vec<FailureResponse>,
    /// Sequence number of the newest retained event, if any
    pub latest_sequence: Option<u64>,
}

impl ChangesResponse {
    /// Splits journal events into records and failures, both in sequence order.
    pub fn from_events(
        events: Vec<ChangeEvent<String, String>>,
        latest_sequence: Option<u64>,
    ) -> Self {
        let mut changes = Vec::new();
        let mut failures = Vec::new();
        for event in events {
            match event {
                ChangeEvent::Change(record) => changes.push(record),
                ChangeEvent::Failure { sequence, error } => failures.push(FailureResponse {
                    sequence,
                    error: error.to_string(),
                }),
            }
        }
        Self {
            changes,
            failures,
            latest_sequence,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    pub subscribers: usize,
}

impl StatsResponse {
    pub fn new(stats: CacheStats, subscribers: usize) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
            subscribers,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
