//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::cache::{MAX_KEY_LENGTH, MAX_VALUE_SIZE};

/// Request body for POST /add
///
/// `ttl_ms` attaches an expiration on insert; `sliding` makes it a sliding
/// window and `replace_with` swaps the value in instead of removing the entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub sliding: bool,
    #[serde(default)]
    pub replace_with: Option<String>,
}

impl AddRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
            .or_else(|| validate_value(&self.value))
            .or_else(|| match self.ttl_ms {
                Some(0) => Some("ttl_ms must be greater than 0".to_string()),
                _ => None,
            })
            .or_else(|| self.replace_with.as_deref().and_then(validate_value))
    }
}

/// Request body for PUT /set (add or replace)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
}

impl SetRequest {
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key).or_else(|| validate_value(&self.value))
    }
}

/// Request body for PUT /expire/:key
#[derive(Debug, Clone, Deserialize)]
pub struct ExpireRequest {
    pub ttl_ms: u64,
    #[serde(default)]
    pub sliding: bool,
    #[serde(default)]
    pub replace_with: Option<String>,
}

impl ExpireRequest {
    pub fn validate(&self) -> Option<String> {
        if self.ttl_ms == 0 {
            return Some("ttl_ms must be greater than 0".to_string());
        }
        self.replace_with.as_deref().and_then(validate_value)
    }
}

/// Query string for GET /changes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangesQuery {
    /// Only records with a greater sequence number are returned
    #[serde(default)]
    pub after: u64,
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

fn validate_value(value: &str) -> Option<String> {
    if value.len() > MAX_VALUE_SIZE {
        return Some(format!(
            "Value exceeds maximum size of {} bytes",
            MAX_VALUE_SIZE
        ));
    }
    None
}
