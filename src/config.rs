//! Configuration Module
//!
//! Loads the HTTP host's settings from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Host configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Interval of the background expiration sweep in milliseconds
    pub sweep_interval_ms: u64,
    /// Number of change records kept for `GET /changes`
    pub journal_capacity: usize,
    /// TTL applied to entries added without one; 0 means no expiration
    pub default_ttl_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `SWEEP_INTERVAL_MS` - Expiration sweep interval (default: 100)
    /// - `JOURNAL_CAPACITY` - Retained change records (default: 1024)
    /// - `DEFAULT_TTL_MS` - Default TTL, 0 disables it (default: 0)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: var_or("SERVER_PORT", defaults.server_port),
            sweep_interval_ms: var_or("SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            journal_capacity: var_or("JOURNAL_CAPACITY", defaults.journal_capacity),
            default_ttl_ms: var_or("DEFAULT_TTL_MS", defaults.default_ttl_ms),
        }
    }

    /// Sweep interval as a Duration; never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_ms > 0).then(|| Duration::from_millis(self.default_ttl_ms))
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            sweep_interval_ms: 100,
            journal_capacity: 1024,
            default_ttl_ms: 0,
        }
    }
}
