//! Centralized configuration constants for the Cadenza runtime.

use std::time::Duration;

/// Transport and framing limits.
pub struct TransportConfig;

impl TransportConfig {
    /// Maximum size of a single IPC frame payload.
    pub const MAX_MESSAGE_SIZE: usize = 16_777_216; // 16MB
    /// Maximum number of concurrently connected initiators.
    pub const MAX_CONNECTIONS: usize = 16;
}

/// Defaults for the process-local cache.
pub struct CacheConfig;

impl CacheConfig {
    /// Default time-to-live for cache entries.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
    /// Default entry capacity before LRU eviction kicks in.
    pub const DEFAULT_CAPACITY: usize = 2000;
}
