//! Allocator configuration.

use portside_types::PortRange;

/// Environment variable consulted for the default environment tag.
pub const ENV_VAR: &str = "PORTSIDE_ENV";

/// Configuration for a Portside allocator instance.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Document store database URL.
    pub store_url: String,
    /// Environment tag; doubles as the document name inside the store,
    /// so separate environments never share allocation state.
    pub env: String,
    /// Inclusive scan bounds.
    pub port_range: PortRange,
    /// Attempts before a publish conflict is surfaced to the caller.
    pub publish_retry_limit: u32,
    /// Upper bound on a single probe's bind attempt (ms).
    pub probe_timeout_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            store_url: "http://127.0.0.1:5984/portside".to_string(),
            env: std::env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string()),
            port_range: PortRange::default(),
            publish_retry_limit: 3,
            probe_timeout_ms: 5_000,
        }
    }
}
