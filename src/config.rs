use serde::Deserialize;
use std::time::Duration;

/// Server tuning knobs.
///
/// Deserializes from any serde format; missing fields fall back to the
/// defaults, and durations are given in whole seconds:
///
/// ```rust
/// let config: bonfire::Config = serde_json::from_str(r#"{ "max_connections": 64 }"#).unwrap();
/// assert_eq!(config.max_connections, 64);
/// assert_eq!(config.keep_alive.as_secs(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connections served at once; further clients wait at accept.
    pub max_connections: usize,
    /// How long an idle keep-alive connection waits for its next request.
    #[serde(with = "seconds")]
    pub keep_alive: Duration,
    /// Idle request contexts kept for reuse.
    pub pool_capacity: usize,
    /// Largest request body accepted, in bytes.
    pub max_body_size: usize,
    /// Largest request line plus headers accepted, in bytes.
    pub max_header_size: usize,
    /// Most header fields accepted in one request.
    pub max_headers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 256,
            keep_alive: Duration::from_secs(5),
            pool_capacity: 1024,
            max_body_size: 2 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_headers: 64,
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
