// ABOUTME: Environment-driven settings for the push-socket reconnect policy
// ABOUTME: Out-of-range or unparsable values fall back to the built-in defaults

use crate::socket::ReconnectPolicy;
use std::env;
use std::time::Duration;

/// Environment variable names read by this crate
pub mod env_vars {
    pub const DROVER_RECONNECT_BASE_MS: &str = "DROVER_RECONNECT_BASE_MS";
    pub const DROVER_RECONNECT_MAX_DELAY_MS: &str = "DROVER_RECONNECT_MAX_DELAY_MS";
    pub const DROVER_RECONNECT_MAX_ATTEMPTS: &str = "DROVER_RECONNECT_MAX_ATTEMPTS";
}

const DEFAULT_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    pub reconnect: ReconnectPolicy,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_ms = lookup(env_vars::DROVER_RECONNECT_BASE_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (50..=60_000).contains(v))
            .unwrap_or(DEFAULT_BASE_MS);

        let max_delay_ms = lookup(env_vars::DROVER_RECONNECT_MAX_DELAY_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (100..=600_000).contains(v))
            .unwrap_or(DEFAULT_MAX_DELAY_MS);

        let max_attempts = lookup(env_vars::DROVER_RECONNECT_MAX_ATTEMPTS)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| (1..=100).contains(v))
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        // A cap below the base would make every delay shorter than the first
        let max_delay_ms = max_delay_ms.max(base_ms);

        Self {
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(base_ms),
                cap: Duration::from_millis(max_delay_ms),
                max_attempts,
            },
        }
    }
}
