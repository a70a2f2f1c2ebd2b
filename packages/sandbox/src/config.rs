// ABOUTME: Environment-driven configuration for sandbox provisioning and bootstrap
// ABOUTME: Reads DROVER_* variables with validated ranges and safe fallbacks

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Environment variable names read by this crate
pub mod env_vars {
    pub const DROVER_PLATFORM_TOKEN: &str = "DROVER_PLATFORM_TOKEN";
    pub const DROVER_SANDBOX_API_URL: &str = "DROVER_SANDBOX_API_URL";
    pub const DROVER_SANDBOX_TIMEOUT_MINUTES: &str = "DROVER_SANDBOX_TIMEOUT_MINUTES";
    pub const DROVER_AGENT_SERVER_GRACE_SECS: &str = "DROVER_AGENT_SERVER_GRACE_SECS";
    pub const DROVER_GIT_USER_NAME: &str = "DROVER_GIT_USER_NAME";
    pub const DROVER_GIT_USER_EMAIL: &str = "DROVER_GIT_USER_EMAIL";
}

/// Port the agent server listens on inside every sandbox
pub const AGENT_SERVER_PORT: u16 = 4096;

/// Port exposed for the optional application preview
pub const PREVIEW_PORT: u16 = 3000;

const DEFAULT_API_URL: &str = "https://api.drover.dev";
const DEFAULT_TIMEOUT_MINUTES: u64 = 45;
const DEFAULT_GRACE_SECS: u64 = 5;
const DEFAULT_GIT_USER_NAME: &str = "Drover Agent";
const DEFAULT_GIT_USER_EMAIL: &str = "agent@drover.dev";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Settings consumed by the sandbox manager
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Platform authentication token; provisioning fails fast without it
    pub platform_token: Option<String>,
    pub api_url: String,
    /// Fixed maximum lifetime requested for every compute allocation
    pub sandbox_timeout: Duration,
    /// Wait after launching the agent server before resolving its URL
    pub agent_server_grace: Duration,
    pub git_user_name: String,
    pub git_user_email: String,
    pub runtime: String,
    pub agent_server_port: u16,
    pub preview_port: u16,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            platform_token: None,
            api_url: DEFAULT_API_URL.to_string(),
            sandbox_timeout: Duration::from_secs(DEFAULT_TIMEOUT_MINUTES * 60),
            agent_server_grace: Duration::from_secs(DEFAULT_GRACE_SECS),
            git_user_name: DEFAULT_GIT_USER_NAME.to_string(),
            git_user_email: DEFAULT_GIT_USER_EMAIL.to_string(),
            runtime: "node22".to_string(),
            agent_server_port: AGENT_SERVER_PORT,
            preview_port: PREVIEW_PORT,
        }
    }
}

impl SandboxConfig {
    /// Build configuration from the process environment
    ///
    /// Out-of-range numeric values fall back to their defaults; a malformed
    /// API URL is reported as an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let platform_token = env::var(env_vars::DROVER_PLATFORM_TOKEN)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let api_url = env::var(env_vars::DROVER_SANDBOX_API_URL)
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                name: env_vars::DROVER_SANDBOX_API_URL,
                value: api_url,
            });
        }

        let timeout_minutes = env::var(env_vars::DROVER_SANDBOX_TIMEOUT_MINUTES)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| (1..=300).contains(&v))
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES);

        let grace_secs = env::var(env_vars::DROVER_AGENT_SERVER_GRACE_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v <= 120)
            .unwrap_or(DEFAULT_GRACE_SECS);

        let git_user_name = env::var(env_vars::DROVER_GIT_USER_NAME)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.git_user_name);

        let git_user_email = env::var(env_vars::DROVER_GIT_USER_EMAIL)
            .ok()
            .filter(|v| v.contains('@'))
            .unwrap_or(defaults.git_user_email);

        Ok(Self {
            platform_token,
            api_url,
            sandbox_timeout: Duration::from_secs(timeout_minutes * 60),
            agent_server_grace: Duration::from_secs(grace_secs),
            git_user_name,
            git_user_email,
            ..defaults
        })
    }

    pub fn with_platform_token(mut self, token: impl Into<String>) -> Self {
        self.platform_token = Some(token.into());
        self
    }

    pub fn with_agent_server_grace(mut self, grace: Duration) -> Self {
        self.agent_server_grace = grace;
        self
    }

    /// Token if present and non-blank
    pub fn token(&self) -> Option<&str> {
        self.platform_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert!(config.token().is_none());
        assert_eq!(config.agent_server_port, 4096);
        assert_eq!(config.preview_port, 3000);
        assert_eq!(config.sandbox_timeout, Duration::from_secs(45 * 60));
    }

    #[test]
    fn test_blank_token_is_absent() {
        let config = SandboxConfig::default().with_platform_token("   ");
        assert!(config.token().is_none());

        let config = SandboxConfig::default().with_platform_token("tok_123");
        assert_eq!(config.token(), Some("tok_123"));
    }
}
