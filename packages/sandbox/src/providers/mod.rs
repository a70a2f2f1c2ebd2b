// ABOUTME: Provider trait and shared types for remote sandbox backends
// ABOUTME: Defines the abstract interface for remote VM lifecycle and command execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod http;

pub use http::HttpProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Lifecycle states reported by the remote platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Provisioning,
    Running,
    Paused,
    Resuming,
    Error,
    Stopped,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Provisioning => "provisioning",
            SandboxStatus::Running => "running",
            SandboxStatus::Paused => "paused",
            SandboxStatus::Resuming => "resuming",
            SandboxStatus::Error => "error",
            SandboxStatus::Stopped => "stopped",
        }
    }
}

/// Git source cloned into the sandbox at creation time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitSource {
    pub url: String,
    pub branch: String,
    /// Access token used for the clone; never logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Request sent to the provider to allocate a new sandbox
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    pub source: GitSource,
    pub ports: Vec<u16>,
    pub timeout_ms: u64,
    pub runtime: String,
}

/// A sandbox as described by the remote platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSandbox {
    pub id: String,
    pub status: SandboxStatus,
    #[serde(default)]
    pub routes: Vec<PortRoute>,
}

/// Public URL the platform assigned to an exposed port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortRoute {
    pub port: u16,
    pub url: String,
}

/// Command to run inside a sandbox
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandSpec {
    pub cmd: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    pub sudo: bool,
    /// Start the command and return immediately without waiting for exit
    pub detached: bool,
}

impl CommandSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    /// Build a spec from an argv vector; the first element is the program
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (cmd, args) = argv.split_first()?;
        Some(Self {
            cmd: cmd.clone(),
            args: args.to_vec(),
            ..Default::default()
        })
    }

    /// Shorthand for `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Provider trait for remote sandbox backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Allocate a sandbox, clone the source and expose the requested ports
    async fn create(&self, request: &ProvisionRequest) -> Result<RemoteSandbox>;

    /// Look up an existing sandbox by id
    async fn get(&self, sandbox_id: &str) -> Result<RemoteSandbox>;

    /// Query the current lifecycle status of a sandbox
    async fn status(&self, sandbox_id: &str) -> Result<SandboxStatus> {
        Ok(self.get(sandbox_id).await?.status)
    }

    /// Run a command inside the sandbox
    async fn run_command(&self, sandbox_id: &str, command: &CommandSpec) -> Result<ExecResult>;

    /// Stop the sandbox and release its compute allocation
    async fn stop(&self, sandbox_id: &str) -> Result<()>;

    /// Resolve the externally reachable URL for an exposed port
    async fn domain(&self, sandbox_id: &str, port: u16) -> Result<String> {
        let sandbox = self.get(sandbox_id).await?;
        sandbox
            .routes
            .iter()
            .find(|route| route.port == port)
            .map(|route| route.url.clone())
            .ok_or_else(|| {
                ProviderError::NotFound(format!("no route for port {} on {}", port, sandbox_id))
            })
    }
}
