// ABOUTME: Remote sandbox lifecycle management for Drover
// ABOUTME: Provider seam, registry, bootstrap and command execution for ephemeral sandboxes

pub mod config;
pub mod error;
pub mod manager;
pub mod providers;
pub mod registry;
pub mod shell;

pub use config::{SandboxConfig, AGENT_SERVER_PORT, PREVIEW_PORT};
pub use error::{ProvisionError, SandboxError};
pub use manager::{
    CommandOutput, CommandRunner, CreateSandboxConfig, CreatedSandbox, SandboxManager,
    SandboxState,
};
pub use providers::{
    CommandSpec, ExecResult, GitSource, HttpProvider, Provider, ProviderError, SandboxStatus,
};
pub use registry::{SandboxHandle, SandboxRegistry};
