// ABOUTME: Error types for agent execution
// ABOUTME: Converted into failure results at the executor boundary

use drover_sandbox::SandboxError;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{var} is required for {cli}")]
pub struct AuthError {
    pub var: String,
    pub cli: String,
}

#[derive(Error, Debug)]
#[error("Failed to install {cli}: {stderr}")]
pub struct InstallError {
    pub cli: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    MissingCredential(#[from] AuthError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("{0}")]
    Execution(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Agent configuration error: {0}")]
    Config(#[from] crate::registry::RegistryError),
}
