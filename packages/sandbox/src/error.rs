// ABOUTME: Error types surfaced by the sandbox manager
// ABOUTME: Separates provisioning failures from command and lookup failures

use crate::providers::ProviderError;
use thiserror::Error;

/// Failure while creating and bootstrapping a sandbox
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Platform token is not configured")]
    MissingToken,

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Bootstrap failed at {step}: {message}{}", format_diagnostics(.diagnostics))]
    Bootstrap {
        step: &'static str,
        message: String,
        diagnostics: Option<String>,
    },
}

fn format_diagnostics(diagnostics: &Option<String>) -> String {
    match diagnostics {
        Some(logs) if !logs.trim().is_empty() => format!("\nAgent server logs:\n{}", logs.trim_end()),
        _ => String::new(),
    }
}

/// Failure while operating on an existing sandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}
