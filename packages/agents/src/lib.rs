// ABOUTME: Coding-agent execution layer for Drover sandboxes
// ABOUTME: Runs Claude Code or Codex through a command runner with redacted task logging

pub mod agent;
pub mod error;
pub mod executor;
pub mod logger;
pub mod redact;
pub mod registry;

pub use agent::{AgentKind, ClaudeAgent, CodexAgent, CodingAgent, Invocation};
pub use error::{AgentError, AuthError, InstallError};
pub use executor::{AgentExecutionResult, AgentExecutor, ExecuteOptions};
pub use logger::{LogKind, TaskLogError, TaskLogger, TaskStatus, TracingTaskLogger};
pub use redact::{redact, Redactor};
pub use registry::{AgentProfile, AgentRegistry, RegistryError};
