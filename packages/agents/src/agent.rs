// ABOUTME: Coding-agent variants and their command-line construction
// ABOUTME: Each variant turns a prompt and optional model/resume flags into a shell invocation

use crate::registry::{AgentProfile, AgentRegistry, RegistryError};
use drover_sandbox::shell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selector for the supported agent CLIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
}

impl AgentKind {
    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
        }
    }

    /// Build the agent implementation for this kind
    pub fn build(self, registry: &AgentRegistry) -> Result<Box<dyn CodingAgent>, RegistryError> {
        let profile = registry.profile(self)?.clone();
        Ok(match self {
            AgentKind::Claude => Box::new(ClaudeAgent::new(profile)),
            AgentKind::Codex => Box::new(CodexAgent::new(profile)),
        })
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AgentKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            other => Err(RegistryError::NotFound(other.to_string())),
        }
    }
}

/// Per-run inputs that shape the command line
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub prompt: &'a str,
    pub model: Option<&'a str>,
    pub resume_session: Option<&'a str>,
}

/// Behaviour that differs between agent CLIs
///
/// Everything else about running an agent (credential checks, install,
/// change detection, result shaping) lives in [`crate::AgentExecutor`].
pub trait CodingAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn profile(&self) -> &AgentProfile;

    /// Command line for the CLI itself, without env prefixes or `cd`
    fn command_line(&self, invocation: &Invocation<'_>) -> String;

    fn check_command(&self) -> Vec<String> {
        vec!["which".to_string(), self.profile().cli_name.clone()]
    }

    fn install_command(&self) -> Vec<String> {
        self.profile().install_command.clone()
    }
}

pub struct ClaudeAgent {
    profile: AgentProfile,
}

impl ClaudeAgent {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }
}

impl CodingAgent for ClaudeAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn command_line(&self, invocation: &Invocation<'_>) -> String {
        let mut line = format!("{} -p --dangerously-skip-permissions", self.profile.cli_name);

        if let Some(model) = invocation.model.or(self.profile.default_model.as_deref()) {
            line.push_str(&format!(" --model {}", shell::quote(model)));
        }
        if let Some(session) = invocation.resume_session {
            line.push_str(&format!(" --resume {}", shell::quote(session)));
        }

        line.push(' ');
        line.push_str(&shell::quote(invocation.prompt));
        line
    }
}

pub struct CodexAgent {
    profile: AgentProfile,
}

impl CodexAgent {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }
}

impl CodingAgent for CodexAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn command_line(&self, invocation: &Invocation<'_>) -> String {
        let mut line = format!(
            "{} exec --dangerously-bypass-approvals-and-sandbox",
            self.profile.cli_name
        );

        if let Some(model) = invocation.model.or(self.profile.default_model.as_deref()) {
            line.push_str(&format!(" --model {}", shell::quote(model)));
        }
        // `resume` is a subcommand of `exec`, so it follows the flags
        if let Some(session) = invocation.resume_session {
            line.push_str(&format!(" resume {}", shell::quote(session)));
        }

        line.push(' ');
        line.push_str(&shell::quote(invocation.prompt));
        line
    }
}
