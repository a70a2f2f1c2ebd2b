// ABOUTME: Agent profile registry for the supported coding-agent CLIs
// ABOUTME: Loads credential, install and model defaults from config/agents.json

use crate::agent::AgentKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to load agents config: {0}")]
    LoadError(String),
    #[error("Agent not found: {0}")]
    NotFound(String),
}

type Result<T> = std::result::Result<T, RegistryError>;

/// Static description of one agent CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub id: String,
    /// Human-readable name used in result messages
    pub name: String,
    /// Executable name on the sandbox PATH
    pub cli_name: String,
    /// Credential environment variables that must be supplied for a run
    pub required_env: Vec<String>,
    pub install_command: Vec<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentsConfig {
    #[allow(dead_code)]
    version: String,
    agents: Vec<AgentProfile>,
}

pub struct AgentRegistry {
    profiles: HashMap<String, AgentProfile>,
}

impl AgentRegistry {
    /// Create a new AgentRegistry from the embedded config file
    pub fn new() -> Result<Self> {
        let config_json = include_str!("../config/agents.json");
        Self::from_json(config_json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: AgentsConfig =
            serde_json::from_str(json).map_err(|e| RegistryError::LoadError(e.to_string()))?;

        let profiles = config
            .agents
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();

        Ok(Self { profiles })
    }

    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.profiles.get(id)
    }

    /// Profile backing a given agent kind
    pub fn profile(&self, kind: AgentKind) -> Result<&AgentProfile> {
        self.get(kind.id())
            .ok_or_else(|| RegistryError::NotFound(kind.id().to_string()))
    }

    pub fn list(&self) -> Vec<&AgentProfile> {
        let mut profiles: Vec<&AgentProfile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }
}
