// ABOUTME: Shared execution algorithm for coding agents inside a sandbox
// ABOUTME: Checks credentials, installs the CLI, runs it, detects changes and shapes the result

use crate::agent::{AgentKind, CodingAgent, Invocation};
use crate::error::{AgentError, AuthError, InstallError};
use crate::logger::{LogKind, TaskLogger, TaskStatus};
use crate::redact::Redactor;
use crate::registry::AgentRegistry;
use drover_sandbox::{shell, CommandOutput, CommandRunner};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-run options for an agent execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Repository checkout inside the sandbox; the CLI and `git status` run here
    pub working_dir: Option<String>,
    pub model: Option<String>,
    pub resume_session: Option<String>,
    /// Credential environment values, keyed by variable name
    pub credentials: HashMap<String, String>,
}

impl ExecuteOptions {
    pub fn credential(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(var.into(), value.into());
        self
    }
}

/// Outcome of one agent execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentExecutionResult {
    success: bool,
    output: String,
    agent_response: Option<String>,
    error: Option<String>,
    cli_name: String,
    changes_detected: bool,
}

impl AgentExecutionResult {
    pub fn success(
        cli_name: impl Into<String>,
        output: impl Into<String>,
        agent_response: impl Into<String>,
        changes_detected: bool,
    ) -> Self {
        Self {
            success: true,
            output: output.into(),
            agent_response: Some(agent_response.into()),
            error: None,
            cli_name: cli_name.into(),
            changes_detected,
        }
    }

    pub fn failure(
        cli_name: impl Into<String>,
        output: impl Into<String>,
        error: impl Into<String>,
        changes_detected: bool,
    ) -> Self {
        Self {
            success: false,
            output: output.into(),
            agent_response: None,
            error: Some(error.into()),
            cli_name: cli_name.into(),
            changes_detected,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn agent_response(&self) -> Option<&str> {
        self.agent_response.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cli_name(&self) -> &str {
        &self.cli_name
    }

    pub fn changes_detected(&self) -> bool {
        self.changes_detected
    }
}

/// Runs any [`CodingAgent`] through a [`CommandRunner`]
pub struct AgentExecutor {
    runner: Arc<dyn CommandRunner>,
    logger: Arc<dyn TaskLogger>,
    registry: AgentRegistry,
}

impl AgentExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        logger: Arc<dyn TaskLogger>,
    ) -> Result<Self, AgentError> {
        Ok(Self::with_registry(runner, logger, AgentRegistry::new()?))
    }

    pub fn with_registry(
        runner: Arc<dyn CommandRunner>,
        logger: Arc<dyn TaskLogger>,
        registry: AgentRegistry,
    ) -> Self {
        Self {
            runner,
            logger,
            registry,
        }
    }

    /// Execute an instruction with the agent selected by `kind`
    pub async fn execute(
        &self,
        kind: AgentKind,
        sandbox_id: &str,
        instruction: &str,
        options: &ExecuteOptions,
    ) -> AgentExecutionResult {
        match kind.build(&self.registry) {
            Ok(agent) => {
                self.execute_agent(agent.as_ref(), sandbox_id, instruction, options)
                    .await
            }
            Err(e) => {
                error!(agent = %kind, "Unable to build agent: {}", e);
                AgentExecutionResult::failure(kind.id(), e.to_string(), e.to_string(), false)
            }
        }
    }

    pub async fn execute_agent(
        &self,
        agent: &dyn CodingAgent,
        sandbox_id: &str,
        instruction: &str,
        options: &ExecuteOptions,
    ) -> AgentExecutionResult {
        let cli_name = agent.profile().cli_name.clone();
        let running = format!("Running {}", agent.profile().name);
        self.status(TaskStatus::Processing, Some(&running));

        let result = match self.run(agent, sandbox_id, instruction, options).await {
            Ok(result) => {
                if result.is_success() {
                    self.log(LogKind::Success, result.output());
                } else {
                    self.log(LogKind::Error, result.output());
                }
                result
            }
            Err(e) => {
                error!(sandbox_id = %sandbox_id, cli = %cli_name, "Agent execution failed: {}", e);
                let message = e.to_string();
                self.log(LogKind::Error, &message);
                AgentExecutionResult::failure(cli_name, message.clone(), message, false)
            }
        };

        if result.is_success() {
            self.status(TaskStatus::Completed, None);
        } else {
            self.status(TaskStatus::Error, result.error());
        }
        result
    }

    async fn run(
        &self,
        agent: &dyn CodingAgent,
        sandbox_id: &str,
        instruction: &str,
        options: &ExecuteOptions,
    ) -> Result<AgentExecutionResult, AgentError> {
        let profile = agent.profile();

        for var in &profile.required_env {
            let present = options
                .credentials
                .get(var)
                .is_some_and(|value| !value.trim().is_empty());
            if !present {
                warn!(cli = %profile.cli_name, "Missing credential {}", var);
                return Err(AuthError {
                    var: var.clone(),
                    cli: profile.name.clone(),
                }
                .into());
            }
        }
        self.progress(10, "Credentials verified");

        let redactor = Redactor::new(options.credentials.values().cloned());

        self.ensure_installed(agent, sandbox_id).await?;
        self.progress(30, &format!("{} is available", profile.name));

        let script = self.build_script(agent, instruction, options);
        self.log(LogKind::Command, &redactor.redact(&script));
        self.progress(50, &format!("Running {}", profile.name));

        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        let output = self.runner.run_command(sandbox_id, &argv).await?;

        if !output.stdout.trim().is_empty() {
            self.log(LogKind::Info, &redactor.redact(&output.stdout));
        }
        self.progress(90, "Checking for changes");

        let changes_detected = self
            .detect_changes(sandbox_id, options.working_dir.as_deref())
            .await;

        info!(
            sandbox_id = %sandbox_id,
            cli = %profile.cli_name,
            exit_code = output.exit_code,
            changes_detected,
            "Agent finished"
        );
        self.progress(100, "Agent finished");

        Ok(shape_result(&profile.cli_name, &profile.name, output, changes_detected))
    }

    async fn ensure_installed(
        &self,
        agent: &dyn CodingAgent,
        sandbox_id: &str,
    ) -> Result<(), AgentError> {
        let profile = agent.profile();
        let check = self
            .runner
            .run_command(sandbox_id, &agent.check_command())
            .await?;
        if check.success() {
            debug!(sandbox_id = %sandbox_id, cli = %profile.cli_name, "CLI already installed");
            return Ok(());
        }

        self.log(LogKind::Info, &format!("Installing {}", profile.name));
        let install = self
            .runner
            .run_command(sandbox_id, &agent.install_command())
            .await?;
        if !install.success() {
            let stderr = if install.stderr.trim().is_empty() {
                format!("exited with code {}", install.exit_code)
            } else {
                install.stderr.trim().to_string()
            };
            return Err(InstallError {
                cli: profile.name.clone(),
                stderr,
            }
            .into());
        }

        info!(sandbox_id = %sandbox_id, cli = %profile.cli_name, "CLI installed");
        Ok(())
    }

    fn build_script(
        &self,
        agent: &dyn CodingAgent,
        instruction: &str,
        options: &ExecuteOptions,
    ) -> String {
        let invocation = Invocation {
            prompt: instruction,
            model: options.model.as_deref(),
            resume_session: options.resume_session.as_deref(),
        };

        // Sorted so the rendered command is stable across runs
        let env: BTreeMap<&str, &str> = options
            .credentials
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut script = String::new();
        if let Some(dir) = &options.working_dir {
            script.push_str(&format!("cd {} && ", shell::quote(dir)));
        }
        script.push_str(&shell::env_prefix(env));
        script.push_str(&agent.command_line(&invocation));
        script
    }

    async fn detect_changes(&self, sandbox_id: &str, working_dir: Option<&str>) -> bool {
        let mut argv = vec!["git".to_string()];
        if let Some(dir) = working_dir {
            argv.push("-C".to_string());
            argv.push(dir.to_string());
        }
        argv.push("status".to_string());
        argv.push("--porcelain".to_string());

        match self.runner.run_command(sandbox_id, &argv).await {
            Ok(status) if status.success() => !status.stdout.trim().is_empty(),
            Ok(status) => {
                warn!(sandbox_id = %sandbox_id, "git status exited with {}", status.exit_code);
                false
            }
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, "git status failed: {}", e);
                false
            }
        }
    }

    fn log(&self, kind: LogKind, message: &str) {
        if let Err(e) = self.logger.append(kind, message) {
            warn!("Failed to append task log: {}", e);
        }
    }

    fn progress(&self, percent: u8, message: &str) {
        if let Err(e) = self.logger.update_progress(percent, message) {
            warn!("Failed to update task progress: {}", e);
        }
    }

    fn status(&self, status: TaskStatus, message: Option<&str>) {
        if let Err(e) = self.logger.update_status(status, message) {
            warn!("Failed to update task status: {}", e);
        }
    }
}

fn shape_result(
    cli_name: &str,
    display_name: &str,
    output: CommandOutput,
    changes_detected: bool,
) -> AgentExecutionResult {
    let suffix = if changes_detected {
        " (changes detected)"
    } else {
        " (no changes made)"
    };

    if output.success() {
        return AgentExecutionResult::success(
            cli_name,
            format!("{} executed successfully{}", display_name, suffix),
            output.stdout,
            changes_detected,
        );
    }

    let message = [output.stderr.trim(), output.stdout.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} exited with code {}", cli_name, output.exit_code));

    AgentExecutionResult::failure(
        cli_name,
        format!(
            "{} failed with exit code {}{}",
            display_name, output.exit_code, suffix
        ),
        message,
        changes_detected,
    )
}
