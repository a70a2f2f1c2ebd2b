// ABOUTME: Sandbox lifecycle manager orchestrating provider and registry operations
// ABOUTME: Provisions, bootstraps, tracks and tears down remote sandboxes

use crate::config::SandboxConfig;
use crate::error::{ProvisionError, SandboxError};
use crate::providers::{
    CommandSpec, ExecResult, GitSource, Provider, ProviderError, ProvisionRequest, SandboxStatus,
};
use crate::registry::{SandboxHandle, SandboxRegistry};
use crate::shell;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where the detached agent server writes its output
pub const AGENT_SERVER_LOG: &str = "/tmp/agent-server.log";

/// Number of log lines collected when bootstrap fails
const DIAGNOSTIC_TAIL_LINES: usize = 50;

/// Environment variable carrying the model credential into the agent server
const MODEL_CREDENTIAL_ENV: &str = "ANTHROPIC_API_KEY";

/// Request to create a new sandbox
#[derive(Debug, Clone)]
pub struct CreateSandboxConfig {
    pub repo_url: String,
    pub branch: String,
    /// Repository access token used for the clone
    pub credential: Option<String>,
    /// Model provider key handed to the agent server
    pub model_credential: Option<String>,
}

/// Result of a successful provisioning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedSandbox {
    pub sandbox_id: String,
    pub sandbox_url: String,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<ExecResult> for CommandOutput {
    fn from(result: ExecResult) -> Self {
        Self {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        }
    }
}

/// Coarse sandbox state reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Running,
    Stopped,
    Error,
}

impl From<SandboxStatus> for SandboxState {
    fn from(status: SandboxStatus) -> Self {
        match status {
            SandboxStatus::Running | SandboxStatus::Provisioning | SandboxStatus::Resuming => {
                SandboxState::Running
            }
            SandboxStatus::Error => SandboxState::Error,
            SandboxStatus::Stopped | SandboxStatus::Paused => SandboxState::Stopped,
        }
    }
}

/// Anything able to run an argv inside a sandbox
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_command(
        &self,
        sandbox_id: &str,
        argv: &[String],
    ) -> Result<CommandOutput, SandboxError>;
}

struct StepFailure {
    step: &'static str,
    message: String,
}

impl StepFailure {
    fn new(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

/// Sandbox lifecycle manager
pub struct SandboxManager {
    provider: Arc<dyn Provider>,
    registry: Arc<SandboxRegistry>,
    config: SandboxConfig,
}

impl SandboxManager {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<SandboxRegistry>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    /// Provision a sandbox and bring its agent server up
    pub async fn create(
        &self,
        request: CreateSandboxConfig,
    ) -> Result<CreatedSandbox, ProvisionError> {
        if self.config.token().is_none() {
            warn!("Refusing to provision sandbox without a platform token");
            return Err(ProvisionError::MissingToken);
        }

        let source = GitSource {
            url: request.repo_url.clone(),
            branch: request.branch.clone(),
            credential: request.credential.clone(),
        };

        let provision = ProvisionRequest {
            source: source.clone(),
            ports: vec![self.config.agent_server_port, self.config.preview_port],
            timeout_ms: self.config.sandbox_timeout.as_millis() as u64,
            runtime: self.config.runtime.clone(),
        };

        let remote = self.provider.create(&provision).await?;
        let sandbox_id = remote.id.clone();
        let guard = self.registry.lock(&sandbox_id).await;

        self.registry
            .insert(SandboxHandle {
                id: sandbox_id.clone(),
                status: SandboxStatus::Provisioning,
                agent_server_port: self.config.agent_server_port,
                preview_port: self.config.preview_port,
                source,
                sandbox_url: None,
                preview_url: None,
                created_at: Utc::now(),
            })
            .await;

        info!(sandbox_id = %sandbox_id, repo = %request.repo_url, "Bootstrapping sandbox");

        let outcome = self
            .bootstrap(&sandbox_id, request.model_credential.as_deref())
            .await;

        let result = match outcome {
            Ok((sandbox_url, preview_url)) => {
                self.registry
                    .update(&sandbox_id, |handle| {
                        handle.status = SandboxStatus::Running;
                        handle.sandbox_url = Some(sandbox_url.clone());
                        handle.preview_url = preview_url.clone();
                    })
                    .await;

                info!(sandbox_id = %sandbox_id, url = %sandbox_url, "Sandbox ready");
                Ok(CreatedSandbox {
                    sandbox_id: sandbox_id.clone(),
                    sandbox_url,
                    preview_url,
                })
            }
            Err(failure) => {
                error!(
                    sandbox_id = %sandbox_id,
                    step = failure.step,
                    "Sandbox bootstrap failed: {}",
                    failure.message
                );
                let diagnostics = self.collect_diagnostics(&sandbox_id).await;
                self.teardown(&sandbox_id).await;

                Err(ProvisionError::Bootstrap {
                    step: failure.step,
                    message: failure.message,
                    diagnostics,
                })
            }
        };

        drop(guard);
        self.registry.release_lock(&sandbox_id).await;
        result
    }

    async fn bootstrap(
        &self,
        sandbox_id: &str,
        model_credential: Option<&str>,
    ) -> Result<(String, Option<String>), StepFailure> {
        let identity = format!(
            "git config --global user.name {} && git config --global user.email {}",
            shell::quote(&self.config.git_user_name),
            shell::quote(&self.config.git_user_email)
        );
        self.run_step(sandbox_id, "git-identity", CommandSpec::shell(identity))
            .await?;

        self.run_step(
            sandbox_id,
            "runtime-install",
            CommandSpec::new("npm").arg("install").arg("-g").arg("bun").sudo(),
        )
        .await?;

        self.run_step(
            sandbox_id,
            "agent-server-install",
            CommandSpec::new("npm")
                .arg("install")
                .arg("-g")
                .arg("opencode-ai")
                .sudo(),
        )
        .await?;

        let serve = format!(
            "opencode serve --port {} --hostname 0.0.0.0 > {} 2>&1",
            self.config.agent_server_port, AGENT_SERVER_LOG
        );
        let mut start = CommandSpec::shell(serve).detached();
        if let Some(key) = model_credential.filter(|k| !k.is_empty()) {
            start = start.env(MODEL_CREDENTIAL_ENV, key);
        }
        self.provider
            .run_command(sandbox_id, &start)
            .await
            .map_err(|e| StepFailure::new("agent-server-start", e.to_string()))?;

        if !self.config.agent_server_grace.is_zero() {
            tokio::time::sleep(self.config.agent_server_grace).await;
        }

        let sandbox_url = self
            .provider
            .domain(sandbox_id, self.config.agent_server_port)
            .await
            .map_err(|e| StepFailure::new("agent-url", e.to_string()))?;

        let preview_url = match self
            .provider
            .domain(sandbox_id, self.config.preview_port)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(sandbox_id = %sandbox_id, "No preview route: {}", e);
                None
            }
        };

        Ok((sandbox_url, preview_url))
    }

    async fn run_step(
        &self,
        sandbox_id: &str,
        step: &'static str,
        command: CommandSpec,
    ) -> Result<(), StepFailure> {
        debug!(sandbox_id = %sandbox_id, step, "Running bootstrap step");
        let result = self
            .provider
            .run_command(sandbox_id, &command)
            .await
            .map_err(|e| StepFailure::new(step, e.to_string()))?;

        if result.success() {
            return Ok(());
        }

        let detail = [result.stderr.trim(), result.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with code {}", result.exit_code));
        Err(StepFailure::new(step, detail))
    }

    async fn collect_diagnostics(&self, sandbox_id: &str) -> Option<String> {
        let tail = CommandSpec::new("tail")
            .arg("-n")
            .arg(DIAGNOSTIC_TAIL_LINES.to_string())
            .arg(AGENT_SERVER_LOG);

        match self.provider.run_command(sandbox_id, &tail).await {
            Ok(result) if !result.stdout.trim().is_empty() => Some(result.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!(sandbox_id = %sandbox_id, "Could not read agent server log: {}", e);
                None
            }
        }
    }

    /// Run an argv inside a registered sandbox
    pub async fn run_command(
        &self,
        sandbox_id: &str,
        argv: &[String],
    ) -> Result<CommandOutput, SandboxError> {
        if !self.registry.contains(sandbox_id).await {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }

        let command = CommandSpec::from_argv(argv).ok_or(SandboxError::EmptyCommand)?;
        let result = self.provider.run_command(sandbox_id, &command).await?;
        Ok(result.into())
    }

    /// Stop a sandbox and forget it; safe to call for unknown ids
    pub async fn terminate(&self, sandbox_id: &str) {
        let guard = self.registry.lock(sandbox_id).await;
        self.teardown(sandbox_id).await;
        drop(guard);
        self.registry.release_lock(sandbox_id).await;
    }

    async fn teardown(&self, sandbox_id: &str) {
        if !self.registry.contains(sandbox_id).await {
            match self.provider.get(sandbox_id).await {
                Ok(remote) if remote.status == SandboxStatus::Stopped => {
                    debug!(sandbox_id = %sandbox_id, "Sandbox already stopped");
                    return;
                }
                Ok(_) => {
                    info!(sandbox_id = %sandbox_id, "Recovered untracked sandbox for termination");
                }
                Err(e) => {
                    debug!(sandbox_id = %sandbox_id, "Sandbox already gone: {}", e);
                    return;
                }
            }
        }

        match self.provider.stop(sandbox_id).await {
            Ok(()) => info!(sandbox_id = %sandbox_id, "Sandbox stopped"),
            Err(ProviderError::NotFound(_)) => {
                debug!(sandbox_id = %sandbox_id, "Sandbox vanished before stop")
            }
            Err(e) => warn!(sandbox_id = %sandbox_id, "Treating stop failure as stopped: {}", e),
        }

        self.registry.remove(sandbox_id).await;
    }

    /// Current state of a sandbox, evicting ids the platform no longer knows
    pub async fn get_status(&self, sandbox_id: &str) -> SandboxState {
        if !self.registry.contains(sandbox_id).await {
            return SandboxState::Stopped;
        }

        match self.provider.status(sandbox_id).await {
            Ok(status) => {
                self.registry
                    .update(sandbox_id, |handle| handle.status = status)
                    .await;
                status.into()
            }
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, "Status query failed, evicting: {}", e);
                self.registry.remove(sandbox_id).await;
                self.registry.release_lock(sandbox_id).await;
                SandboxState::Stopped
            }
        }
    }

    pub async fn get(&self, sandbox_id: &str) -> Option<SandboxHandle> {
        self.registry.get(sandbox_id).await
    }

    pub async fn list(&self) -> Vec<SandboxHandle> {
        self.registry.list().await
    }
}

#[async_trait]
impl CommandRunner for SandboxManager {
    async fn run_command(
        &self,
        sandbox_id: &str,
        argv: &[String],
    ) -> Result<CommandOutput, SandboxError> {
        SandboxManager::run_command(self, sandbox_id, argv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PortRoute, RemoteSandbox};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockProvider {
        commands: Mutex<Vec<CommandSpec>>,
        stops: Mutex<Vec<String>>,
        creates: Mutex<usize>,
        fail_command_containing: Option<&'static str>,
        known_remote: Option<RemoteSandbox>,
        fail_status: bool,
        routes: Vec<PortRoute>,
    }

    impl MockProvider {
        fn healthy() -> Self {
            Self {
                routes: vec![
                    PortRoute {
                        port: 4096,
                        url: "https://4096-sbx-mock.drover.run".to_string(),
                    },
                    PortRoute {
                        port: 3000,
                        url: "https://3000-sbx-mock.drover.run".to_string(),
                    },
                ],
                ..Default::default()
            }
        }

        fn command_lines(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|c| format!("{} {}", c.cmd, c.args.join(" ")))
                .collect()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn create(
            &self,
            _request: &ProvisionRequest,
        ) -> std::result::Result<RemoteSandbox, ProviderError> {
            *self.creates.lock().unwrap() += 1;
            Ok(RemoteSandbox {
                id: "sbx-mock".to_string(),
                status: SandboxStatus::Provisioning,
                routes: self.routes.clone(),
            })
        }

        async fn get(&self, sandbox_id: &str) -> std::result::Result<RemoteSandbox, ProviderError> {
            if sandbox_id == "sbx-mock" {
                return Ok(RemoteSandbox {
                    id: sandbox_id.to_string(),
                    status: SandboxStatus::Running,
                    routes: self.routes.clone(),
                });
            }
            self.known_remote
                .clone()
                .filter(|r| r.id == sandbox_id)
                .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))
        }

        async fn status(&self, sandbox_id: &str) -> std::result::Result<SandboxStatus, ProviderError> {
            if self.fail_status {
                return Err(ProviderError::ConnectionError("unreachable".to_string()));
            }
            Ok(self.get(sandbox_id).await?.status)
        }

        async fn run_command(
            &self,
            _sandbox_id: &str,
            command: &CommandSpec,
        ) -> std::result::Result<ExecResult, ProviderError> {
            self.commands.lock().unwrap().push(command.clone());
            let line = format!("{} {}", command.cmd, command.args.join(" "));

            if command.cmd == "tail" {
                return Ok(ExecResult {
                    exit_code: 0,
                    stdout: "error: address in use\n".to_string(),
                    stderr: String::new(),
                });
            }
            if let Some(needle) = self.fail_command_containing {
                if line.contains(needle) {
                    return Ok(ExecResult {
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: format!("{} failed", needle),
                    });
                }
            }
            Ok(ExecResult {
                exit_code: 0,
                stdout: "ok".to_string(),
                stderr: String::new(),
            })
        }

        async fn stop(&self, sandbox_id: &str) -> std::result::Result<(), ProviderError> {
            self.stops.lock().unwrap().push(sandbox_id.to_string());
            Ok(())
        }
    }

    fn manager_with(provider: Arc<MockProvider>, token: Option<&str>) -> SandboxManager {
        let mut config = SandboxConfig::default().with_agent_server_grace(Duration::ZERO);
        if let Some(token) = token {
            config = config.with_platform_token(token);
        }
        SandboxManager::new(provider, Arc::new(SandboxRegistry::new()), config)
    }

    fn create_request() -> CreateSandboxConfig {
        CreateSandboxConfig {
            repo_url: "https://github.com/acme/widgets.git".to_string(),
            branch: "main".to_string(),
            credential: Some("ghp_secret".to_string()),
            model_credential: Some("sk-ant-test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_remote_call() {
        let provider = Arc::new(MockProvider::healthy());
        let manager = manager_with(provider.clone(), None);

        let result = manager.create(create_request()).await;

        assert!(matches!(result, Err(ProvisionError::MissingToken)));
        assert!(manager.registry().is_empty().await);
        assert_eq!(*provider.creates.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_bootstraps_in_order() {
        let provider = Arc::new(MockProvider::healthy());
        let manager = manager_with(provider.clone(), Some("tok"));

        let created = manager.create(create_request()).await.unwrap();

        assert_eq!(created.sandbox_id, "sbx-mock");
        assert_eq!(created.sandbox_url, "https://4096-sbx-mock.drover.run");
        assert_eq!(
            created.preview_url.as_deref(),
            Some("https://3000-sbx-mock.drover.run")
        );

        let lines = provider.command_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("git config --global user.name"));
        assert_eq!(lines[1], "npm install -g bun");
        assert_eq!(lines[2], "npm install -g opencode-ai");
        assert!(lines[3].contains("opencode serve --port 4096"));

        let start = provider.commands.lock().unwrap()[3].clone();
        assert!(start.detached);
        assert_eq!(
            start.env.get("ANTHROPIC_API_KEY").map(String::as_str),
            Some("sk-ant-test")
        );

        let handle = manager.get("sbx-mock").await.unwrap();
        assert_eq!(handle.status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_missing_preview_route_is_tolerated() {
        let mut provider = MockProvider::healthy();
        provider.routes.retain(|r| r.port == 4096);
        let manager = manager_with(Arc::new(provider), Some("tok"));

        let created = manager.create(create_request()).await.unwrap();
        assert!(created.preview_url.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_terminates_with_diagnostics() {
        let provider = Arc::new(MockProvider {
            fail_command_containing: Some("opencode-ai"),
            ..MockProvider::healthy()
        });
        let manager = manager_with(provider.clone(), Some("tok"));

        let err = manager.create(create_request()).await.unwrap_err();

        match err {
            ProvisionError::Bootstrap {
                step,
                message,
                diagnostics,
            } => {
                assert_eq!(step, "agent-server-install");
                assert_eq!(message, "opencode-ai failed");
                assert_eq!(diagnostics.as_deref(), Some("error: address in use\n"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(*provider.stops.lock().unwrap(), vec!["sbx-mock".to_string()]);
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_agent_route_fails_bootstrap() {
        let mut provider = MockProvider::healthy();
        provider.routes.clear();
        let manager = manager_with(Arc::new(provider), Some("tok"));

        let err = manager.create(create_request()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Bootstrap {
                step: "agent-url",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminate_unknown_leaves_registry_empty() {
        let provider = Arc::new(MockProvider::default());
        let manager = manager_with(provider.clone(), Some("tok"));

        manager.terminate("sbx-unknown").await;
        manager.terminate("sbx-unknown").await;

        assert!(manager.registry().is_empty().await);
        assert!(provider.stops.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_recovers_untracked_remote() {
        let provider = Arc::new(MockProvider {
            known_remote: Some(RemoteSandbox {
                id: "sbx-orphan".to_string(),
                status: SandboxStatus::Running,
                routes: vec![],
            }),
            ..Default::default()
        });
        let manager = manager_with(provider.clone(), Some("tok"));

        manager.terminate("sbx-orphan").await;

        assert_eq!(*provider.stops.lock().unwrap(), vec!["sbx-orphan".to_string()]);
    }

    #[tokio::test]
    async fn test_run_command_requires_registration() {
        let manager = manager_with(Arc::new(MockProvider::healthy()), Some("tok"));
        let argv = vec!["ls".to_string()];

        let err = manager.run_command("sbx-mock", &argv).await.unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));

        manager.create(create_request()).await.unwrap();
        let output = manager.run_command("sbx-mock", &argv).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "ok");

        let err = manager.run_command("sbx-mock", &[]).await.unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_get_status_unknown_is_stopped() {
        let manager = manager_with(Arc::new(MockProvider::default()), Some("tok"));
        assert_eq!(manager.get_status("nope").await, SandboxState::Stopped);
    }

    #[tokio::test]
    async fn test_get_status_error_evicts() {
        let provider = Arc::new(MockProvider {
            fail_status: true,
            ..MockProvider::healthy()
        });
        let manager = manager_with(provider, Some("tok"));
        manager.create(create_request()).await.unwrap();
        assert!(manager.get("sbx-mock").await.is_some());

        assert_eq!(manager.get_status("sbx-mock").await, SandboxState::Stopped);
        assert!(manager.get("sbx-mock").await.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(SandboxState::from(SandboxStatus::Resuming), SandboxState::Running);
        assert_eq!(SandboxState::from(SandboxStatus::Provisioning), SandboxState::Running);
        assert_eq!(SandboxState::from(SandboxStatus::Paused), SandboxState::Stopped);
        assert_eq!(SandboxState::from(SandboxStatus::Error), SandboxState::Error);
    }
}
