// ABOUTME: `drover run` provisions a sandbox and executes one agent instruction in it
// ABOUTME: Prints the sandbox and execution result as JSON and terminates unless asked to keep it

use anyhow::{Context, Result};
use drover_agents::{AgentExecutor, AgentKind, AgentRegistry, ExecuteOptions, TracingTaskLogger};
use drover_sandbox::{
    CommandRunner, CreateSandboxConfig, HttpProvider, SandboxConfig, SandboxManager,
    SandboxRegistry,
};
use serde_json::json;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Repository access token forwarded to the clone
const REPO_TOKEN_VAR: &str = "GITHUB_TOKEN";
/// Model provider key forwarded to the agent server
const MODEL_KEY_VAR: &str = "ANTHROPIC_API_KEY";

pub struct RunArgs {
    pub repo: String,
    pub branch: String,
    pub agent: String,
    pub instruction: String,
    pub model: Option<String>,
    pub workdir: Option<String>,
    pub keep: bool,
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Execution options for one run; `lookup` resolves credential variables
fn execute_options(
    args: &RunArgs,
    required_env: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> ExecuteOptions {
    let mut options = ExecuteOptions {
        working_dir: args.workdir.clone(),
        model: args.model.clone(),
        ..Default::default()
    };
    for var in required_env {
        if let Some(value) = lookup(var) {
            options = options.credential(var.clone(), value);
        }
    }
    options
}

pub async fn run_command(args: RunArgs) -> Result<()> {
    let kind: AgentKind = args.agent.parse()?;
    let registry = AgentRegistry::new()?;
    let profile = registry.profile(kind)?.clone();

    let config = SandboxConfig::from_env()?;
    let token = config
        .token()
        .map(str::to_string)
        .context("DROVER_PLATFORM_TOKEN is not set")?;
    let provider = Arc::new(HttpProvider::new(config.api_url.clone(), token)?);
    let manager = Arc::new(SandboxManager::new(
        provider,
        Arc::new(SandboxRegistry::new()),
        config,
    ));

    let created = manager
        .create(CreateSandboxConfig {
            repo_url: args.repo.clone(),
            branch: args.branch.clone(),
            credential: non_empty_env(REPO_TOKEN_VAR),
            model_credential: non_empty_env(MODEL_KEY_VAR),
        })
        .await
        .with_context(|| format!("Failed to provision sandbox for {}", args.repo))?;

    info!(
        sandbox_id = %created.sandbox_id,
        sandbox_url = %created.sandbox_url,
        "Sandbox ready"
    );

    let options = execute_options(&args, &profile.required_env, non_empty_env);

    let runner: Arc<dyn CommandRunner> = manager.clone();
    let logger = Arc::new(TracingTaskLogger::new(created.sandbox_id.clone()));
    let executor = AgentExecutor::with_registry(runner, logger, registry);

    let result = executor
        .execute(kind, &created.sandbox_id, &args.instruction, &options)
        .await;

    let report = json!({
        "sandbox": created,
        "result": result,
        "kept": args.keep,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.keep {
        info!(sandbox_id = %created.sandbox_id, "Leaving sandbox running");
    } else {
        manager.terminate(&created.sandbox_id).await;
    }

    if !result.is_success() {
        anyhow::bail!(
            "{} did not complete: {}",
            result.cli_name(),
            result.error().unwrap_or("unknown error")
        );
    }
    Ok(())
}
