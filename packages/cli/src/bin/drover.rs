// ABOUTME: Entry point for the drover command-line tool
// ABOUTME: Parses arguments, sets up logging and dispatches to the subcommand handlers

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Drover CLI - run coding agents in remote sandboxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a sandbox, run an agent on a repository and print the result
    Run {
        /// Git repository URL to clone into the sandbox
        #[arg(long)]
        repo: String,

        #[arg(long, default_value = "main")]
        branch: String,

        /// Agent to run (claude or codex)
        #[arg(long, default_value = "claude")]
        agent: String,

        /// Instruction passed to the agent
        #[arg(long)]
        instruction: String,

        /// Model override; the agent's default is used otherwise
        #[arg(long)]
        model: Option<String>,

        /// Repository checkout inside the sandbox where the agent runs
        #[arg(long)]
        workdir: Option<String>,

        /// Leave the sandbox running after the agent finishes
        #[arg(long)]
        keep: bool,
    },
    /// Print canonical events from an event-stream endpoint until Ctrl-C
    Stream {
        url: String,
    },
    /// Print canonical events from a WebSocket endpoint, reconnecting on drops
    Watch {
        url: String,
    },
    /// Estimate token cost from a JSONL file of frames or tool-call records
    Cost {
        file: PathBuf,

        /// Task id for lines that carry none
        #[arg(long)]
        task_id: Option<String>,

        /// Model for tool-call records that name none
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            repo,
            branch,
            agent,
            instruction,
            model,
            workdir,
            keep,
        } => {
            cli::run::run_command(cli::run::RunArgs {
                repo,
                branch,
                agent,
                instruction,
                model,
                workdir,
                keep,
            })
            .await
        }
        Commands::Stream { url } => cli::stream::stream_command(&url).await,
        Commands::Watch { url } => cli::stream::watch_command(&url).await,
        Commands::Cost {
            file,
            task_id,
            model,
        } => cli::cost::cost_command(&file, task_id.as_deref(), model.as_deref()),
    }
}
