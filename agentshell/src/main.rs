//! CLI entry point exposing the four operations the orchestrator adapter
//! would otherwise publish to an agent over MCP (spec §1's "thin adapter",
//! reimplemented here as a direct command surface instead of a server).

mod config;

use std::path::PathBuf;

use agentshell_core::discovery::{self, Discovery};
use agentshell_core::pipeline::stage::Stage;
use agentshell_core::pipeline::Engine;
use agentshell_core::registry::RegistryClient;
use agentshell_core::sandbox::{SandboxRunner, ALLOWED_COMMANDS};
use agentshell_core::session::{is_orchestrator_workload, RemoteSession};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "agentshell", version, about = "A tool-orchestration shell for agent pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a pipeline description read from a JSON file.
    Run {
        pipeline: PathBuf,
        #[arg(long)]
        initial_input: Option<String>,
    },
    /// List every tool exposed by every running workload.
    Tools,
    /// List the allowlisted sandbox commands.
    Commands,
    /// Describe one tool on one workload.
    Describe { server: String, tool: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(config::log_filter())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let discovery = Discovery::new();
    let (host, port) = discovery
        .discover(
            config.registry_host.as_deref(),
            config.registry_port,
            config.scan_range.clone(),
            config.registry_port.is_some(),
        )
        .await
        .unwrap_or((discovery::DEFAULT_HOST.to_string(), discovery::DEFAULT_PORT));

    let registry = RegistryClient::new(&host, port, config.in_container);

    match cli.command {
        Command::Run {
            pipeline,
            initial_input,
        } => run_pipeline(&registry, &pipeline, initial_input.unwrap_or_default()).await,
        Command::Tools => list_tools(&registry).await,
        Command::Commands => {
            println!("{}", ALLOWED_COMMANDS.join("\n"));
            Ok(())
        }
        Command::Describe { server, tool } => describe_tool(&registry, &server, &tool).await,
    }
}

async fn run_pipeline(registry: &RegistryClient, path: &PathBuf, initial_input: String) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline file {}", path.display()))?;
    let pipeline: Vec<Stage> =
        serde_json::from_str(&contents).with_context(|| "pipeline file is not valid JSON")?;

    let sandbox = SandboxRunner::detect();
    let engine = Engine::new(registry.clone(), sandbox);
    let output = engine
        .execute(&pipeline, &initial_input)
        .await
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    print!("{output}");
    Ok(())
}

async fn list_tools(registry: &RegistryClient) -> Result<()> {
    let workloads = registry.list_workloads().await?;
    for workload in workloads {
        println!("\n**{}**", workload.name);
        println!("  Status: {}", workload.status);
        if !workload.is_running() {
            continue;
        }
        match RemoteSession::open(&workload).await {
            Ok(session) => match session.list_tools().await {
                Ok(tools) => {
                    if is_orchestrator_workload(&tools) {
                        println!("  Skipped: orchestrator workload (self)");
                        continue;
                    }
                    for tool in tools {
                        println!(
                            "  - {} : {}",
                            tool.name,
                            truncate_description(tool.description.as_deref().unwrap_or(""))
                        );
                    }
                }
                Err(err) => println!("  Error: {err}"),
            },
            Err(err) => println!("  Error: {err}"),
        }
    }
    Ok(())
}

/// spec §6: tool descriptions are flattened to one line and capped at 200
/// characters in the human-readable `list_all_tools` output.
fn truncate_description(description: &str) -> String {
    let flattened: String = description.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
    if flattened.chars().count() > 200 {
        flattened.chars().take(200).collect()
    } else {
        flattened
    }
}

async fn describe_tool(registry: &RegistryClient, server: &str, tool: &str) -> Result<()> {
    let workload = registry
        .get_workload(server)
        .await?
        .with_context(|| format!("workload '{server}' not found"))?;
    let session = RemoteSession::open(&workload).await?;
    let tools = session.list_tools().await?;
    if is_orchestrator_workload(&tools) {
        anyhow::bail!("workload '{server}' is the orchestrator itself, not a tool provider");
    }
    match tools.into_iter().find(|t| t.name == tool) {
        Some(descriptor) => {
            println!("{}: {}", descriptor.name, descriptor.description.unwrap_or_default());
            println!(
                "{}",
                serde_json::to_string_pretty(&descriptor.input_schema)
                    .unwrap_or_else(|_| descriptor.input_schema.to_string())
            );
            Ok(())
        }
        None => anyhow::bail!("tool '{tool}' not found on workload '{server}'"),
    }
}
