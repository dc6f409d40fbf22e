//! Command-line interface parsing and handling
//!
//! Every command loads `mcp.json`, enables the configured servers, waits for
//! them to settle and then reports on them or calls one of their tools.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::config::data::path_display;
use crate::core::config::io::default_config_path;
use crate::core::config::McpConfig;
use crate::core::mcp_sampling::SamplingHandler;
use crate::core::provider::{OpenAiProvider, DEFAULT_BASE_URL};
use crate::core::tools::ToolRegistry;
use crate::mcp::events::StatusUpdate;
use crate::mcp::manager::McpManager;
use crate::mcp::registry::register_mcp_tools;
use crate::mcp::tool_cache::default_tool_cache_path;
use crate::utils::logging::init_tracing;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(name = "mcpmux")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Run Model Context Protocol tool servers and call their tools")]
#[command(
    long_about = "mcpmux starts the MCP tool servers configured in mcp.json, aggregates their \
tools under \"<server>__<tool>\" names and answers sampling requests through an \
OpenAI-compatible API.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key used when servers request sampling\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  MCPMUX_LOG        Log filter (e.g. debug, mcpmux=trace)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to mcp.json (defaults to the per-user config directory)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model used to answer sampling requests
    #[arg(short = 'm', long, global = true, default_value = "gpt-4o-mini")]
    pub model: String,

    /// Approve every sampling request without asking
    #[arg(long, global = true)]
    pub yolo: bool,

    /// Seconds to wait for servers to finish starting
    #[arg(short = 'w', long, global = true, default_value_t = 30)]
    pub wait: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the status of every configured server (default)
    Servers,
    /// List the tools of every ready server
    Tools {
        /// Show last-known tools from the cache without starting servers
        #[arg(long)]
        cached: bool,
    },
    /// Call a tool by its namespaced name
    Call {
        /// Tool name, e.g. fs__read_file
        name: String,
        /// JSON object with the tool arguments
        args: Option<String>,
    },
}

pub async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let mut args = Args::parse();

    let config_path = match args.config.clone() {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = McpConfig::load_from_path(&config_path)?;
    if config.servers.is_empty() {
        println!("No MCP servers configured in {}", path_display(&config_path));
        return Ok(());
    }

    let mut manager = McpManager::new(&config);
    if let Some(path) = default_tool_cache_path() {
        manager = manager.with_tool_cache(path);
    }

    let command = args.command.take().unwrap_or(Commands::Servers);
    if let Commands::Tools { cached: true } = command {
        print_cached_tools(&manager).await;
        return Ok(());
    }

    let manager = Arc::new(manager);
    manager
        .set_sampling_handler(sampling_handler(&args, &config))
        .await;

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    manager.enable_all(&ctx).await;
    if !manager
        .wait_until_settled(Duration::from_secs(args.wait))
        .await
    {
        warn!(seconds = args.wait, "Some MCP servers are still starting");
    }

    let result = run_command(command, &manager, &ctx).await;
    manager.stop_all().await;
    result
}

async fn run_command(
    command: Commands,
    manager: &Arc<McpManager>,
    ctx: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Servers => {
            for name in manager.server_names() {
                print_status(&manager.server_status(&name).await);
            }
            Ok(())
        }
        Commands::Tools { .. } => {
            let mut registry = ToolRegistry::new();
            let count = register_mcp_tools(&mut registry, manager.clone()).await;
            if count == 0 {
                println!("No tools available.");
            }
            for spec in registry.specs() {
                println!("{}\t{}", spec.name, spec.description);
            }
            Ok(())
        }
        Commands::Call { name, args } => {
            let output = manager
                .call_tool(ctx, &name, args.as_deref().unwrap_or(""))
                .await?;
            println!("{output}");
            Ok(())
        }
    }
}

fn sampling_handler(args: &Args, config: &McpConfig) -> Option<Arc<SamplingHandler>> {
    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            warn!("OPENAI_API_KEY is not set; sampling requests will be refused");
            return None;
        }
    };
    let base_url =
        std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

    match OpenAiProvider::new(base_url, api_key, args.model.clone()) {
        Ok(provider) => Some(Arc::new(
            SamplingHandler::new(Arc::new(provider))
                .with_mcp_config(config)
                .with_yolo(args.yolo),
        )),
        Err(err) => {
            warn!(error = %err, "Failed to build sampling provider");
            None
        }
    }
}

fn print_status(update: &StatusUpdate) {
    match &update.error {
        Some(error) => println!("{}\t{}\t{}", update.name, update.status, error),
        None => println!("{}\t{}", update.name, update.status),
    }
}

async fn print_cached_tools(manager: &McpManager) {
    let cached = manager.cached_tools().await;
    if cached.is_empty() {
        println!("No cached tools.");
    }
    for (server, tools) in cached {
        for tool in tools {
            println!("{server}__{}\t[{server}] {}", tool.name, tool.description);
        }
    }
}
