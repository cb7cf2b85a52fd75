use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mordomo_core::{AgentRegistry, Enhancer, LlmClient, Orchestrator, Session, enhance_or_fallback};
use mordomo_gateway::{GatewayServer, GatewayState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::MordomoConfig;

#[derive(Parser)]
#[command(name = "mordomo")]
#[command(version)]
#[command(about = "Mordomo: multi-agent assistant for energy customers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket gateway
    Serve {
        /// Overrides `gateway.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Route a single question and print the answer
    Ask {
        message: String,
    },

    /// List registered agents
    Agents,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = MordomoConfig::load(&cli.config);
    let filter = if cli.debug {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|cfg| cfg.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    if let Commands::Init = cli.command {
        return cmd_init().await;
    }
    let cfg = loaded?;

    match cli.command {
        Commands::Serve { bind } => cmd_serve(&cfg, bind).await,
        Commands::Ask { message } => cmd_ask(&cfg, &message).await,
        Commands::Agents => cmd_agents(),
        Commands::Config => cmd_config(&cfg),
        Commands::Init => Ok(()),
    }
}

/// Orchestrator over the standard agents, with the model attached when configured
fn build_orchestrator(cfg: &MordomoConfig) -> Result<(Orchestrator, Option<Arc<LlmClient>>)> {
    let registry = Arc::new(AgentRegistry::standard());
    let mut orchestrator = Orchestrator::new(registry)
        .with_config(cfg.routing.orchestrator_config())
        .with_router_config(cfg.routing.router_config());

    if !cfg.llm.is_usable() {
        info!("LLM not configured, routing by keywords and answering with agent text");
        return Ok((orchestrator, None));
    }

    let client = Arc::new(LlmClient::new(cfg.llm.to_core()).context("Failed to create LLM client")?);
    info!("LLM enabled: {} at {}", cfg.llm.model, cfg.llm.base_url);
    orchestrator = orchestrator.with_classifier(client.clone());
    Ok((orchestrator, Some(client)))
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Mordomo initialized at {}", config_dir.display());
    println!(
        "Set MORDOMO_LLM_API_KEY or edit {} to enable the language model.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(cfg: &MordomoConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

fn cmd_agents() -> Result<()> {
    let registry = AgentRegistry::standard();
    for info in registry.info() {
        println!("{}  {}", info.id, info.description);
        println!("    {}", info.capabilities.join(", "));
    }
    Ok(())
}

async fn cmd_ask(cfg: &MordomoConfig, message: &str) -> Result<()> {
    anyhow::ensure!(!message.trim().is_empty(), "Message cannot be empty");

    let (orchestrator, llm) = build_orchestrator(cfg)?;
    let mut session = Session::new();
    let routed = orchestrator.route_query(&mut session, message, None).await?;

    let enhancer = llm.as_deref().map(|client| client as &dyn Enhancer);
    let text = enhance_or_fallback(enhancer, message, &routed.response, &routed.primary_agent).await;

    println!("[{}]", routed.primary_agent);
    println!("{}", text);
    for collaborator in &routed.collaborating_agents {
        println!("  + {}", collaborator.agent);
    }
    if !routed.response.follow_up.is_empty() {
        println!();
        for suggestion in &routed.response.follow_up {
            println!("  → {}", suggestion);
        }
    }
    Ok(())
}

async fn cmd_serve(cfg: &MordomoConfig, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| cfg.gateway.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid gateway bind address '{}'", bind))?;

    let (orchestrator, llm) = build_orchestrator(cfg)?;
    let mut state =
        GatewayState::new(Arc::new(orchestrator)).with_session_limit(cfg.gateway.max_sessions);
    if let Some(client) = llm {
        state = state.with_enhancer(client);
    }

    let cancel = CancellationToken::new();
    let server = GatewayServer::new(addr, state);
    let mut handle = tokio::spawn(server.run_until(cancel.clone().cancelled_owned()));
    info!("Mordomo gateway starting on {}", addr);

    tokio::select! {
        result = &mut handle => {
            return result.context("Gateway task panicked")?;
        }
        signal = signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    handle.await.context("Gateway task panicked")??;

    println!("Mordomo stopped.");
    Ok(())
}
