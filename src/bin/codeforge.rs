//! CodeForge server
//!
//! Serves the compile/run/verify API, runs periodic maintenance and
//! removes every sandbox it owns on the way out.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use codeforge::config::{
    apply_env_overrides, config_path, load_config, load_config_from_path, save_config,
    validate_config, Config,
};
use codeforge::engine::DockerEngine;
use codeforge::maintenance::spawn_maintenance;
use codeforge::sandbox::{SandboxManager, SandboxRegistry};
use codeforge::service::CodeService;
use codeforge::VERSION;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "codeforge",
    author = "CodeForge Contributors",
    version = VERSION,
    about = "CodeForge - sandboxed multi-language code execution service",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $CODEFORGE_CONFIG or the user config dir)
    #[arg(long, short, global = true, env = "CODEFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate the configuration and print any issues
    CheckConfig,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Remove every sandbox container left on the engine
    Sweep,
}

fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,codeforge=debug".into());

    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) if path.exists() => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        Some(_) => {
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    Ok(config)
}

/// Log validation issues; errors abort startup
fn check(config: &Config) -> anyhow::Result<()> {
    let result = validate_config(config);
    for issue in &result.warnings {
        warn!("Config warning at {}: {}", issue.path, issue.message);
    }
    for issue in &result.errors {
        match &issue.suggestion {
            Some(hint) => error!("Config error at {}: {} ({})", issue.path, issue.message, hint),
            None => error!("Config error at {}: {}", issue.path, issue.message),
        }
    }
    if !result.valid {
        anyhow::bail!("Invalid configuration ({} error(s))", result.errors.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load(cli.config.as_ref())?;
    init_tracing(&config.log.format);

    match cli.command {
        None => serve(config, None, None).await,
        Some(Commands::Serve { bind, port }) => serve(config, bind, port).await,
        Some(Commands::CheckConfig) => {
            check(&config)?;
            info!("Configuration is valid");
            Ok(())
        }
        Some(Commands::InitConfig { force }) => {
            let path = cli.config.unwrap_or_else(config_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            save_config(&Config::default(), &path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Some(Commands::Sweep) => {
            check(&config)?;
            let engine = DockerEngine::connect().await?;
            let manager = SandboxManager::new(
                Arc::new(engine),
                Arc::new(SandboxRegistry::new()),
                config.sandbox,
            );
            let count = manager.sweep_all().await?;
            info!("Removed {} sandbox container(s)", count);
            Ok(())
        }
    }
}

async fn serve(mut config: Config, bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    check(&config)?;

    info!("Starting CodeForge v{}", VERSION);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let sweep_interval = config.maintenance.sweep_interval;

    let service = CodeService::connect(config)
        .await
        .context("Container engine unavailable")?;
    info!("Languages: {:?}", service.languages());

    let maintenance = spawn_maintenance(service.clone(), sweep_interval);
    let app = codeforge::api::router(service.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    if let Err(e) = service.shutdown().await {
        warn!("Shutdown sweep failed: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
