//! Feature Store - batch feature derivation and lookup service
//!
//! Entry point for the `feature-store` binary: serves the lookup API with an
//! initial (and optionally periodic) batch pass, runs a single pass, or
//! creates an empty warehouse schema.

use anyhow::Context;
use clap::{Parser, Subcommand};
use feature_store_core::{
    api::{ApiServer, ApiServerConfig},
    warehouse::schema::create_warehouse,
    FeatureStoreConfig, FeatureStoreContext,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feature-store")]
#[command(about = "Batch feature derivation over a relational warehouse", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, env = "FEATURE_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Warehouse database path (overrides the configuration file)
    #[arg(long, env = "FEATURE_STORE_WAREHOUSE")]
    warehouse: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch pass, then serve the lookup API until interrupted
    Serve {
        /// Server address (overrides the configuration file)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },

    /// Run a single batch pass and print its report as JSON
    Batch,

    /// Create an empty warehouse schema
    InitWarehouse {
        /// Database path (defaults to the configured warehouse)
        path: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<FeatureStoreConfig> {
    let mut config = match &cli.config {
        Some(path) => FeatureStoreConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FeatureStoreConfig::default(),
    };

    if let Some(warehouse) = &cli.warehouse {
        config.warehouse.path = warehouse.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn serve(config: FeatureStoreConfig, addr: Option<SocketAddr>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let context = Arc::new(FeatureStoreContext::from_config(&config, cancel.clone()).await?);

    // Startup pass; lookups before it finishes see an empty discovery list
    let engine = context.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.run_batch_pass().await {
            error!("Startup batch pass failed: {}", e);
        }
    });

    let scheduler = context.scheduler(&config);
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let api_config = ApiServerConfig {
        addr: addr.unwrap_or(config.server.addr),
    };
    let server = ApiServer::new(api_config, context.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping feature store gracefully...");
        }
        shutdown.cancel();
    });

    server.serve(cancel.clone()).await?;

    context.shutdown().await?;
    let _ = scheduler_handle.await;
    info!("Feature store shut down complete");
    Ok(())
}

async fn batch(config: FeatureStoreConfig) -> anyhow::Result<()> {
    let context = FeatureStoreContext::from_config(&config, CancellationToken::new()).await?;

    let result = context.engine.run_batch_pass().await;
    context.shutdown().await?;

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Use the requested level for our crates; keep HTTP tracing one notch quieter
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "feature_store={level},feature_store_core={level},tower_http=warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Feature store v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { addr } => serve(config, addr).await,
        Commands::Batch => batch(config).await,
        Commands::InitWarehouse { path } => {
            let path = path.unwrap_or_else(|| config.warehouse.path.clone());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            create_warehouse(&path)?;
            println!("✓ Warehouse initialized: {}", path.display());
            Ok(())
        }
    }
}
