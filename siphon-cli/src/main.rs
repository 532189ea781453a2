//! Siphon CLI

mod gateway;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use siphon_config::{load_config, LoggingSettings};
use siphon_runtime::SignalHandler;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "siphon")]
#[command(about = "Siphon gzip-compressing reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the gateway (start the server)
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "SIPHON_CONFIG", default_value = "siphon.yaml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error), overrides the config file
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, env = "SIPHON_CONFIG", default_value = "siphon.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            let path = config;
            let config = load_config(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;

            let mut logging = config.logging.clone();
            if let Some(level) = log_level {
                logging.level = level;
            }
            init_tracing(&logging)?;

            tracing::info!(config = %path.display(), "Starting Siphon");
            tracing::info!(
                listen = %config.server.listen,
                upstream = %config.proxy.target.url,
                gzip = config.gzip.enabled,
                "Configuration loaded"
            );

            let server = gateway::build_server(&config)?;

            let shutdown_signal = server.shutdown_signal();
            tokio::spawn(async move {
                if let Err(e) = SignalHandler::new(shutdown_signal).run().await {
                    tracing::error!("Failed to install signal handlers: {}", e);
                }
            });

            server.run().await?;
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.server.listen);
                    tracing::info!("  Upstream: {}", cfg.proxy.target()?);
                    tracing::info!("  Gzip: {}", if cfg.gzip.enabled { "on" } else { "off" });
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Siphon");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    let level: tracing::Level = logging
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", logging.level))?;

    let text = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_level(true)
    });
    let json = logging.json.then(|| tracing_subscriber::fmt::layer().json());

    tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}
