//! tether - long-poll bridge between a tool dispatcher and a studio plugin
//!
//! Subcommands:
//! - `tether serve` - Run the bridge HTTP server
//! - `tether config` - Print the effective configuration
//! - `tether status` - Query a running bridge

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tether::{commands, serve, telemetry};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Request correlation bridge for studio plugins")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./tether.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server
    Serve {
        /// HTTP port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// OTLP gRPC endpoint for OpenTelemetry (e.g., "localhost:4317")
        #[arg(long)]
        otlp_endpoint: Option<String>,
    },

    /// Show the effective configuration and its sources
    Config,

    /// Query a running bridge's status
    Status {
        /// Base URL of the bridge
        #[arg(short, long, default_value = "http://127.0.0.1:3002")]
        url: String,

        /// Timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            otlp_endpoint,
        } => {
            let mut config = tetherconf::TetherConfig::load_from(cli.config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(port) = port {
                config.infra.bind.http_port = port;
            }
            if let Some(host) = host {
                config.infra.bind.host = host;
            }
            if let Some(endpoint) = otlp_endpoint {
                config.infra.telemetry.otlp_endpoint = endpoint;
            }

            telemetry::init(&config.infra.telemetry)?;
            serve::run(config).await?;
        }
        Commands::Config => {
            commands::show_config(cli.config.as_deref())?;
        }
        Commands::Status { url, timeout } => {
            telemetry::init_console("warn");
            commands::status(&url, timeout).await?;
        }
    }

    Ok(())
}
