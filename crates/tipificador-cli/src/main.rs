//! Tipificador service entry point.
//!
//! Two commands: `serve` runs the HTTP API, `sweep` performs a one-shot
//! removal of expired scratch directories (useful from cron on hosts where
//! the service itself is not running continuously).

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tipificador::ServiceConfig;
use tipificador::api::{AppState, serve};
use tipificador::ocr::TesseractCli;
use tipificador::pdf::PdfiumEngine;
use tracing_subscriber::EnvFilter;

/// Clinical invoice page classification service
#[derive(Parser)]
#[command(name = "tipificador")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0")
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },

    /// Remove expired job scratch directories and exit
    Sweep,
}

fn build_state(config: ServiceConfig) -> Result<AppState> {
    let blob = config.blob_root.clone().map(|root| {
        Arc::new(tipificador::blob::FsBlobStore::new(root, config.blob_prefix.clone()))
            as Arc<dyn tipificador::blob::BlobStore>
    });
    AppState::new(
        config,
        Arc::new(PdfiumEngine::new()),
        Arc::new(TesseractCli::new()),
        blob,
    )
    .context("failed to initialise service state")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env();

    match cli.command {
        Commands::Serve { host, port } => {
            let state = build_state(config)?;
            serve(state, &host, port).await.with_context(|| {
                format!(
                    "failed to start API server on {host}:{port}. Ensure the port is free and the address is bindable."
                )
            })?;
        }
        Commands::Sweep => {
            let ttl = std::time::Duration::from_secs(config.job_ttl_seconds);
            let store = tipificador::store::ScratchStore::new(config.job_root.clone())
                .context("failed to open scratch root")?;
            store.sweep_expired(ttl);
            tracing::info!("sweep complete");
        }
    }

    Ok(())
}
