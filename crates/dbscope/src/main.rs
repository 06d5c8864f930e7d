//! dbscope: read-only database introspection served over stdio.
//!
//! Connects to one configured database at startup and exposes scan, sample,
//! query and describe tools as JSON-RPC over stdin/stdout. Logs go to stderr.

mod config;
#[cfg(test)]
mod fake;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "dbscope", version, about = "Read-only database introspection over stdio")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml", env = "DBSCOPE_CONFIG")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "dbscope=debug,dbscope_connectors=debug"
    } else {
        "dbscope=info,dbscope_connectors=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::load(&cli.config)?;
    let descriptor = config.database.connection_descriptor()?;
    let connector = dbscope_connectors::create(&config.database.db_type, &descriptor)
        .await
        .context("Failed to create connector")?;
    info!(dialect = %connector.dialect(), "Connected, serving on stdio");

    let served = server::serve(connector.clone(), tokio::io::stdin(), tokio::io::stdout()).await;

    connector.close().await?;
    info!("Shut down");
    served
}
