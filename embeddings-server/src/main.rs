use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use strata_embeddings::{EmbeddingsConfig, EmbeddingsService};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Serve embedding generation and similarity search over HTTP.
#[derive(Debug, Parser)]
#[command(name = "strata-embeddings-server", version)]
struct Cli {
    /// TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8088")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EmbeddingsConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EmbeddingsConfig::default(),
    };

    let service = Arc::new(EmbeddingsService::new(config).context("failed to start service")?);
    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    strata_embeddings_server::serve(listener, service).await?;
    Ok(())
}
