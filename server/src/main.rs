use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use fuse_core::embedding::HashingEmbedder;
use fuse_core::SearchConfig;
use fuse_server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// JSON search config
    #[arg(long)]
    config: Option<PathBuf>,
    /// Embedding dimension the index was built with
    #[arg(long, default_value_t = 384)]
    dimension: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SearchConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    let app: Router = build_app(&args.index, Arc::new(HashingEmbedder::new(args.dimension)), config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
