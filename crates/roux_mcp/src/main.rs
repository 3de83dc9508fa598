//! MCP server binary: vault setup, then the stdio serve loop.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "roux_mcp", about = "Roux knowledge-graph MCP server")]
struct Cli {
    /// Vault root. Defaults to the current directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Config file. Defaults to <root>/roux.yaml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    // stdout is the JSON-RPC wire; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    tracing::info!("Roux MCP server starting in {:?}", root);

    let config = match cli.config {
        Some(path) => roux_config::Config::load_from(&root, &path)?,
        None => roux_config::Config::load(&root)?,
    };

    let embedder = build_embedder(&config);
    let core = roux_core::RouxCore::open(config, embedder)?;

    let rt = Runtime::new().expect("Failed to create Tokio runtime");

    // Wire the watcher; a failure degrades to query-only freshness and is
    // retried on the next write.
    if let Err(e) = rt.block_on(core.start_watching(Arc::new(|ids: Vec<String>| {
        tracing::debug!(changed = ids.len(), "reconcile committed");
    }))) {
        tracing::warn!("file watcher unavailable: {}", e);
    }

    roux_mcp::run_stdio_loop(&core, &rt)?;

    tracing::info!("Roux MCP server shutting down");
    Ok(())
}

#[cfg(feature = "embeddings")]
fn build_embedder(config: &roux_config::Config) -> Option<Arc<dyn roux_core::Embedder>> {
    if config.providers.embedding.is_none() {
        return None;
    }
    if let Err(e) = roux_core::LocalEmbedder::warm_up() {
        tracing::warn!("embedding model unavailable, semantic tools hidden: {}", e);
        return None;
    }
    Some(Arc::new(roux_core::LocalEmbedder))
}

#[cfg(not(feature = "embeddings"))]
fn build_embedder(_config: &roux_config::Config) -> Option<Arc<dyn roux_core::Embedder>> {
    None
}
