//! QuizTone Duel Server
//!
//! Authoritative arbitration server for QuizTone sound-quiz duels.
//! Accepts line-protocol clients, brokers invites and verdicts, and
//! persists accounts and match records when a store path is set.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quiztone::network::server::{DuelServer, ServerConfig};
use quiztone::store::MemoryStore;
use quiztone::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quiztone=info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("QuizTone duel server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!(
        "Match start lead: {} ms",
        config.match_start_lead.as_millis()
    );

    let store = match &config.store_path {
        Some(path) => {
            info!("Store file: {}", path.display());
            Arc::new(MemoryStore::load(path).context("failed to load user store")?)
        }
        None => {
            info!("No store file configured, accounts are in-memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let server = DuelServer::new(config, store);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown.send(());
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}
