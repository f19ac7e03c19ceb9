//! Model router: keeps the routing tables current and serves introspection.
//!
//! Watch events from the cluster watcher are applied to the store; until
//! a watcher is attached, `bootstrap_events` seeds it from a file.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use model_router::store::parse_event_lines;
use model_router::{debug, Datastore, PluginRegistry, Router, RouterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RouterConfig::from_env().context("loading configuration")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!(debug_listen = %config.debug_listen, "model-router starting");

    let registry = Arc::new(PluginRegistry::with_builtin());
    let store = Arc::new(
        Datastore::new(registry, config.default_plugins.clone())
            .context("activating default scheduler plugins")?,
    );
    let router = Arc::new(Router::new(Arc::clone(&store)));

    let (events_tx, events_rx) = mpsc::channel(1024);
    let ingest = tokio::spawn(Arc::clone(&store).run(events_rx));

    if let Some(path) = &config.bootstrap_events {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading bootstrap events from {}", path.display()))?;
        for (line, parsed) in parse_event_lines(&text) {
            match parsed {
                Ok(event) => {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(line, error = %e, "skipping bootstrap event"),
            }
        }
    }

    let server = tokio::spawn(debug::start_debug_server(config.debug_listen, Arc::clone(&router)));

    tokio::select! {
        result = server => {
            result.context("debug server task")?.context("debug server")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            tracing::info!("shutting down");
        }
    }

    drop(events_tx);
    join_ingestion(ingest).await;
    tracing::info!(stats = ?router.stats(), "model-router stopped");
    Ok(())
}

/// Waits for the ingestion task, reporting a panic or cancellation.
async fn join_ingestion(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, panicked = e.is_panic(), "event ingestion task failed");
            false
        }
    }
}
