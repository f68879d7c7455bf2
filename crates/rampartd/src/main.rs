//! rampartd — the v8 protocol listening server.
//!
//! One TCP listener, one crypto session per connection. Ctrl-C broadcasts
//! a shutdown notice to every established client before the process exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rampart_core::config::RampartConfig;
use rampart_server::{connection, Processor};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug cargo run -p rampartd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RampartConfig::load().context("loading configuration")?;
    let keypair = config.keys.keypair().context("decoding server key")?;
    tracing::info!(
        listen = %config.network.listen_addr,
        public_key = hex::encode(keypair.public),
        "rampartd starting"
    );

    let listener = TcpListener::bind(&config.network.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.network.listen_addr))?;

    let (shutdown_tx, _) = broadcast::channel::<i32>(1);
    let connections: Arc<DashMap<u64, std::net::SocketAddr>> = Arc::new(DashMap::new());
    let next_id = AtomicU64::new(0);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                tracing::info!(conn = id, peer = %peer_addr, "connection accepted");

                let processor = Processor::new(keypair.clone());
                let shutdown_rx = shutdown_tx.subscribe();
                let connections = connections.clone();
                connections.insert(id, peer_addr);
                tokio::spawn(async move {
                    match connection::serve(stream, processor, shutdown_rx).await {
                        Ok(()) => tracing::info!(conn = id, "connection closed"),
                        Err(e) => tracing::warn!(conn = id, error = %e, "connection ended with error"),
                    }
                    connections.remove(&id);
                });
            }

            _ = tokio::signal::ctrl_c() => {
                let notice = config.network.shutdown_notice_secs;
                tracing::info!(
                    connections = connections.len(),
                    notice_secs = notice,
                    "shutdown requested, notifying clients"
                );
                let _ = shutdown_tx.send(notice);
                break;
            }
        }
    }

    // Let connection tasks flush their shutdown notices before exiting.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    tracing::info!("rampartd stopped");
    Ok(())
}
