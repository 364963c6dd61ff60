//! Runs a DHT node on UDP port 40000, bootstraps from the public routers
//! and looks up peers for a couple of well-known info hashes.
//!
//! ```text
//! RUST_LOG=rdht=debug cargo run --example node
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rdht::dht::{DhtConfig, DhtServer, LookupStrategy, NodeId};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

const INFO_HASHES: &[&str] = &[
    "e3811b9539cacff680e418124272177c47477157",
    "597a92f6eeed29e6028b70b416c847e51ba76c38",
];

#[tokio::main]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let config = DhtConfig {
        lookup_strategy: LookupStrategy::Iterative { retries: 5 },
        query_timeout: Duration::from_secs(10),
        ..DhtConfig::default()
    };

    let server = match DhtServer::bind("0.0.0.0:40000", config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to bind DHT socket: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting up; node id is {} and we have {} nodes",
        server.dht().our_id(),
        server.dht().count_nodes()
    );

    let runner = server.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!("DHT server stopped: {}", e);
        }
    });

    if server.dht().count_nodes() == 0 {
        info!("Bootstrapping because we have no nodes");
        match server.bootstrap().await {
            Ok(count) => info!("Bootstrapped, we now have {} nodes", count),
            Err(e) => {
                error!("Bootstrap failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let dht = server.dht();
    let searches = INFO_HASHES.iter().filter_map(|hex| {
        let info_hash: NodeId = hex.parse().ok()?;
        Some(async move {
            info!("Searching for peers for {}", info_hash);
            let peers = dht.get_peers(info_hash, dht.lookup_options()).await;
            info!("Got {} peers for {}", peers.len(), info_hash);
        })
    });
    join_all(searches).await;

    for entry in server.dht().nodes() {
        info!("{} {} {:?}", entry.id, entry.addr, entry.status());
    }
}
