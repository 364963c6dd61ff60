use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, info, warn};

use super::bootstrap::BootstrapOptions;
use super::config::DhtConfig;
use super::engine::{Dht, DhtChannels, DhtEvent};
use super::error::DhtError;
use super::handler::{QueryHandler, ReferenceHandler};
use super::node::NodeId;

// Upper bound on how long the loop sleeps before re-checking deadlines, so
// a transaction registered mid-sleep with a short timeout is not missed.
const MAX_TIMER_SLACK: Duration = Duration::from_secs(1);

/// Drives a [`Dht`] over a UDP socket.
///
/// `run` is the single task that owns the transport: it feeds inbound
/// datagrams to the engine, sends what the engine queues, answers queries
/// through the [`QueryHandler`], and fires transaction deadlines. Lookups
/// and bootstraps run on other tasks through [`DhtServer::dht`].
///
/// # Examples
///
/// ```no_run
/// use rdht::dht::{DhtConfig, DhtServer, NodeId};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Arc::new(DhtServer::bind("0.0.0.0:6881", DhtConfig::default()).await?);
///
/// let runner = server.clone();
/// tokio::spawn(async move { runner.run().await });
///
/// server.bootstrap().await?;
///
/// let dht = server.dht();
/// let peers = dht.get_peers(NodeId([0u8; 20]), dht.lookup_options()).await;
/// # Ok(())
/// # }
/// ```
pub struct DhtServer {
    socket: UdpSocket,
    dht: Arc<Dht>,
    handler: Arc<dyn QueryHandler>,
    channels: Mutex<Option<DhtChannels>>,
    local_addr: SocketAddr,
}

impl DhtServer {
    pub async fn bind(addr: impl ToSocketAddrs, config: DhtConfig) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let handler = Arc::new(ReferenceHandler::new(config.token_rotation));
        let (dht, channels) = Dht::new(config);

        info!("DHT server bound to {} with id {}", local_addr, dht.our_id());

        Ok(Self {
            socket,
            dht: Arc::new(dht),
            handler,
            channels: Mutex::new(Some(channels)),
            local_addr,
        })
    }

    /// Replaces the reference query handler.
    pub fn with_handler(mut self, handler: Arc<dyn QueryHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dht(&self) -> &Arc<Dht> {
        &self.dht
    }

    /// Bootstraps from the configured rendezvous nodes. Succeeds if at
    /// least one of them answers.
    pub async fn bootstrap(&self) -> Result<usize, DhtError> {
        info!("Starting DHT bootstrap");
        let mut last_err = DhtError::Timeout;

        for host in &self.dht.config().bootstrap_nodes {
            let seed = match tokio::net::lookup_host(host.as_str()).await {
                Ok(mut addrs) => match addrs.find(SocketAddr::is_ipv4) {
                    Some(addr) => addr,
                    None => continue,
                },
                Err(e) => {
                    warn!("Failed to resolve bootstrap node {}: {}", host, e);
                    continue;
                }
            };

            match self.dht.bootstrap(seed, BootstrapOptions::default()).await {
                Ok(count) => return Ok(count),
                Err(e) => {
                    debug!("Bootstrap via {} ({}) failed: {}", host, seed, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Runs the transport loop. Only the first call gets the engine's
    /// channels; later calls return `DhtError::Closed`.
    pub async fn run(&self) -> Result<(), DhtError> {
        let DhtChannels {
            mut outgoing,
            mut events,
        } = self.channels.lock().take().ok_or(DhtError::Closed)?;

        let mut buf = vec![0u8; 65535];
        let mut maintenance = tokio::time::interval(self.dht.config().maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        maintenance.tick().await;

        loop {
            let now = Instant::now();
            let wake = self
                .dht
                .next_deadline()
                .map_or(now + MAX_TIMER_SLACK, |d| d.min(now + MAX_TIMER_SLACK));

            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, addr) = result?;
                    if let Err(e) = self.dht.recv_message(&buf[..n], addr, Instant::now()) {
                        debug!("Failed to handle DHT message from {}: {}", addr, e);
                    }
                }
                Some(out) = outgoing.recv() => {
                    if let Err(e) = self.socket.send_to(&out.data, out.addr).await {
                        debug!("Failed to send DHT message to {}: {}", out.addr, e);
                    }
                }
                Some(event) = events.recv() => {
                    self.handle_event(event);
                }
                _ = tokio::time::sleep_until(wake.into()) => {
                    self.dht.expire(Instant::now());
                }
                _ = maintenance.tick() => {
                    self.maintain();
                }
            }
        }
    }

    fn handle_event(&self, event: DhtEvent) {
        match event {
            DhtEvent::Query(query) => {
                let payload = self.handler.handle(&self.dht, query.record());
                if let Err(e) = query.respond(payload) {
                    debug!("Failed to queue DHT response: {}", e);
                }
            }
            DhtEvent::Unassociated {
                transaction_id,
                from,
                kind,
            } => {
                debug!(
                    "Ignoring unassociated {:?} from {} ({} byte transaction id)",
                    kind,
                    from,
                    transaction_id.len()
                );
            }
        }
    }

    fn maintain(&self) {
        let now = Instant::now();
        let table = self.dht.routing_table();

        let demoted = table.refresh_statuses(now);
        if demoted > 0 {
            debug!("{} DHT nodes became questionable", demoted);
        }

        self.handler.maintain(now);

        let stale = table.stale_buckets(now);
        if stale.is_empty() {
            return;
        }

        debug!("Refreshing {} stale DHT buckets", stale.len());
        let dht = self.dht.clone();
        tokio::spawn(async move {
            for bucket_idx in stale {
                let target = id_in_bucket(dht.our_id(), bucket_idx);
                dht.find_node(target).await;
            }
        });
    }
}

/// A random id sharing exactly `bucket_idx` leading bits with `our_id`.
pub fn id_in_bucket(our_id: &NodeId, bucket_idx: usize) -> NodeId {
    if bucket_idx >= 160 {
        return NodeId::generate();
    }

    let mut id = NodeId::generate().0;
    let (byte_idx, bit) = (bucket_idx / 8, bucket_idx % 8);

    // Copy the shared prefix, then force the first differing bit.
    id[..byte_idx].copy_from_slice(&our_id.0[..byte_idx]);
    let prefix_mask = 0xFFu8.checked_shl(8 - bit as u32).unwrap_or(0);
    let flip = 0x80u8 >> bit;
    id[byte_idx] = (our_id.0[byte_idx] & prefix_mask)
        | (!our_id.0[byte_idx] & flip)
        | (id[byte_idx] & !(prefix_mask | flip));

    NodeId(id)
}
