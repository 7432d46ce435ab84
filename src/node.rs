//! One overlay node: overlay links, routing state and the network tasks,
//! wired together and started as a unit.
//!
//! ```text
//!   transport ══ hand-off stream ══▶ Network ──▶ Overlay ══ TCP ══▶ neighbors
//!                                       ▲            │
//!                                       └── mpsc ────┘  packet handler
//!                                                       route daemon
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::id::NodeId;
use crate::network::{self, Network, NetworkError};
use crate::overlay::Overlay;
use crate::routing::RoutingContext;
use crate::state::wait_until;
use crate::topology::Topology;

/// Packets queued between the overlay readers and the packet handler.
const INBOUND_QUEUE: usize = 1024;

/// Buffer size of an in-process transport hand-off stream.
const HAND_OFF_BUF: usize = 64 * 1024;

pub struct Node {
    topology: Topology,
    network: Arc<Network>,
    overlay: Arc<Overlay>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bring up the overlay and start the packet handler and route daemon.
    pub async fn start(topology: Topology, config: NodeConfig) -> Result<Self, NetworkError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let overlay = Arc::new(Overlay::start(&topology, &config, inbound_tx).await?);
        let routing = Arc::new(RoutingContext::new(&topology));

        log::info!("[snp] node {} starting\n{}", topology.me(), routing.neighbor_costs());
        log::info!("[snp] {}", routing.dv_table());
        log::info!("[snp] {}", routing.routing_table());

        let network = Arc::new(Network::new(routing, Arc::clone(&overlay)));
        let tasks = vec![
            tokio::spawn(network::packet_loop(Arc::clone(&network), inbound_rx)),
            tokio::spawn(network::route_daemon(Arc::clone(&network), config.route_update_interval)),
        ];

        Ok(Self {
            topology,
            network,
            overlay,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn me(&self) -> NodeId {
        self.network.me()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn routing(&self) -> &RoutingContext {
        self.network.routing()
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn overlay_addr(&self) -> SocketAddr {
        self.overlay.local_addr()
    }

    /// Neighbors whose overlay link is currently up.
    pub fn connected_neighbors(&self) -> Vec<NodeId> {
        self.overlay.connected_neighbors()
    }

    pub async fn wait_for_links(&self, limit: Duration) -> Result<(), NetworkError> {
        Ok(self.overlay.wait_for_links(limit).await?)
    }

    /// Wait until this node has a route to every other node. Wakes on each
    /// routing change instead of polling.
    pub async fn wait_for_routes(&self, limit: Duration) -> bool {
        let others: Vec<NodeId> = self.topology.nodes().into_iter().filter(|&n| n != self.me()).collect();
        let routing = self.routing();
        let mut rx = routing.subscribe();
        wait_until(&mut rx, Some(limit), |_| others.iter().all(|&n| routing.next_hop(n).is_some()))
            .await
            .is_some()
    }

    /// Attach an in-process transport. Hand the returned stream to
    /// [`SrtClient::new`](crate::client::SrtClient::new) or
    /// [`SrtServer::new`](crate::server::SrtServer::new).
    pub fn attach_transport(&self) -> DuplexStream {
        let (ours, theirs) = tokio::io::duplex(HAND_OFF_BUF);
        let task = tokio::spawn(Arc::clone(&self.network).serve_transport(ours));
        self.track(task);
        theirs
    }

    /// Accept transport connections over TCP on `addr`. Returns the bound
    /// address.
    pub async fn listen_transport(&self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        log::info!("[snp] node {} accepting transports on {bound}", self.me());

        let network = Arc::clone(&self.network);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("[snp] transport connected from {peer}");
                        if let Err(e) = stream.set_nodelay(true) {
                            log::debug!("[snp] set_nodelay failed: {e}");
                        }
                        tokio::spawn(Arc::clone(&network).serve_transport(stream));
                    }
                    Err(e) => log::warn!("[snp] transport accept failed: {e}"),
                }
            }
        });
        self.track(task);
        Ok(bound)
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Stop every task of this node and close its overlay links.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        self.overlay.shutdown();
        log::info!("[snp] node {} stopped", self.me());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
