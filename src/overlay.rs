//! Overlay network: one persistent TCP link per neighbor.
//!
//! ```text
//!            accept loop  ◀── links from smaller-id neighbors
//!   Overlay ─┤
//!            connect tasks ──▶ links to larger-id neighbors
//!
//!   per link:  reader task ── Packet ──▶ mpsc ──▶ network layer
//!              LinkWriter  ◀── send / broadcast
//! ```
//!
//! Each pair of neighbors shares exactly one link: the node with the larger
//! id listens and the smaller one connects. A connecting socket binds to its
//! own address first so the listener can tell who it is from the peer
//! address alone.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::codec::{self, FrameDecoder};
use crate::config::NodeConfig;
use crate::id::NodeId;
use crate::neighbor_table::{LinkWriter, NeighborTable};
use crate::packet::{Packet, PacketError, MAX_PAYLOAD, PACKET_HEADER_LEN};
use crate::state::wait_until;
use crate::topology::Topology;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("overlay I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("node {0} is not a neighbor")]
    UnknownNeighbor(NodeId),
    #[error("link to neighbor {0} is down")]
    NotConnected(NodeId),
    #[error("only {up} of {want} neighbor links came up")]
    LinksTimeout { up: usize, want: usize },
}

struct OverlayShared {
    me: NodeId,
    local: IpAddr,
    port: u16,
    neighbors: Mutex<NeighborTable>,
    /// Number of live links.
    up: watch::Sender<usize>,
    inbound: mpsc::Sender<Packet>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OverlayShared {
    fn table(&self) -> MutexGuard<'_, NeighborTable> {
        self.neighbors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn detach(&self, id: NodeId, generation: u64) {
        let connected = {
            let mut table = self.table();
            if !table.detach(id, generation) {
                return;
            }
            table.connected()
        };
        self.up.send_replace(connected);
        log::warn!("[on] link to neighbor {id} is down");
    }

    fn install(self: &Arc<Self>, id: NodeId, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[on] set_nodelay failed for neighbor {id}: {e}");
        }
        let (read, write) = stream.into_split();
        let attached = {
            let mut table = self.table();
            table
                .attach(id, Arc::new(AsyncMutex::new(write)))
                .map(|generation| (generation, table.connected()))
        };
        let Some((generation, connected)) = attached else {
            log::warn!("[on] refusing link from non-neighbor {id}");
            return;
        };
        self.up.send_replace(connected);
        log::info!("[on] link to neighbor {id} is up ({connected} live)");

        let task = tokio::spawn(read_link(Arc::clone(self), id, generation, read));
        self.track(task);
    }

    async fn write_to(&self, id: NodeId, generation: u64, link: LinkWriter, body: &[u8]) -> Result<(), OverlayError> {
        let mut writer = link.lock().await;
        if let Err(e) = codec::write_frame(&mut *writer, body).await {
            drop(writer);
            self.detach(id, generation);
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_link(shared: Arc<OverlayShared>, id: NodeId, generation: u64, read: OwnedReadHalf) {
    let mut reader = BufReader::new(read);
    let mut decoder = FrameDecoder::new(Packet::expected_len, PACKET_HEADER_LEN + MAX_PAYLOAD);
    loop {
        match codec::read_frame(&mut reader, &mut decoder).await {
            Ok(Some(body)) => match Packet::decode(&body) {
                Ok(pkt) => {
                    if shared.inbound.send(pkt).await.is_err() {
                        log::debug!("[on] network layer gone; closing link to {id}");
                        break;
                    }
                }
                Err(e) => log::debug!("[on] dropping bad packet from {id}: {e}"),
            },
            Ok(None) => {
                log::info!("[on] neighbor {id} closed the link");
                break;
            }
            Err(e) => {
                log::warn!("[on] read from neighbor {id} failed: {e}");
                break;
            }
        }
    }
    shared.detach(id, generation);
}

async fn accept_loop(shared: Arc<OverlayShared>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("[on] accept failed: {e}");
                continue;
            }
        };
        let id = NodeId::from_ip(peer.ip());
        let expected = id < shared.me && shared.table().contains(id);
        if !expected {
            log::warn!("[on] rejecting unexpected link from {peer}");
            continue;
        }
        shared.install(id, stream);
    }
}

async fn connect_to(shared: Arc<OverlayShared>, id: NodeId, addr: IpAddr, attempts: u32, retry: Duration) {
    let target = SocketAddr::new(addr, shared.port);
    for attempt in 1..=attempts {
        match dial(shared.local, target).await {
            Ok(stream) => {
                shared.install(id, stream);
                return;
            }
            Err(e) => log::debug!("[on] connect to {id} at {target} failed (attempt {attempt}): {e}"),
        }
        tokio::time::sleep(retry).await;
    }
    log::warn!("[on] giving up on neighbor {id} after {attempts} attempts");
}

async fn dial(local: IpAddr, target: SocketAddr) -> io::Result<TcpStream> {
    let socket = match local {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(local, 0))?;
    socket.connect(target).await
}

/// Handle to a running overlay.
pub struct Overlay {
    shared: Arc<OverlayShared>,
    local_addr: SocketAddr,
}

impl Overlay {
    /// Listen for links from smaller-id neighbors, start dialing larger-id
    /// ones, and forward every received packet to `inbound`.
    pub async fn start(
        topology: &Topology,
        config: &NodeConfig,
        inbound: mpsc::Sender<Packet>,
    ) -> Result<Self, OverlayError> {
        let me = topology.me();
        let local = topology.local_addr();
        let listener = TcpListener::bind((local, config.overlay_port)).await?;
        let local_addr = listener.local_addr()?;
        log::info!("[on] node {me} listening on {local_addr}");

        let shared = Arc::new(OverlayShared {
            me,
            local,
            port: local_addr.port(),
            neighbors: Mutex::new(NeighborTable::new(topology)),
            up: watch::channel(0).0,
            inbound,
            tasks: Mutex::new(Vec::new()),
        });

        shared.track(tokio::spawn(accept_loop(Arc::clone(&shared), listener)));

        let to_dial: Vec<(NodeId, IpAddr)> = {
            let table = shared.table();
            table
                .ids()
                .filter(|&id| id > me)
                .filter_map(|id| table.addr(id).map(|addr| (id, addr)))
                .collect()
        };
        for (id, addr) in to_dial {
            let task = tokio::spawn(connect_to(
                Arc::clone(&shared),
                id,
                addr,
                config.connect_attempts,
                config.connect_retry_interval,
            ));
            shared.track(task);
        }

        Ok(Self { shared, local_addr })
    }

    pub fn me(&self) -> NodeId {
        self.shared.me
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `pkt` over the link to neighbor `next_hop`. A broadcast
    /// `next_hop` goes to every live neighbor, as [`broadcast`](Self::broadcast).
    pub async fn send(&self, next_hop: NodeId, pkt: &Packet) -> Result<(), OverlayError> {
        if next_hop.is_broadcast() {
            return self.broadcast(pkt).await.map(|_| ());
        }
        let body = pkt.encode()?;
        let link = {
            let table = self.shared.table();
            if !table.contains(next_hop) {
                return Err(OverlayError::UnknownNeighbor(next_hop));
            }
            table.link(next_hop)
        };
        let (generation, writer) = link.ok_or(OverlayError::NotConnected(next_hop))?;
        self.shared.write_to(next_hop, generation, writer, &body).await
    }

    /// Send `pkt` to every live neighbor. Returns how many links took it.
    pub async fn broadcast(&self, pkt: &Packet) -> Result<usize, OverlayError> {
        let body = pkt.encode()?;
        let live = self.shared.table().live();
        let mut delivered = 0;
        for (id, generation, writer) in live {
            match self.shared.write_to(id, generation, writer, &body).await {
                Ok(()) => delivered += 1,
                Err(e) => log::debug!("[on] broadcast to {id} failed: {e}"),
            }
        }
        Ok(delivered)
    }

    pub fn connected_neighbors(&self) -> Vec<NodeId> {
        self.shared.table().live().into_iter().map(|(id, _, _)| id).collect()
    }

    /// Wait until every neighbor link is up.
    pub async fn wait_for_links(&self, limit: Duration) -> Result<(), OverlayError> {
        let want = self.shared.table().len();
        let mut rx = self.shared.up.subscribe();
        match wait_until(&mut rx, Some(limit), |up| *up >= want).await {
            Some(_) => Ok(()),
            None => Err(OverlayError::LinksTimeout {
                up: *self.shared.up.borrow(),
                want,
            }),
        }
    }

    /// Stop every task and drop every link.
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.shared.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.shared.table().detach_all();
        self.shared.up.send_replace(0);
        log::info!("[on] node {} overlay stopped", self.shared.me);
    }
}
