//! Network layer (SNP): packet forwarding and distance-vector routing.
//!
//! Two long-lived tasks run per node:
//!
//! - the **packet handler** drains packets arriving from the overlay. Route
//!   updates feed the [`RoutingContext`]; DATA packets for this node are
//!   handed to the local transport, everything else is forwarded to the next
//!   hop unchanged.
//! - the **route daemon** broadcasts this node's distance vector to every
//!   neighbor at a fixed interval.
//!
//! The local transport attaches over a hand-off stream (see
//! [`crate::socket`]); segments it writes are wrapped in packets and routed.
//! Packets with no known route are dropped and logged. There is no TTL;
//! converged shortest paths are the only loop protection.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::id::NodeId;
use crate::overlay::{Overlay, OverlayError};
use crate::packet::{Packet, PacketType, RouteUpdate};
use crate::routing::RoutingContext;
use crate::socket::{self, SegmentWriter};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("no route to node {0}")]
    NoRoute(NodeId),
    #[error("network I/O error: {0}")]
    Io(#[from] io::Error),
}

pub struct Network {
    me: NodeId,
    routing: Arc<RoutingContext>,
    overlay: Arc<Overlay>,
    transport: Mutex<Option<(u64, SegmentWriter)>>,
    next_transport: AtomicU64,
}

impl Network {
    pub fn new(routing: Arc<RoutingContext>, overlay: Arc<Overlay>) -> Self {
        Self {
            me: routing.me(),
            routing,
            overlay,
            transport: Mutex::new(None),
            next_transport: AtomicU64::new(0),
        }
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    pub fn routing(&self) -> &RoutingContext {
        &self.routing
    }

    fn transport(&self) -> MutexGuard<'_, Option<(u64, SegmentWriter)>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn handle_packet(&self, pkt: Packet) {
        match pkt.kind {
            PacketType::RouteUpdate => match RouteUpdate::decode(&pkt.payload) {
                Ok(update) => {
                    if self.routing.apply_update(pkt.src, &update) {
                        log::info!("[snp] routes changed\n{}", self.routing.routing_table());
                    }
                }
                Err(e) => log::debug!("[snp] bad route update from {}: {e}", pkt.src),
            },
            PacketType::Data if pkt.dest == self.me => self.deliver(pkt.src, &pkt.payload).await,
            PacketType::Data => {
                let (src, dest) = (pkt.src, pkt.dest);
                if let Err(e) = self.forward(&pkt).await {
                    log::debug!("[snp] dropping packet {src} → {dest}: {e}");
                }
            }
        }
    }

    /// Hand a segment that reached this node to the local transport.
    async fn deliver(&self, src: NodeId, segment: &[u8]) {
        let writer = self.transport().as_ref().map(|(_, w)| w.clone());
        let Some(writer) = writer else {
            log::debug!("[snp] no transport attached; dropping segment from {src}");
            return;
        };
        if let Err(e) = writer.send_bytes(src, segment).await {
            log::warn!("[snp] delivery to transport failed: {e}");
        }
    }

    /// Send `pkt` one hop closer to its destination.
    pub async fn forward(&self, pkt: &Packet) -> Result<(), NetworkError> {
        let hop = self.routing.next_hop(pkt.dest).ok_or(NetworkError::NoRoute(pkt.dest))?;
        self.overlay.send(hop, pkt).await?;
        log::debug!("[snp] {} → {} via {}", pkt.src, pkt.dest, hop);
        Ok(())
    }

    /// Route one encoded segment from the local transport to `dest`.
    pub async fn send_segment(&self, dest: NodeId, segment: Vec<u8>) -> Result<(), NetworkError> {
        if dest == self.me {
            self.deliver(self.me, &segment).await;
            return Ok(());
        }
        self.forward(&Packet::data(self.me, dest, segment)).await
    }

    /// Broadcast this node's distance vector once.
    pub async fn broadcast_routes(&self) -> Result<usize, NetworkError> {
        let pkt = Packet::route_update(self.me, &self.routing.own_update());
        Ok(self.overlay.broadcast(&pkt).await?)
    }

    /// Serve one transport hand-off stream until it closes.
    ///
    /// The newest attached transport receives every segment delivered to
    /// this node.
    pub async fn serve_transport<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = socket::split_lossless(stream);
        let generation = self.next_transport.fetch_add(1, Ordering::SeqCst);
        if self.transport().replace((generation, writer)).is_some() {
            log::warn!("[snp] new transport replaces the previous one");
        }
        log::info!("[snp] transport attached to node {}", self.me);

        loop {
            match reader.recv_raw().await {
                Ok(Some((dest, segment))) => {
                    if let Err(e) = self.send_segment(dest, segment).await {
                        log::debug!("[snp] dropping segment for {dest}: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[snp] transport link failed: {e}");
                    break;
                }
            }
        }

        {
            let mut slot = self.transport();
            if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
                *slot = None;
            }
        }
        log::info!("[snp] transport detached from node {}", self.me);
    }
}

pub(crate) async fn packet_loop(network: Arc<Network>, mut inbound: mpsc::Receiver<Packet>) {
    while let Some(pkt) = inbound.recv().await {
        network.handle_packet(pkt).await;
    }
}

pub(crate) async fn route_daemon(network: Arc<Network>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match network.broadcast_routes().await {
            Ok(n) => log::debug!("[snp] route update sent to {n} neighbor(s)"),
            Err(e) => log::warn!("[snp] route update failed: {e}"),
        }
    }
}
