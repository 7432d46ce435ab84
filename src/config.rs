//! Tunable protocol parameters.
//!
//! [`SrtConfig`] holds everything the transport endpoints need (window,
//! segment size, handshake/teardown timers, loss model); [`NodeConfig`] holds
//! what a node daemon needs (ports, route-update cadence, link setup).
//! Defaults follow the classic lab constants; the CLI in `main.rs` overrides
//! the most useful ones.

use std::time::Duration;

use crate::simulator::SimulatorConfig;

/// Cost advertised for an unreachable destination.
pub const INFINITE_COST: u32 = 999;

/// Default TCP port for node-to-node overlay links.
pub const OVERLAY_LINK_PORT: u16 = 39008;

/// Default TCP port on which a node accepts its local transport layer.
pub const NETWORK_PORT: u16 = 39009;

/// Transport-layer parameters shared by client and server endpoints.
#[derive(Debug, Clone)]
pub struct SrtConfig {
    /// Capacity of the TCB table (`MAX_TRANSPORT_CONNECTIONS`).
    pub max_connections: usize,
    /// Largest payload carried by one DATA segment.
    pub max_seg_len: usize,
    /// Go-Back-N window: most segments sent but not yet acknowledged.
    pub gbn_window: usize,
    /// Server receive buffer capacity in bytes.
    pub receive_buf_size: usize,
    /// Wait for SYNACK before re-sending SYN.
    pub syn_timeout: Duration,
    pub syn_max_retry: u32,
    /// Wait for FINACK before re-sending FIN.
    pub fin_timeout: Duration,
    pub fin_max_retry: u32,
    /// Grace period a server spends in CLOSEWAIT before reaching CLOSED.
    pub closewait_time: Duration,
    /// How often the retransmission task checks the oldest in-flight segment.
    pub sendbuf_polling_interval: Duration,
    /// Age after which every in-flight segment is re-sent.
    pub data_timeout: Duration,
    /// Loss/corruption applied to inbound segments.
    pub simulator: SimulatorConfig,
}

impl Default for SrtConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_seg_len: crate::segment::MAX_SEG_LEN,
            gbn_window: 10,
            receive_buf_size: 1_000_000,
            syn_timeout: Duration::from_millis(500),
            syn_max_retry: 5,
            fin_timeout: Duration::from_millis(500),
            fin_max_retry: 5,
            closewait_time: Duration::from_secs(1),
            sendbuf_polling_interval: Duration::from_millis(10),
            data_timeout: Duration::from_millis(100),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Parameters for one overlay/network node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Port every node listens on for overlay links.
    pub overlay_port: u16,
    /// Port on which the node accepts the local transport connection.
    pub network_port: u16,
    /// Period of the distance-vector broadcast.
    pub route_update_interval: Duration,
    /// Delay between attempts to reach a neighbor that is not up yet.
    pub connect_retry_interval: Duration,
    /// Attempts made per neighbor before giving up on the link.
    pub connect_attempts: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            overlay_port: OVERLAY_LINK_PORT,
            network_port: NETWORK_PORT,
            route_update_interval: Duration::from_secs(5),
            connect_retry_interval: Duration::from_millis(500),
            connect_attempts: 120,
        }
    }
}
