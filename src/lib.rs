//! `srt-overlay`: a reliable byte-stream transport (SRT) running over a
//! distance-vector routed overlay network of TCP links.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐                         ┌───────────┐
//!  │ SrtClient │                         │ SrtServer │
//!  └─────┬─────┘                         └─────┬─────┘
//!        │ hand-off stream  (node id + segment)│
//!  ┌─────▼─────┐                         ┌─────▼─────┐
//!  │  Network  │  route updates / DATA   │  Network  │
//!  │   (SNP)   │◀───────────────────────▶│   (SNP)   │
//!  └─────┬─────┘                         └─────┬─────┘
//!  ┌─────▼─────┐     TCP, one per pair   ┌─────▼─────┐
//!  │  Overlay  │◀═══════════════════════▶│  Overlay  │
//!  │   (ON)    │   (possibly multi-hop)  │   (ON)    │
//!  └───────────┘                         └───────────┘
//! ```
//!
//! Transport:
//! - [`segment`]: SRT segment header, checksum and encoding
//! - [`codec`]: `!&` … `!#` stream framing shared by every link
//! - [`socket`]: segment reader/writer over the hand-off stream
//! - [`simulator`]: seeded loss and corruption on inbound segments
//! - [`state`]: client/server states and watch-based waiting
//! - [`gbn_sender`]: Go-Back-N send buffer
//! - [`gbn_receiver`]: in-order receive buffer with cumulative ACKs
//! - [`timer`]: supervised, cancellable timer tasks
//! - [`connection`]: TCB table and transport errors
//! - [`client`] / [`server`]: the SRT endpoints
//!
//! Network and overlay:
//! - [`topology`], [`nbr_cost`], [`dvtable`], [`routing`]: routing state
//! - [`packet`]: node-to-node packet and route-update formats
//! - [`neighbor_table`], [`overlay`]: neighbor links
//! - [`network`], [`node`]: forwarding, route broadcast and node startup
//! - [`config`], [`id`]: parameters and node ids

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dvtable;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod id;
pub mod nbr_cost;
pub mod neighbor_table;
pub mod network;
pub mod node;
pub mod overlay;
pub mod packet;
pub mod routing;
pub mod segment;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod topology;
