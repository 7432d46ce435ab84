//! Shared helpers: an in-process stand-in for the network layer that wires
//! one SRT client to one SRT server.

#![allow(dead_code)]

use std::time::Duration;

use srt_overlay::client::SrtClient;
use srt_overlay::config::SrtConfig;
use srt_overlay::id::NodeId;
use srt_overlay::server::SrtServer;
use srt_overlay::simulator::SimulatorConfig;
use srt_overlay::socket::{self, SegmentReader, SegmentWriter};
use tokio::io::{AsyncRead, DuplexStream};
use tokio::task::JoinHandle;

pub const CLIENT_NODE: NodeId = NodeId(1);
pub const SERVER_NODE: NodeId = NodeId(2);

const PIPE: usize = 64 * 1024;

/// Fast timers so failure paths finish quickly.
pub fn fast_config() -> SrtConfig {
    SrtConfig {
        syn_timeout: Duration::from_millis(50),
        syn_max_retry: 3,
        fin_timeout: Duration::from_millis(50),
        fin_max_retry: 3,
        closewait_time: Duration::from_millis(200),
        data_timeout: Duration::from_millis(30),
        sendbuf_polling_interval: Duration::from_millis(5),
        ..SrtConfig::default()
    }
}

pub fn lossy(mut config: SrtConfig, rate: f64, seed: u64) -> SrtConfig {
    config.simulator = SimulatorConfig {
        loss_rate: rate,
        seed: Some(seed),
    };
    config
}

/// Copy every frame from `reader` to `writer`, stamping it as coming from
/// `src`.
async fn pump<R>(mut reader: SegmentReader<R>, writer: SegmentWriter, src: NodeId)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some((_dest, segment))) = reader.recv_raw().await {
        if writer.send_bytes(src, &segment).await.is_err() {
            break;
        }
    }
}

/// A connected client/server pair. Dropping the relay tasks resets both
/// endpoints.
pub struct Pair {
    pub client: SrtClient,
    pub server: SrtServer,
    pub relay: Vec<JoinHandle<()>>,
}

impl Pair {
    pub fn new(client_config: SrtConfig, server_config: SrtConfig) -> Self {
        let (client_app, client_net) = tokio::io::duplex(PIPE);
        let (server_app, server_net) = tokio::io::duplex(PIPE);

        let (client_reader, client_writer) = socket::split_lossless(client_net);
        let (server_reader, server_writer) = socket::split_lossless(server_net);
        let relay = vec![
            tokio::spawn(pump(client_reader, server_writer, CLIENT_NODE)),
            tokio::spawn(pump(server_reader, client_writer, SERVER_NODE)),
        ];

        Self {
            client: SrtClient::new(client_app, client_config),
            server: SrtServer::new(server_app, server_config),
            relay,
        }
    }

    /// Cut the network under both endpoints.
    pub fn cut(&self) {
        for task in &self.relay {
            task.abort();
        }
    }
}

/// A client whose network layer never answers. Returns the client and the
/// far end of its hand-off stream.
pub fn silent_client(config: SrtConfig) -> (SrtClient, DuplexStream) {
    let (app, net) = tokio::io::duplex(PIPE);
    (SrtClient::new(app, config), net)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
