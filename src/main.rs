//! Entry point for `srt-overlay`.
//!
//! `node` runs the overlay and network layers for one host and accepts the
//! local transport over TCP. `send` and `recv` are small SRT applications
//! that attach to a running node daemon and move one file across the overlay.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpStream;

use srt_overlay::client::SrtClient;
use srt_overlay::config::{NodeConfig, SrtConfig, NETWORK_PORT, OVERLAY_LINK_PORT};
use srt_overlay::id::NodeId;
use srt_overlay::node::Node;
use srt_overlay::server::SrtServer;
use srt_overlay::simulator::SimulatorConfig;
use srt_overlay::topology::Topology;

/// Largest single `recv` issued while reading a file body.
const RECV_CHUNK: usize = 64 * 1024;

/// Reliable transport over a distance-vector routed overlay.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the overlay and network layers for this host.
    Node {
        /// Topology file: one `hostA hostB cost` link per line.
        #[arg(short, long)]
        topology: PathBuf,
        /// This host's name or address as it appears in the topology.
        #[arg(short, long)]
        local: String,
        #[arg(long, default_value_t = OVERLAY_LINK_PORT)]
        overlay_port: u16,
        #[arg(long, default_value_t = NETWORK_PORT)]
        network_port: u16,
        /// Seconds between distance-vector broadcasts.
        #[arg(long, default_value_t = 5)]
        route_interval: u64,
    },
    /// Send a file to a server on another node.
    Send {
        #[command(flatten)]
        transport: TransportArgs,
        /// Node id of the server's host.
        #[arg(long)]
        server_node: u32,
        #[arg(long, default_value_t = 88)]
        server_port: u32,
        #[arg(long, default_value_t = 87)]
        client_port: u32,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Accept one connection and write what it delivers.
    Recv {
        #[command(flatten)]
        transport: TransportArgs,
        #[arg(long, default_value_t = 88)]
        port: u32,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TransportArgs {
    /// Address of the local node daemon's transport port.
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], NETWORK_PORT)))]
    node: SocketAddr,
    /// Probability that an inbound segment is lost or corrupted.
    #[arg(long, default_value_t = 0.05)]
    loss: f64,
    /// RNG seed for reproducible loss.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    window: Option<usize>,
}

impl TransportArgs {
    fn config(&self) -> Result<SrtConfig> {
        if !(0.0..=1.0).contains(&self.loss) {
            bail!("loss rate must be within 0..=1, got {}", self.loss);
        }
        let mut cfg = SrtConfig {
            simulator: SimulatorConfig {
                loss_rate: self.loss,
                seed: self.seed,
            },
            ..SrtConfig::default()
        };
        if let Some(window) = self.window {
            cfg.gbn_window = window.max(1);
        }
        Ok(cfg)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(self.node)
            .await
            .with_context(|| format!("cannot reach node daemon at {}", self.node))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Node {
            topology,
            local,
            overlay_port,
            network_port,
            route_interval,
        } => {
            let topology = Topology::load(&topology, &local)
                .with_context(|| format!("loading topology {}", topology.display()))?;
            let config = NodeConfig {
                overlay_port,
                network_port,
                route_update_interval: Duration::from_secs(route_interval.max(1)),
                ..NodeConfig::default()
            };
            run_node(topology, config).await
        }
        Mode::Send {
            transport,
            server_node,
            server_port,
            client_port,
            file,
        } => run_send(&transport, NodeId(server_node), server_port, client_port, &file).await,
        Mode::Recv { transport, port, output } => run_recv(&transport, port, output.as_deref()).await,
    }
}

async fn run_node(topology: Topology, config: NodeConfig) -> Result<()> {
    let transport_addr = SocketAddr::new(topology.local_addr(), config.network_port);
    let node = Node::start(topology, config).await.context("starting node")?;
    node.listen_transport(transport_addr)
        .await
        .with_context(|| format!("binding transport port {transport_addr}"))?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    log::info!("interrupted; shutting down node {}", node.me());
    node.shutdown();
    Ok(())
}

async fn run_send(
    args: &TransportArgs,
    server_node: NodeId,
    server_port: u32,
    client_port: u32,
    file: &std::path::Path,
) -> Result<()> {
    let body = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let len = u32::try_from(body.len()).context("file too large")?;

    let client = SrtClient::new(args.connect().await?, args.config()?);
    let result = async {
        let sock = client.sock(client_port)?;
        client.connect(sock, server_node, server_port).await?;
        log::info!("connected to {server_node}:{server_port}");

        client.send(sock, &len.to_be_bytes()).await?;
        client.send(sock, &body).await?;
        client.flush(sock).await?;
        log::info!("sent {len} bytes");

        client.disconnect(sock).await?;
        client.close(sock).await?;
        anyhow::Ok(())
    }
    .await;
    client.shutdown().await;
    result
}

async fn run_recv(args: &TransportArgs, port: u32, output: Option<&std::path::Path>) -> Result<()> {
    let config = args.config()?;
    let closewait = config.closewait_time;
    let server = SrtServer::new(args.connect().await?, config);

    let result = async {
        let sock = server.sock(port)?;
        server.accept(sock).await?;
        log::info!("accepted a connection on port {port}");

        let header = server.recv(sock, 4).await?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header);
        let mut remaining = u32::from_be_bytes(len_bytes) as usize;

        let mut body = Vec::with_capacity(remaining);
        while remaining > 0 {
            let chunk = server.recv(sock, remaining.min(RECV_CHUNK)).await?;
            remaining -= chunk.len();
            body.extend_from_slice(&chunk);
        }
        log::info!("received {} bytes", body.len());

        match output {
            Some(path) => tokio::fs::write(path, &body)
                .await
                .with_context(|| format!("writing {}", path.display()))?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&body)?;
                stdout.flush()?;
            }
        }

        // The client's FIN starts CLOSEWAIT; give it time to finish.
        if tokio::time::timeout(closewait * 10, server.wait_closed(sock)).await.is_err() {
            log::warn!("client never closed; releasing the socket anyway");
            return anyhow::Ok(());
        }
        server.close(sock).await?;
        anyhow::Ok(())
    }
    .await;
    server.shutdown().await;
    result
}
