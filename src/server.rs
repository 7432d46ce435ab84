//! SRT server endpoint.
//!
//! Mirrors [`crate::client`]: a TCB table, one segment handler task per
//! endpoint, and `watch` channels for every blocking call. The receive side
//! is strict Go-Back-N: only the next expected DATA segment is buffered, and
//! every DATA segment is answered with a DATAACK carrying the current
//! expectation.
//!
//! ```text
//!   SYN  (LISTENING)  → record client, reset expectation, SYNACK, CONNECTED
//!   SYN  (CONNECTED)  → re-sync expectation, SYNACK
//!   DATA (CONNECTED)  → buffer if in order and it fits; always DATAACK
//!   FIN  (CONNECTED)  → FINACK, CLOSEWAIT, start closewait timer
//!   FIN  (CLOSEWAIT)  → FINACK
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::SrtConfig;
use crate::connection::{Tcb, TcbTable, TransportError};
use crate::gbn_receiver::{Delivery, RecvBuffer};
use crate::id::NodeId;
use crate::segment::{Segment, SegmentType};
use crate::socket::{self, SegmentReader, SegmentWriter};
use crate::state::{wait_until, ServerState};
use crate::timer::TimerHandle;

/// Receive-side counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvStats {
    pub buffered: usize,
    pub out_of_order: u64,
    pub overflowed: u64,
}

struct ServerConn {
    client_node: NodeId,
    client_port: u32,
    recv_buf: RecvBuffer,
    closewait: Option<TimerHandle>,
}

struct ServerTcb {
    port: u32,
    state: watch::Sender<ServerState>,
    /// Bytes currently held in the receive buffer.
    buffered: watch::Sender<usize>,
    conn: AsyncMutex<ServerConn>,
}

impl Tcb for Arc<ServerTcb> {
    fn port(&self) -> u32 {
        self.port
    }
}

impl ServerTcb {
    fn state(&self) -> ServerState {
        *self.state.borrow()
    }
}

struct ServerShared {
    writer: SegmentWriter,
    config: SrtConfig,
    table: Mutex<TcbTable<Arc<ServerTcb>>>,
    reset: AtomicBool,
}

impl ServerShared {
    fn table(&self) -> MutexGuard<'_, TcbTable<Arc<ServerTcb>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tcb(&self, id: usize) -> Result<Arc<ServerTcb>, TransportError> {
        self.table().get(id).cloned().ok_or(TransportError::BadSocket(id))
    }

    fn is_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }

    async fn reply(&self, tcb: &ServerTcb, conn: &ServerConn, seg: Segment) {
        let kind = seg.header.seg_type;
        match self.writer.send(conn.client_node, &seg).await {
            Ok(()) => log::debug!(
                "[srt:server] → {kind} port={} to {}:{} ack={}",
                tcb.port,
                conn.client_node,
                conn.client_port,
                seg.header.ack
            ),
            Err(e) => log::warn!("[srt:server] failed to send {kind} on port {}: {e}", tcb.port),
        }
    }

    async fn handle_segment(&self, node: NodeId, seg: Segment) {
        let h = &seg.header;
        let found = self.table().by_port(h.dest_port).cloned();
        let Some(tcb) = found else {
            log::debug!("[srt:server] dropping {} for unbound port {}", h.seg_type, h.dest_port);
            return;
        };

        let mut conn = tcb.conn.lock().await;
        let state = tcb.state();
        let from_client = node == conn.client_node && h.src_port == conn.client_port;

        match (h.seg_type, state) {
            (SegmentType::Syn, ServerState::Listening) => {
                conn.client_node = node;
                conn.client_port = h.src_port;
                conn.recv_buf.reset(h.seq);
                tcb.buffered.send_replace(0);
                tcb.state.send_replace(ServerState::Connected);
                log::info!("[srt:server] port {} accepted {}:{}", tcb.port, node, h.src_port);
                let ack = Segment::control(SegmentType::SynAck, tcb.port, h.src_port, 0);
                self.reply(&tcb, &conn, ack).await;
            }
            (SegmentType::Syn, ServerState::Connected) if from_client => {
                conn.recv_buf.resync(h.seq);
                let ack = Segment::control(SegmentType::SynAck, tcb.port, h.src_port, 0);
                self.reply(&tcb, &conn, ack).await;
            }
            (SegmentType::Data, ServerState::Connected) if from_client => {
                match conn.recv_buf.on_segment(h.seq, &seg.data) {
                    Delivery::Accepted => {
                        tcb.buffered.send_replace(conn.recv_buf.len());
                        log::debug!(
                            "[srt:server] ← DATA port={} seq={} len={} buffered",
                            tcb.port,
                            h.seq,
                            seg.data.len()
                        );
                    }
                    Delivery::OutOfOrder => log::debug!(
                        "[srt:server] dropping out-of-order DATA port={} seq={} expected={} (total {})",
                        tcb.port,
                        h.seq,
                        conn.recv_buf.ack_number(),
                        conn.recv_buf.out_of_order()
                    ),
                    Delivery::Overflow => log::debug!(
                        "[srt:server] receive buffer full on port {}; dropping seq={}",
                        tcb.port,
                        h.seq
                    ),
                }
                let ack = Segment::data_ack(tcb.port, h.src_port, conn.recv_buf.ack_number());
                self.reply(&tcb, &conn, ack).await;
            }
            (SegmentType::Fin, ServerState::Connected) if from_client => {
                tcb.state.send_replace(ServerState::CloseWait);
                log::info!("[srt:server] port {} got FIN; entering CLOSEWAIT", tcb.port);
                let ack = Segment::control(SegmentType::FinAck, tcb.port, h.src_port, 0);
                self.reply(&tcb, &conn, ack).await;

                let wait = self.config.closewait_time;
                let owner = Arc::clone(&tcb);
                conn.closewait = Some(TimerHandle::spawn(move |mut cancel| async move {
                    if cancel.sleep(wait).await && owner.state() == ServerState::CloseWait {
                        owner.state.send_replace(ServerState::Closed);
                        log::info!("[srt:server] port {} closed", owner.port);
                    }
                }));
            }
            (SegmentType::Fin, ServerState::CloseWait) if from_client => {
                let ack = Segment::control(SegmentType::FinAck, tcb.port, h.src_port, 0);
                self.reply(&tcb, &conn, ack).await;
            }
            (seg_type, state) => {
                log::debug!(
                    "[srt:server] ignoring {seg_type} from {}:{} on port {} in {state}",
                    node,
                    h.src_port,
                    tcb.port
                );
            }
        }
    }

    async fn reset_all(&self) {
        self.reset.store(true, Ordering::SeqCst);
        let tcbs: Vec<Arc<ServerTcb>> = self.table().iter().map(|(_, tcb)| Arc::clone(tcb)).collect();
        for tcb in tcbs {
            let mut conn = tcb.conn.lock().await;
            if let Some(timer) = conn.closewait.take() {
                timer.cancel();
            }
            tcb.state.send_replace(ServerState::Closed);
        }
    }

    async fn stop_timer(&self, tcb: &ServerTcb) {
        let timer = tcb.conn.lock().await.closewait.take();
        if let Some(timer) = timer {
            timer.join().await;
        }
    }
}

async fn seghandler<R>(shared: Arc<ServerShared>, mut reader: SegmentReader<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.recv().await {
            Ok(Some((node, seg))) => shared.handle_segment(node, seg).await,
            Ok(None) => {
                log::warn!("[srt:server] network link closed");
                break;
            }
            Err(e) => {
                log::warn!("[srt:server] network link failed: {e}");
                break;
            }
        }
    }
    shared.reset_all().await;
}

/// Server side of the reliable transport, bound to one hand-off stream.
pub struct SrtServer {
    shared: Arc<ServerShared>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl SrtServer {
    /// Start a server over `stream` and spawn its segment handler.
    pub fn new<S>(stream: S, config: SrtConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = socket::split_stream(stream, &config.simulator);
        let shared = Arc::new(ServerShared {
            writer,
            table: Mutex::new(TcbTable::new(config.max_connections)),
            config,
            reset: AtomicBool::new(false),
        });
        let handler = tokio::spawn(seghandler(Arc::clone(&shared), reader));
        Self {
            shared,
            handler: Mutex::new(Some(handler)),
        }
    }

    pub fn sock(&self, port: u32) -> Result<usize, TransportError> {
        let tcb = Arc::new(ServerTcb {
            port,
            state: watch::channel(ServerState::Closed).0,
            buffered: watch::channel(0).0,
            conn: AsyncMutex::new(ServerConn {
                client_node: NodeId(0),
                client_port: 0,
                recv_buf: RecvBuffer::new(self.shared.config.receive_buf_size),
                closewait: None,
            }),
        });
        let id = self.shared.table().insert(tcb)?;
        log::debug!("[srt:server] sock {id} bound to port {port}");
        Ok(id)
    }

    /// Listen on the socket and wait for a client's SYN.
    pub async fn accept(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        if self.shared.is_reset() {
            return Err(TransportError::Reset);
        }
        {
            let _conn = tcb.conn.lock().await;
            let state = tcb.state();
            if state != ServerState::Closed {
                return Err(TransportError::bad_state("accept", state));
            }
            tcb.state.send_replace(ServerState::Listening);
        }
        log::debug!("[srt:server] port {} listening", tcb.port);

        let mut rx = tcb.state.subscribe();
        match wait_until(&mut rx, None, |s| *s != ServerState::Listening).await {
            Some(ServerState::Closed) | None => Err(TransportError::Reset),
            Some(_) => Ok(()),
        }
    }

    /// Take exactly `len` bytes from the receive buffer, waiting for them to
    /// arrive.
    ///
    /// Valid in CONNECTED. Also valid in CLOSEWAIT so bytes that arrived
    /// before the client's FIN can still be drained; once the peer has closed
    /// a request that cannot be satisfied fails instead of blocking.
    pub async fn recv(&self, id: usize, len: usize) -> Result<Vec<u8>, TransportError> {
        let tcb = self.shared.tcb(id)?;
        let state = tcb.state();
        if !matches!(state, ServerState::Connected | ServerState::CloseWait) {
            return Err(TransportError::bad_state("recv", state));
        }
        if len > self.shared.config.receive_buf_size {
            return Err(TransportError::BadLength(len));
        }

        let mut buffered = tcb.buffered.subscribe();
        let mut states = tcb.state.subscribe();
        loop {
            {
                let mut conn = tcb.conn.lock().await;
                if let Some(bytes) = conn.recv_buf.read(len) {
                    tcb.buffered.send_replace(conn.recv_buf.len());
                    return Ok(bytes);
                }
                let state = *states.borrow_and_update();
                if state != ServerState::Connected {
                    if self.shared.is_reset() {
                        return Err(TransportError::Reset);
                    }
                    return Err(TransportError::Closed {
                        wanted: len,
                        buffered: conn.recv_buf.len(),
                    });
                }
                buffered.borrow_and_update();
            }
            let changed = tokio::select! {
                r = buffered.changed() => r,
                r = states.changed() => r,
            };
            if changed.is_err() {
                return Err(TransportError::Reset);
            }
        }
    }

    /// Release a CLOSED connection's TCB and its receive buffer.
    pub async fn close(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let state = tcb.state();
        if state != ServerState::Closed {
            return Err(TransportError::bad_state("close", state));
        }
        self.shared.stop_timer(&tcb).await;
        self.shared.table().remove(id);
        log::debug!("[srt:server] sock {id} released");
        Ok(())
    }

    pub fn state(&self, id: usize) -> Result<ServerState, TransportError> {
        Ok(self.shared.tcb(id)?.state())
    }

    /// Wait until the connection is back in CLOSED (after CLOSEWAIT expires).
    pub async fn wait_closed(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let mut rx = tcb.state.subscribe();
        wait_until(&mut rx, None, |s| *s == ServerState::Closed)
            .await
            .map(|_| ())
            .ok_or(TransportError::Reset)
    }

    pub async fn stats(&self, id: usize) -> Result<RecvStats, TransportError> {
        let tcb = self.shared.tcb(id)?;
        let conn = tcb.conn.lock().await;
        Ok(RecvStats {
            buffered: conn.recv_buf.len(),
            out_of_order: conn.recv_buf.out_of_order(),
            overflowed: conn.recv_buf.overflowed(),
        })
    }

    /// Close every connection, stop the segment handler and release all TCBs.
    pub async fn shutdown(&self) {
        self.shared.reset_all().await;
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            handler.abort();
        }

        let tcbs: Vec<(usize, Arc<ServerTcb>)> = self
            .shared
            .table()
            .iter()
            .map(|(id, tcb)| (id, Arc::clone(tcb)))
            .collect();
        for (id, tcb) in tcbs {
            self.shared.stop_timer(&tcb).await;
            self.shared.table().remove(id);
        }
    }
}
