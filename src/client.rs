//! SRT client endpoint.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ sock / connect / send / flush / disconnect / close
//!      ▼
//!  SrtClient ──── TcbTable<ClientTcb> ────┐
//!      │                                   │ per-connection lock
//!      │                                   ▼
//!      │                        ClientConn { SendBuffer, timer }
//!      │                             ▲                 ▲
//!      ▼                             │ DATAACK         │ timeout
//!  SegmentWriter ◀──────────── seghandler task    retransmit task
//!      │                             ▲
//!      ▼                             │
//!   hand-off stream to the local network layer
//! ```
//!
//! API calls block on `watch` channels rather than polling: `connect` and
//! `disconnect` wait for the seghandler to move the state out of SYNSENT or
//! FINWAIT, and `flush` waits for the pending-segment count to reach zero.
//!
//! Lock order is always per-connection lock, then the writer lock. The TCB
//! table lock is never held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::SrtConfig;
use crate::connection::{Tcb, TcbTable, TransportError};
use crate::gbn_sender::SendBuffer;
use crate::id::NodeId;
use crate::segment::{Segment, SegmentType};
use crate::socket::{self, SegmentReader, SegmentWriter};
use crate::state::{wait_until, ClientState};
use crate::timer::{CancelToken, TimerHandle};

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

struct ClientConn {
    server_node: NodeId,
    server_port: u32,
    send_buf: SendBuffer,
    timer: Option<TimerHandle>,
    /// Set while a retransmission task owns the in-flight window.
    timer_running: bool,
}

struct ClientTcb {
    port: u32,
    state: watch::Sender<ClientState>,
    /// Segments queued and not yet acknowledged.
    pending: watch::Sender<usize>,
    conn: AsyncMutex<ClientConn>,
}

impl Tcb for Arc<ClientTcb> {
    fn port(&self) -> u32 {
        self.port
    }
}

impl ClientTcb {
    fn new(port: u32, config: &SrtConfig) -> Self {
        Self {
            port,
            state: watch::channel(ClientState::Closed).0,
            pending: watch::channel(0).0,
            conn: AsyncMutex::new(ClientConn {
                server_node: NodeId(0),
                server_port: 0,
                send_buf: SendBuffer::new(config.gbn_window, config.max_seg_len),
                timer: None,
                timer_running: false,
            }),
        }
    }

    fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Move `from` → `to` only if still in `from`.
    fn transition(&self, from: ClientState, to: ClientState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Shared endpoint state
// ---------------------------------------------------------------------------

struct ClientShared {
    writer: SegmentWriter,
    config: SrtConfig,
    table: Mutex<TcbTable<Arc<ClientTcb>>>,
    /// Set once the hand-off stream has failed.
    reset: AtomicBool,
}

impl ClientShared {
    fn table(&self) -> MutexGuard<'_, TcbTable<Arc<ClientTcb>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tcb(&self, id: usize) -> Result<Arc<ClientTcb>, TransportError> {
        self.table().get(id).cloned().ok_or(TransportError::BadSocket(id))
    }

    fn is_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }

    /// Window-fill routine: send what fits, then make sure a retransmission
    /// task is watching the window.
    async fn fill_window(
        self: &Arc<Self>,
        tcb: &Arc<ClientTcb>,
        conn: &mut ClientConn,
    ) -> std::io::Result<()> {
        let segments = conn.send_buf.fill_window();
        for seg in &segments {
            self.writer.send(conn.server_node, seg).await?;
            log::debug!(
                "[srt:client] → DATA port={} seq={} len={} in_flight={}",
                tcb.port,
                seg.header.seq,
                seg.data.len(),
                conn.send_buf.in_flight()
            );
        }
        tcb.pending.send_replace(conn.send_buf.len());

        if conn.send_buf.in_flight() > 0 && !conn.timer_running {
            conn.timer_running = true;
            let shared = Arc::clone(self);
            let owner = Arc::clone(tcb);
            conn.timer = Some(TimerHandle::spawn(move |cancel| retransmit_loop(shared, owner, cancel)));
        }
        Ok(())
    }

    async fn handle_segment(self: &Arc<Self>, node: NodeId, seg: Segment) {
        let h = &seg.header;
        let found = self.table().by_port(h.dest_port).cloned();
        let Some(tcb) = found else {
            log::debug!("[srt:client] dropping {} for unbound port {}", h.seg_type, h.dest_port);
            return;
        };

        let mut conn = tcb.conn.lock().await;
        if node != conn.server_node || h.src_port != conn.server_port {
            log::debug!(
                "[srt:client] dropping {} from {}:{} on port {}",
                h.seg_type,
                node,
                h.src_port,
                tcb.port
            );
            return;
        }

        let state = tcb.state();
        match (h.seg_type, state) {
            (SegmentType::SynAck, ClientState::SynSent) => {
                tcb.state.send_replace(ClientState::Connected);
                log::info!("[srt:client] port {} connected to {}:{}", tcb.port, node, h.src_port);
            }
            (SegmentType::FinAck, ClientState::FinWait) => {
                conn.send_buf.clear();
                tcb.pending.send_replace(0);
                tcb.state.send_replace(ClientState::Closed);
                log::info!("[srt:client] port {} closed", tcb.port);
            }
            (SegmentType::DataAck, ClientState::Connected | ClientState::FinWait) => {
                let released = conn.send_buf.on_ack(h.ack);
                log::debug!(
                    "[srt:client] ← DATAACK port={} ack={} released={}",
                    tcb.port,
                    h.ack,
                    released
                );
                if released == 0 {
                    return;
                }
                tcb.pending.send_replace(conn.send_buf.len());
                if state == ClientState::Connected {
                    if let Err(e) = self.fill_window(&tcb, &mut conn).await {
                        log::warn!("[srt:client] send failed on port {}: {e}", tcb.port);
                    }
                }
            }
            (seg_type, state) => {
                log::debug!("[srt:client] ignoring {seg_type} on port {} in {state}", tcb.port);
            }
        }
    }

    /// Force every connection to CLOSED and stop its timer.
    async fn reset_all(&self) {
        self.reset.store(true, Ordering::SeqCst);
        let tcbs: Vec<Arc<ClientTcb>> = self.table().iter().map(|(_, tcb)| Arc::clone(tcb)).collect();
        for tcb in tcbs {
            let mut conn = tcb.conn.lock().await;
            conn.send_buf.clear();
            conn.timer_running = false;
            if let Some(timer) = conn.timer.take() {
                timer.cancel();
            }
            tcb.pending.send_replace(0);
            tcb.state.send_replace(ClientState::Closed);
        }
    }

    /// Clear the send buffer, then cancel and join the retransmission task.
    async fn stop_timer(&self, tcb: &ClientTcb) {
        let timer = {
            let mut conn = tcb.conn.lock().await;
            conn.send_buf.clear();
            conn.timer_running = false;
            tcb.pending.send_replace(0);
            conn.timer.take()
        };
        if let Some(timer) = timer {
            timer.join().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn seghandler<R>(shared: Arc<ClientShared>, mut reader: SegmentReader<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.recv().await {
            Ok(Some((node, seg))) => shared.handle_segment(node, seg).await,
            Ok(None) => {
                log::warn!("[srt:client] network link closed");
                break;
            }
            Err(e) => {
                log::warn!("[srt:client] network link failed: {e}");
                break;
            }
        }
    }
    shared.reset_all().await;
}

/// Re-send the whole window whenever the oldest in-flight segment is older
/// than the data timeout. Exits once nothing is in flight.
async fn retransmit_loop(shared: Arc<ClientShared>, tcb: Arc<ClientTcb>, mut cancel: CancelToken) {
    let poll = shared.config.sendbuf_polling_interval;
    let timeout = shared.config.data_timeout;

    while cancel.sleep(poll).await {
        let mut conn = tcb.conn.lock().await;
        if conn.send_buf.in_flight() == 0 {
            conn.timer_running = false;
            return;
        }
        let expired = conn
            .send_buf
            .oldest_sent_at()
            .is_some_and(|sent| sent.elapsed() >= timeout);
        if !expired {
            continue;
        }

        let segments = conn.send_buf.retransmit_window();
        log::debug!(
            "[srt:client] timeout on port {}; retransmitting {} segment(s)",
            tcb.port,
            segments.len()
        );
        for seg in &segments {
            if let Err(e) = shared.writer.send(conn.server_node, seg).await {
                log::warn!("[srt:client] retransmission failed on port {}: {e}", tcb.port);
                conn.timer_running = false;
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Client side of the reliable transport, bound to one hand-off stream.
pub struct SrtClient {
    shared: Arc<ClientShared>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl SrtClient {
    /// Start a client over `stream` and spawn its segment handler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, config: SrtConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = socket::split_stream(stream, &config.simulator);
        let shared = Arc::new(ClientShared {
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

    /// Create a CLOSED connection bound to `port` and return its socket id.
    pub fn sock(&self, port: u32) -> Result<usize, TransportError> {
        let tcb = Arc::new(ClientTcb::new(port, &self.shared.config));
        let id = self.shared.table().insert(tcb)?;
        log::debug!("[srt:client] sock {id} bound to port {port}");
        Ok(id)
    }

    /// Handshake with the server at `server_node:server_port`.
    ///
    /// Sends SYN up to `syn_max_retry + 1` times, waiting `syn_timeout` for a
    /// SYNACK after each. On exhaustion the connection returns to CLOSED.
    pub async fn connect(&self, id: usize, server_node: NodeId, server_port: u32) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        if self.shared.is_reset() {
            return Err(TransportError::Reset);
        }

        let syn = {
            let mut conn = tcb.conn.lock().await;
            let state = tcb.state();
            if state != ClientState::Closed {
                return Err(TransportError::bad_state("connect", state));
            }
            conn.server_node = server_node;
            conn.server_port = server_port;
            conn.send_buf.reset(0);
            tcb.pending.send_replace(0);
            tcb.state.send_replace(ClientState::SynSent);
            Segment::control(SegmentType::Syn, tcb.port, server_port, conn.send_buf.next_seq())
        };

        let config = &self.shared.config;
        let attempts = config.syn_max_retry + 1;
        let mut rx = tcb.state.subscribe();
        for attempt in 1..=attempts {
            if let Err(e) = self.shared.writer.send(server_node, &syn).await {
                tcb.transition(ClientState::SynSent, ClientState::Closed);
                return Err(e.into());
            }
            log::debug!(
                "[srt:client] → SYN port={} to {}:{} attempt {}/{}",
                tcb.port,
                server_node,
                server_port,
                attempt,
                attempts
            );

            match wait_until(&mut rx, Some(config.syn_timeout), |s| *s != ClientState::SynSent).await {
                Some(ClientState::Connected) => return Ok(()),
                Some(_) => return Err(TransportError::Reset),
                None => {}
            }
        }

        if tcb.transition(ClientState::SynSent, ClientState::Closed) {
            log::warn!("[srt:client] port {} gave up after {attempts} SYNs", tcb.port);
            return Err(TransportError::HandshakeFailed(attempts));
        }
        // SYNACK landed right as the last wait expired.
        match tcb.state() {
            ClientState::Connected => Ok(()),
            _ => Err(TransportError::Reset),
        }
    }

    /// Queue `data` for reliable delivery and send what the window allows.
    pub async fn send(&self, id: usize, data: &[u8]) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let mut conn = tcb.conn.lock().await;
        let state = tcb.state();
        if state != ClientState::Connected {
            return Err(TransportError::bad_state("send", state));
        }

        let port = tcb.port;
        let server_port = conn.server_port;
        let queued = conn.send_buf.enqueue(port, server_port, data);
        log::debug!("[srt:client] port {port} queued {} bytes in {queued} segment(s)", data.len());

        self.shared.fill_window(&tcb, &mut conn).await?;
        Ok(())
    }

    /// Wait until every queued segment has been acknowledged.
    pub async fn flush(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let state = tcb.state();
        if state != ClientState::Connected {
            return Err(TransportError::bad_state("flush", state));
        }

        let mut pending = tcb.pending.subscribe();
        let mut states = tcb.state.subscribe();
        loop {
            if *pending.borrow_and_update() == 0 {
                return Ok(());
            }
            let state = *states.borrow_and_update();
            if state != ClientState::Connected {
                if self.shared.is_reset() {
                    return Err(TransportError::Reset);
                }
                return Err(TransportError::bad_state("flush", state));
            }
            let changed = tokio::select! {
                r = pending.changed() => r,
                r = states.changed() => r,
            };
            if changed.is_err() {
                return Err(TransportError::Reset);
            }
        }
    }

    /// Tear the connection down with FIN/FINACK.
    ///
    /// Teardown is best effort: if no FINACK arrives after
    /// `fin_max_retry + 1` attempts the connection is forced to CLOSED anyway
    /// and an error is returned.
    pub async fn disconnect(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let (fin, server_node) = {
            let conn = tcb.conn.lock().await;
            let state = tcb.state();
            if state != ClientState::Connected {
                return Err(TransportError::bad_state("disconnect", state));
            }
            tcb.state.send_replace(ClientState::FinWait);
            let fin = Segment::control(SegmentType::Fin, tcb.port, conn.server_port, conn.send_buf.next_seq());
            (fin, conn.server_node)
        };

        let config = &self.shared.config;
        let attempts = config.fin_max_retry + 1;
        let mut rx = tcb.state.subscribe();
        let mut result = Err(TransportError::TeardownFailed(attempts));
        for attempt in 1..=attempts {
            if let Err(e) = self.shared.writer.send(server_node, &fin).await {
                result = Err(e.into());
                break;
            }
            log::debug!("[srt:client] → FIN port={} attempt {}/{}", tcb.port, attempt, attempts);

            if wait_until(&mut rx, Some(config.fin_timeout), |s| *s != ClientState::FinWait)
                .await
                .is_some()
            {
                result = if self.shared.is_reset() {
                    Err(TransportError::Reset)
                } else {
                    Ok(())
                };
                break;
            }
        }

        if tcb.transition(ClientState::FinWait, ClientState::Closed) {
            log::warn!("[srt:client] port {} forced closed without FINACK", tcb.port);
        }
        self.shared.stop_timer(&tcb).await;
        result
    }

    /// Release a CLOSED connection's TCB.
    pub async fn close(&self, id: usize) -> Result<(), TransportError> {
        let tcb = self.shared.tcb(id)?;
        let state = tcb.state();
        if state != ClientState::Closed {
            return Err(TransportError::bad_state("close", state));
        }
        self.shared.stop_timer(&tcb).await;
        self.shared.table().remove(id);
        log::debug!("[srt:client] sock {id} released");
        Ok(())
    }

    pub fn state(&self, id: usize) -> Result<ClientState, TransportError> {
        Ok(self.shared.tcb(id)?.state())
    }

    /// Number of DATA segments queued and not yet acknowledged.
    pub fn pending(&self, id: usize) -> Result<usize, TransportError> {
        Ok(*self.shared.tcb(id)?.pending.borrow())
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

        let tcbs: Vec<(usize, Arc<ClientTcb>)> = self
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
