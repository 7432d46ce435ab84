//! Transport control block bookkeeping shared by client and server.
//!
//! Each endpoint keeps its TCBs in a fixed-capacity [`TcbTable`] indexed by a
//! small integer socket id. At most one TCB may be bound to a local port at a
//! time; a full table is reported as an error rather than a sentinel id.

use thiserror::Error;

/// Errors returned by the application-facing transport API.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no connection with socket id {0}")]
    BadSocket(usize),
    #[error("{op} not allowed in state {state}")]
    BadState { op: &'static str, state: String },
    #[error("connection table is full")]
    TableFull,
    #[error("port {0} is already bound")]
    PortInUse(u32),
    #[error("handshake failed: no SYNACK after {0} attempts")]
    HandshakeFailed(u32),
    #[error("teardown failed: no FINACK after {0} attempts")]
    TeardownFailed(u32),
    #[error("connection reset: link to the network layer is down")]
    Reset,
    #[error("peer closed before {wanted} bytes were available ({buffered} buffered)")]
    Closed { wanted: usize, buffered: usize },
    #[error("request of {0} bytes exceeds the receive buffer")]
    BadLength(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn bad_state(op: &'static str, state: impl std::fmt::Display) -> Self {
        Self::BadState {
            op,
            state: state.to_string(),
        }
    }
}

/// A table entry bound to a local port.
pub trait Tcb {
    fn port(&self) -> u32;
}

/// Fixed-capacity table of TCBs indexed by socket id.
#[derive(Debug)]
pub struct TcbTable<T> {
    slots: Vec<Option<T>>,
}

impl<T: Tcb> TcbTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Place `tcb` in the first free slot and return its socket id.
    pub fn insert(&mut self, tcb: T) -> Result<usize, TransportError> {
        if self.by_port(tcb.port()).is_some() {
            return Err(TransportError::PortInUse(tcb.port()));
        }
        let id = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TransportError::TableFull)?;
        self.slots[id] = Some(tcb);
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn by_port(&self, port: u32) -> Option<&T> {
        self.iter().map(|(_, tcb)| tcb).find(|tcb| tcb.port() == port)
    }

    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|tcb| (id, tcb)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
