//! Go-Back-N receive side.
//!
//! [`RecvBuffer`] accepts DATA strictly in order. Anything else (a gap, a
//! duplicate, or a segment that would not fit) is discarded, and the caller
//! re-acknowledges the unchanged expected sequence number so the sender's
//! cumulative-ACK logic goes back and re-sends.

/// Outcome of offering one DATA segment to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In order and buffered; the expected sequence number advanced.
    Accepted,
    /// Sequence number differs from the expected one.
    OutOfOrder,
    /// In order but the buffer lacks room.
    Overflow,
}

#[derive(Debug)]
pub struct RecvBuffer {
    expected_seq: u32,
    data: Vec<u8>,
    capacity: usize,
    out_of_order: u64,
    overflowed: u64,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            expected_seq: 0,
            data: Vec::new(),
            capacity,
            out_of_order: 0,
            overflowed: 0,
        }
    }

    /// Fresh connection: empty the buffer and expect `seq` next.
    pub fn reset(&mut self, seq: u32) {
        self.data.clear();
        self.expected_seq = seq;
        self.out_of_order = 0;
        self.overflowed = 0;
    }

    /// Re-synchronise on a duplicate SYN without discarding buffered bytes.
    pub fn resync(&mut self, seq: u32) {
        self.expected_seq = seq;
    }

    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Delivery {
        if seq != self.expected_seq {
            self.out_of_order += 1;
            return Delivery::OutOfOrder;
        }
        if self.data.len() + payload.len() > self.capacity {
            self.overflowed += 1;
            return Delivery::Overflow;
        }
        self.data.extend_from_slice(payload);
        self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u32);
        Delivery::Accepted
    }

    /// Cumulative ACK value: the next byte offset expected.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }

    /// Take exactly `len` bytes from the front, if that many are buffered.
    pub fn read(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.data.len() < len {
            return None;
        }
        Some(self.data.drain(..len).collect())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// DATA segments discarded for arriving out of order.
    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    /// In-order DATA segments discarded for lack of space.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }
}
