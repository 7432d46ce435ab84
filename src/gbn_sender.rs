//! Go-Back-N send buffer.
//!
//! [`SendBuffer`] holds every DATA segment a client has accepted from the
//! application but not yet seen acknowledged, in sequence order:
//!
//! ```text
//!   front (oldest unacked)     unsent              back
//!       │                        │                   │
//!   ────┼──── in flight ─────────┼───── queued ──────┼──▶ seq space
//!       │ <= window segments     │                   │
//! ```
//!
//! - Sequence numbers are byte offsets and wrap modulo 2^32.
//! - ACKs are cumulative: `ack = K` acknowledges every in-flight segment whose
//!   sequence number is below `K`.
//! - A timeout re-sends the **whole** in-flight window.
//!
//! This module only manages state; the caller does the socket I/O.

use std::collections::VecDeque;
use std::time::Instant;

use crate::segment::Segment;

/// `true` when `a` precedes `b` in wrap-around sequence space.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) <= u32::MAX / 2
}

/// One queued DATA segment.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub segment: Segment,
    /// Time of the most recent transmission; `None` until first sent.
    pub sent_at: Option<Instant>,
    pub tx_count: u32,
}

#[derive(Debug)]
pub struct SendBuffer {
    queue: VecDeque<SendEntry>,
    /// Index of the first never-sent entry; also the in-flight count.
    unsent: usize,
    next_seq: u32,
    window: usize,
    max_seg_len: usize,
}

impl SendBuffer {
    pub fn new(window: usize, max_seg_len: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            unsent: 0,
            next_seq: 0,
            window: window.max(1),
            max_seg_len: max_seg_len.max(1),
        }
    }

    /// Drop everything and restart numbering at `seq`.
    pub fn reset(&mut self, seq: u32) {
        self.clear();
        self.next_seq = seq;
    }

    /// Sequence number the next new segment will carry.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Split `data` into DATA segments and append them. Returns how many
    /// segments were queued.
    pub fn enqueue(&mut self, src_port: u32, dest_port: u32, data: &[u8]) -> usize {
        let mut count = 0;
        for chunk in data.chunks(self.max_seg_len) {
            let segment = Segment::data(src_port, dest_port, self.next_seq, chunk.to_vec());
            self.next_seq = self.next_seq.wrapping_add(chunk.len() as u32);
            self.queue.push_back(SendEntry {
                segment,
                sent_at: None,
                tx_count: 0,
            });
            count += 1;
        }
        count
    }

    /// Window-fill step: mark every segment that fits in the window as sent
    /// now and return them in order.
    pub fn fill_window(&mut self) -> Vec<Segment> {
        let now = Instant::now();
        let mut out = Vec::new();
        while self.unsent < self.queue.len() && self.unsent < self.window {
            let entry = &mut self.queue[self.unsent];
            entry.sent_at = Some(now);
            entry.tx_count += 1;
            out.push(entry.segment.clone());
            self.unsent += 1;
        }
        out
    }

    /// Apply a cumulative ACK. Returns the number of segments released.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        let mut released = 0;
        while self.unsent > 0 {
            let Some(front) = self.queue.front() else {
                break;
            };
            if !seq_lt(front.segment.header.seq, ack) {
                break;
            }
            self.queue.pop_front();
            self.unsent -= 1;
            released += 1;
        }
        released
    }

    /// Restamp every in-flight segment and return copies to re-send.
    pub fn retransmit_window(&mut self) -> Vec<Segment> {
        let now = Instant::now();
        self.queue
            .iter_mut()
            .take(self.unsent)
            .map(|entry| {
                entry.sent_at = Some(now);
                entry.tx_count += 1;
                entry.segment.clone()
            })
            .collect()
    }

    /// Last send time of the oldest in-flight segment.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        if self.unsent == 0 {
            return None;
        }
        self.queue.front().and_then(|entry| entry.sent_at)
    }

    pub fn in_flight(&self) -> usize {
        self.unsent
    }

    /// Segments queued in total, sent or not.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.unsent = 0;
    }

    pub fn entries(&self) -> impl Iterator<Item = &SendEntry> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs(segments: &[Segment]) -> Vec<u32> {
        segments.iter().map(|s| s.header.seq).collect()
    }

    #[test]
    fn enqueue_splits_by_max_seg_len() {
        let mut buf = SendBuffer::new(10, 1500);
        assert_eq!(buf.enqueue(1, 2, &[0u8; 3200]), 3);
        let lens: Vec<usize> = buf.entries().map(|e| e.segment.data.len()).collect();
        assert_eq!(lens, vec![1500, 1500, 200]);
        assert_eq!(buf.next_seq(), 3200);
    }

    #[test]
    fn sequence_numbers_are_byte_offsets() {
        let mut buf = SendBuffer::new(10, 4);
        buf.enqueue(1, 2, b"abcdefghij");
        assert_eq!(seqs(&buf.fill_window()), vec![0, 4, 8]);
    }

    #[test]
    fn window_bounds_in_flight() {
        let mut buf = SendBuffer::new(2, 10);
        buf.enqueue(1, 2, &[0u8; 50]);
        let sent = buf.fill_window();
        assert_eq!(seqs(&sent), vec![0, 10]);
        assert_eq!(buf.in_flight(), 2);
        assert!(buf.fill_window().is_empty());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn cumulative_ack_releases_and_reopens_window() {
        let mut buf = SendBuffer::new(2, 10);
        buf.enqueue(1, 2, &[0u8; 40]);
        buf.fill_window();

        assert_eq!(buf.on_ack(20), 2);
        assert_eq!(buf.in_flight(), 0);
        assert_eq!(seqs(&buf.fill_window()), vec![20, 30]);
    }

    #[test]
    fn ack_never_releases_unsent_segments() {
        let mut buf = SendBuffer::new(1, 10);
        buf.enqueue(1, 2, &[0u8; 30]);
        buf.fill_window();

        assert_eq!(buf.on_ack(30), 1);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.in_flight(), 0);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut buf = SendBuffer::new(4, 10);
        buf.enqueue(1, 2, &[0u8; 20]);
        buf.fill_window();
        assert_eq!(buf.on_ack(0), 0);
        assert_eq!(buf.in_flight(), 2);
    }

    #[test]
    fn no_in_flight_seq_below_ack_remains() {
        let mut buf = SendBuffer::new(5, 7);
        buf.enqueue(1, 2, &[0u8; 35]);
        buf.fill_window();
        buf.on_ack(15);
        assert!(buf
            .entries()
            .take(buf.in_flight())
            .all(|e| !seq_lt(e.segment.header.seq, 15)));
    }

    #[test]
    fn retransmit_resends_whole_window() {
        let mut buf = SendBuffer::new(3, 10);
        buf.enqueue(1, 2, &[0u8; 50]);
        buf.fill_window();
        let first = buf.oldest_sent_at().unwrap();

        let again = buf.retransmit_window();
        assert_eq!(seqs(&again), vec![0, 10, 20]);
        assert!(buf.oldest_sent_at().unwrap() >= first);
        assert!(buf.entries().take(3).all(|e| e.tx_count == 2));
        assert!(buf.entries().skip(3).all(|e| e.tx_count == 0));
    }

    #[test]
    fn wraps_around_sequence_space() {
        let mut buf = SendBuffer::new(4, 10);
        buf.reset(u32::MAX - 4);
        buf.enqueue(1, 2, &[0u8; 20]);
        buf.fill_window();
        assert_eq!(buf.on_ack((u32::MAX - 4).wrapping_add(10)), 1);
        assert_eq!(buf.on_ack((u32::MAX - 4).wrapping_add(20)), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let mut buf = SendBuffer::new(4, 10);
        buf.enqueue(1, 2, &[0u8; 40]);
        buf.fill_window();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.in_flight(), 0);
        assert!(buf.oldest_sent_at().is_none());
    }
}
