//! Segment I/O over the transport ↔ network hand-off stream.
//!
//! The transport layer and its local network layer talk over one byte stream
//! (a TCP connection to the node daemon, or an in-memory duplex pipe). Each
//! frame body is a 4-byte node id followed by an encoded segment:
//!
//! | Direction            | Node id means          |
//! |----------------------|------------------------|
//! | transport → network  | destination node       |
//! | network → transport  | source node            |
//!
//! [`SegmentWriter`] is cloneable and shared by every task that sends;
//! [`SegmentReader`] is owned by the single task that receives. Only the
//! transport-side reader runs frames through the loss [`Simulator`].

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::{self, FrameDecoder};
use crate::id::NodeId;
use crate::segment::{Segment, HEADER_LEN, MAX_SEG_LEN};
use crate::simulator::{Fault, Simulator, SimulatorConfig};

const NODE_ID_LEN: usize = 4;

/// Build a hand-off frame body: node id + segment bytes.
pub fn hand_off_body(node: NodeId, segment: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(NODE_ID_LEN + segment.len());
    body.extend_from_slice(&node.0.to_be_bytes());
    body.extend_from_slice(segment);
    body
}

fn hand_off_len(prefix: &[u8]) -> Option<usize> {
    if prefix.len() < NODE_ID_LEN {
        return None;
    }
    Segment::expected_len(&prefix[NODE_ID_LEN..]).map(|n| n + NODE_ID_LEN)
}

fn split_body(mut body: Vec<u8>) -> Option<(NodeId, Vec<u8>)> {
    if body.len() < NODE_ID_LEN {
        return None;
    }
    let node = NodeId(u32::from_be_bytes([body[0], body[1], body[2], body[3]]));
    body.drain(..NODE_ID_LEN);
    Some((node, body))
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write side of a hand-off stream.
#[derive(Clone)]
pub struct SegmentWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl SegmentWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Encode `segment` and send it tagged with `node`.
    pub async fn send(&self, node: NodeId, segment: &Segment) -> io::Result<()> {
        self.send_bytes(node, &segment.encode()).await
    }

    /// Send already-encoded segment bytes tagged with `node`.
    pub async fn send_bytes(&self, node: NodeId, segment: &[u8]) -> io::Result<()> {
        let body = hand_off_body(node, segment);
        let mut writer = self.inner.lock().await;
        codec::write_frame(&mut *writer, &body).await
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter").finish_non_exhaustive()
    }
}

/// Read side of a hand-off stream.
pub struct SegmentReader<R> {
    reader: BufReader<R>,
    decoder: FrameDecoder,
    simulator: Option<Simulator>,
}

impl<R: AsyncRead + Unpin> SegmentReader<R> {
    /// Transport-side reader: every frame passes through the loss model.
    pub fn new(reader: R, simulator: &SimulatorConfig) -> Self {
        Self {
            simulator: Some(Simulator::new(simulator)),
            ..Self::lossless(reader)
        }
    }

    /// Network-side reader: frames are delivered untouched.
    pub fn lossless(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            decoder: FrameDecoder::new(hand_off_len, NODE_ID_LEN + HEADER_LEN + MAX_SEG_LEN),
            simulator: None,
        }
    }

    /// Next framed body, split into node id and raw segment bytes.
    ///
    /// `Ok(None)` means the stream ended.
    pub async fn recv_raw(&mut self) -> io::Result<Option<(NodeId, Vec<u8>)>> {
        loop {
            let Some(body) = codec::read_frame(&mut self.reader, &mut self.decoder).await? else {
                return Ok(None);
            };
            match split_body(body) {
                Some(parts) => return Ok(Some(parts)),
                None => log::debug!("[codec] dropping frame without node id"),
            }
        }
    }

    /// Next segment that survives the loss model and checksum validation.
    pub async fn recv(&mut self) -> io::Result<Option<(NodeId, Segment)>> {
        loop {
            let Some((node, mut bytes)) = self.recv_raw().await? else {
                return Ok(None);
            };

            if let Some(sim) = self.simulator.as_mut() {
                match sim.apply(&mut bytes) {
                    Fault::Delivered => {}
                    Fault::Dropped => {
                        log::debug!("[codec] simulated loss of segment from node {node}");
                        continue;
                    }
                    Fault::Corrupted => {
                        log::debug!("[codec] simulated corruption of segment from node {node}");
                    }
                }
            }

            match Segment::decode(&bytes) {
                Ok(segment) => return Ok(Some((node, segment))),
                Err(e) => log::debug!("[codec] dropping segment from node {node}: {e}"),
            }
        }
    }
}

/// Split a hand-off stream into its transport-side reader and writer.
pub fn split_stream<S>(stream: S, simulator: &SimulatorConfig) -> (SegmentReader<ReadHalf<S>>, SegmentWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (SegmentReader::new(read, simulator), SegmentWriter::new(write))
}

/// Split a hand-off stream into its network-side reader and writer.
pub fn split_lossless<S>(stream: S) -> (SegmentReader<ReadHalf<S>>, SegmentWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    (SegmentReader::lossless(read), SegmentWriter::new(write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentType;

    #[tokio::test]
    async fn segment_crosses_duplex_with_node_id() {
        let (a, b) = tokio::io::duplex(4096);
        let (_a_reader, a_writer) = split_lossless(a);
        let (mut b_reader, _b_writer) = split_stream(b, &SimulatorConfig::default());

        let seg = Segment::data(10, 20, 0, b"hi".to_vec());
        a_writer.send(NodeId(3), &seg).await.unwrap();

        let (node, got) = b_reader.recv().await.unwrap().unwrap();
        assert_eq!(node, NodeId(3));
        assert_eq!(got.data, b"hi");
        assert_eq!(got.header.dest_port, 20);
    }

    #[tokio::test]
    async fn corrupted_bytes_are_skipped() {
        let (a, b) = tokio::io::duplex(4096);
        let (_a_reader, a_writer) = split_lossless(a);
        let (mut b_reader, _b_writer) = split_stream(b, &SimulatorConfig::default());

        let mut bad = Segment::data(1, 2, 0, b"bad".to_vec()).encode();
        bad[HEADER_LEN] ^= 0x01;
        a_writer.send_bytes(NodeId(1), &bad).await.unwrap();
        let good = Segment::control(SegmentType::Syn, 1, 2, 0);
        a_writer.send(NodeId(1), &good).await.unwrap();

        let (_, got) = b_reader.recv().await.unwrap().unwrap();
        assert_eq!(got.header.seg_type, SegmentType::Syn);
    }

    #[tokio::test]
    async fn full_loss_delivers_nothing_until_eof() {
        let (a, b) = tokio::io::duplex(4096);
        let (_a_reader, a_writer) = split_lossless(a);
        let lossy = SimulatorConfig {
            loss_rate: 1.0,
            seed: Some(1),
        };
        let (mut b_reader, _b_writer) = split_stream(b, &lossy);

        for seq in 0..20 {
            a_writer
                .send(NodeId(1), &Segment::data(1, 2, seq, vec![0; 8]))
                .await
                .unwrap();
        }
        drop(a_writer);
        drop(_a_reader);

        assert!(b_reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raw_reader_does_not_decode() {
        let (a, b) = tokio::io::duplex(4096);
        let (_a_reader, a_writer) = split_lossless(a);
        let (mut b_reader, _b_writer) = split_lossless(b);

        let bytes = Segment::data_ack(5, 6, 99).encode();
        a_writer.send_bytes(NodeId(42), &bytes).await.unwrap();
        assert_eq!(b_reader.recv_raw().await.unwrap(), Some((NodeId(42), bytes)));
    }
}
