//! Node-to-node packet format.
//!
//! Packets travel over overlay links framed with the same `!&` … `!#`
//! markers as segments. All integers are big-endian.
//!
//! ```text
//!  +----------------+----------------+----------------+----------------+
//!  |  dest node id  |  src node id   |      type      | payload length |
//!  +----------------+----------------+----------------+----------------+
//!  |  payload: one encoded segment, or one route-update record ...     |
//!  +--------------------------------------------------------------------+
//! ```
//!
//! A route-update record is an entry count followed by that many
//! `(node id, cost)` pairs, each field 4 bytes.

use thiserror::Error;

use crate::id::NodeId;

pub const PACKET_HEADER_LEN: usize = 16;

/// Largest node count a route update can describe; ids come from one octet.
pub const MAX_NODES: usize = 256;

/// Largest payload a packet may carry.
pub const MAX_PAYLOAD: usize = 4 + 8 * MAX_NODES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Carries one transport segment.
    Data,
    /// Carries the sender's distance vector.
    RouteUpdate,
}

impl PacketType {
    fn to_u32(self) -> u32 {
        match self {
            Self::Data => 0,
            Self::RouteUpdate => 1,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::RouteUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short for a packet header")]
    BufferTooShort,
    #[error("payload length {0} exceeds the packet maximum")]
    Oversized(usize),
    #[error("length field does not match remaining bytes")]
    LengthMismatch,
    #[error("unknown packet type {0}")]
    UnknownType(u32),
    #[error("malformed route update")]
    BadRouteUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dest: NodeId,
    pub src: NodeId,
    pub kind: PacketType,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Wrap an encoded segment for delivery to `dest`.
    pub fn data(src: NodeId, dest: NodeId, segment: Vec<u8>) -> Self {
        Self {
            dest,
            src,
            kind: PacketType::Data,
            payload: segment,
        }
    }

    /// Route update from `src`, addressed to every neighbor.
    pub fn route_update(src: NodeId, update: &RouteUpdate) -> Self {
        Self {
            dest: NodeId::BROADCAST,
            src,
            kind: PacketType::RouteUpdate,
            payload: update.encode(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::Oversized(self.payload.len()));
        }
        let mut buf = Vec::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.dest.0.to_be_bytes());
        buf.extend_from_slice(&self.src.0.to_be_bytes());
        buf.extend_from_slice(&self.kind.to_u32().to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        let length = get_u32(buf, 12) as usize;
        if length > MAX_PAYLOAD {
            return Err(PacketError::Oversized(length));
        }
        if buf.len() != PACKET_HEADER_LEN + length {
            return Err(PacketError::LengthMismatch);
        }
        let raw_type = get_u32(buf, 8);
        let kind = PacketType::from_u32(raw_type).ok_or(PacketError::UnknownType(raw_type))?;
        Ok(Self {
            dest: NodeId(get_u32(buf, 0)),
            src: NodeId(get_u32(buf, 4)),
            kind,
            payload: buf[PACKET_HEADER_LEN..].to_vec(),
        })
    }

    /// Total body length announced by a partial packet, once its header is in.
    pub fn expected_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < PACKET_HEADER_LEN {
            return None;
        }
        Some(PACKET_HEADER_LEN + get_u32(prefix, 12) as usize)
    }
}

/// One advertised `(destination, cost)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub node: NodeId,
    pub cost: u32,
}

/// A node's distance vector as carried in a route-update packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteUpdate {
    pub entries: Vec<RouteEntry>,
}

impl RouteUpdate {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 8 * self.entries.len());
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.node.0.to_be_bytes());
            buf.extend_from_slice(&entry.cost.to_be_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < 4 {
            return Err(PacketError::BadRouteUpdate);
        }
        let count = get_u32(buf, 0) as usize;
        if count > MAX_NODES || buf.len() != 4 + 8 * count {
            return Err(PacketError::BadRouteUpdate);
        }
        let entries = buf[4..]
            .chunks_exact(8)
            .map(|pair| RouteEntry {
                node: NodeId(get_u32(pair, 0)),
                cost: get_u32(pair, 4),
            })
            .collect();
        Ok(Self { entries })
    }
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, HEADER_LEN, MAX_SEG_LEN};

    #[test]
    fn data_packet_carries_segment_bytes() {
        let seg = Segment::data(1, 2, 0, b"abc".to_vec()).encode();
        let pkt = Packet::data(NodeId(1), NodeId(3), seg.clone());
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, PacketType::Data);
        assert_eq!(decoded.src, NodeId(1));
        assert_eq!(decoded.dest, NodeId(3));
        assert_eq!(decoded.payload, seg);
    }

    #[test]
    fn header_is_dest_src_type_length() {
        let bytes = Packet::data(NodeId(7), NodeId(9), vec![0xaa; 2]).encode().unwrap();
        assert_eq!(&bytes[0..4], &9u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_be_bytes());
    }

    #[test]
    fn route_update_is_broadcast() {
        let update = RouteUpdate {
            entries: vec![
                RouteEntry { node: NodeId(1), cost: 0 },
                RouteEntry { node: NodeId(2), cost: 4 },
            ],
        };
        let pkt = Packet::route_update(NodeId(1), &update);
        assert!(pkt.dest.is_broadcast());
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(RouteUpdate::decode(&decoded.payload).unwrap(), update);
    }

    #[test]
    fn largest_segment_fits_in_payload() {
        assert!(HEADER_LEN + MAX_SEG_LEN <= MAX_PAYLOAD);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let pkt = Packet::data(NodeId(1), NodeId(2), vec![0; MAX_PAYLOAD + 1]);
        assert_eq!(pkt.encode(), Err(PacketError::Oversized(MAX_PAYLOAD + 1)));
    }

    #[test]
    fn truncated_and_unknown_are_rejected() {
        let mut bytes = Packet::data(NodeId(1), NodeId(2), vec![1, 2, 3]).encode().unwrap();
        assert_eq!(Packet::decode(&bytes[..10]), Err(PacketError::BufferTooShort));
        assert_eq!(Packet::decode(&bytes[..18]), Err(PacketError::LengthMismatch));
        bytes[11] = 9;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownType(9)));
    }

    #[test]
    fn route_update_count_must_match() {
        let mut bytes = RouteUpdate {
            entries: vec![RouteEntry { node: NodeId(1), cost: 1 }],
        }
        .encode();
        bytes[3] = 2;
        assert_eq!(RouteUpdate::decode(&bytes), Err(PacketError::BadRouteUpdate));
        assert_eq!(RouteUpdate::decode(&[0, 0]), Err(PacketError::BadRouteUpdate));
    }

    #[test]
    fn expected_len_reads_length_field() {
        let bytes = Packet::data(NodeId(1), NodeId(2), vec![0; 40]).encode().unwrap();
        assert_eq!(Packet::expected_len(&bytes[..15]), None);
        assert_eq!(Packet::expected_len(&bytes[..16]), Some(56));
    }
}
