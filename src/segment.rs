//! Wire-format definitions for SRT segments.
//!
//! This module is responsible for:
//! - Defining the on-wire binary layout of a segment (header + payload).
//! - Serialising a [`Segment`] and computing its checksum.
//! - Deserialising a raw body back into a [`Segment`], rejecting truncated,
//!   oversized or corrupted input.
//!
//! No I/O happens here. Framing with start/end markers lives in
//! [`crate::codec`].
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             Type                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Source Port                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Destination Port                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 26 bytes.

use std::fmt;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 26;

/// Largest payload a single segment may carry.
pub const MAX_SEG_LEN: usize = 1500;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SRC_PORT: usize = 4;
const OFF_DEST_PORT: usize = 8;
const OFF_SEQ: usize = 12;
const OFF_ACK: usize = 16;
const OFF_LENGTH: usize = 20;
const OFF_CHECKSUM: usize = 24;

/// Kind of segment exchanged between transport peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Syn,
    SynAck,
    Fin,
    FinAck,
    Data,
    DataAck,
}

impl SegmentType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Syn,
            1 => Self::SynAck,
            2 => Self::Fin,
            3 => Self::FinAck,
            4 => Self::Data,
            5 => Self::DataAck,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Syn => 0,
            Self::SynAck => 1,
            Self::Fin => 2,
            Self::FinAck => 3,
            Self::Data => 4,
            Self::DataAck => 5,
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYNACK",
            Self::Fin => "FIN",
            Self::FinAck => "FINACK",
            Self::Data => "DATA",
            Self::DataAck => "DATAACK",
        };
        f.write_str(name)
    }
}

/// Fixed-size segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub seg_type: SegmentType,
    pub src_port: u32,
    pub dest_port: u32,
    /// Byte offset of the first payload byte in the sender's stream.
    pub seq: u32,
    /// Cumulative acknowledgment: next byte offset the receiver expects.
    pub ack: u32,
    /// Payload length. Recomputed by [`Segment::encode`].
    pub length: u32,
    /// One's-complement checksum. Recomputed by [`Segment::encode`].
    pub checksum: u16,
}

/// A complete transport segment: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Segment {
    /// Payload-free segment (SYN, SYNACK, FIN, FINACK).
    pub fn control(seg_type: SegmentType, src_port: u32, dest_port: u32, seq: u32) -> Self {
        Self::with_fields(seg_type, src_port, dest_port, seq, 0, Vec::new())
    }

    /// DATA segment carrying `data` at stream offset `seq`.
    pub fn data(src_port: u32, dest_port: u32, seq: u32, data: Vec<u8>) -> Self {
        Self::with_fields(SegmentType::Data, src_port, dest_port, seq, 0, data)
    }

    /// DATAACK advertising `ack` as the next expected offset.
    pub fn data_ack(src_port: u32, dest_port: u32, ack: u32) -> Self {
        Self::with_fields(SegmentType::DataAck, src_port, dest_port, 0, ack, Vec::new())
    }

    fn with_fields(
        seg_type: SegmentType,
        src_port: u32,
        dest_port: u32,
        seq: u32,
        ack: u32,
        data: Vec<u8>,
    ) -> Self {
        let mut seg = Self {
            header: Header {
                seg_type,
                src_port,
                dest_port,
                seq,
                ack,
                length: data.len() as u32,
                checksum: 0,
            },
            data,
        };
        seg.header.checksum = checksum(&seg.unsealed());
        seg
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// `header.length` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.unsealed();
        let csum = checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    /// Wire bytes with the checksum field left zero.
    fn unsealed(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.data.len()];
        let h = &self.header;

        put_u32(&mut buf, OFF_TYPE, h.seg_type.to_u32());
        put_u32(&mut buf, OFF_SRC_PORT, h.src_port);
        put_u32(&mut buf, OFF_DEST_PORT, h.dest_port);
        put_u32(&mut buf, OFF_SEQ, h.seq);
        put_u32(&mut buf, OFF_ACK, h.ack);
        put_u32(&mut buf, OFF_LENGTH, self.data.len() as u32);
        buf[HEADER_LEN..].copy_from_slice(&self.data);
        buf
    }

    /// Parse a [`Segment`] from a complete body (no framing markers).
    ///
    /// The checksum is verified by summing the body *including* the stored
    /// checksum; an unmodified segment sums to zero.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort);
        }

        let length = get_u32(buf, OFF_LENGTH);
        if length as usize > MAX_SEG_LEN {
            return Err(SegmentError::Oversized(length));
        }
        if buf.len() != HEADER_LEN + length as usize {
            return Err(SegmentError::LengthMismatch);
        }
        if checksum(buf) != 0 {
            return Err(SegmentError::ChecksumFailed);
        }

        let raw_type = get_u32(buf, OFF_TYPE);
        let seg_type = SegmentType::from_u32(raw_type).ok_or(SegmentError::UnknownType(raw_type))?;

        Ok(Segment {
            header: Header {
                seg_type,
                src_port: get_u32(buf, OFF_SRC_PORT),
                dest_port: get_u32(buf, OFF_DEST_PORT),
                seq: get_u32(buf, OFF_SEQ),
                ack: get_u32(buf, OFF_ACK),
                length,
                checksum: u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]),
            },
            data: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Total body length announced by a partially received segment, once the
    /// header is complete.
    pub fn expected_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < HEADER_LEN {
            return None;
        }
        Some(HEADER_LEN + get_u32(prefix, OFF_LENGTH) as usize)
    }
}

/// Errors that can arise when parsing a segment body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("buffer too short to contain a segment header")]
    BufferTooShort,
    #[error("length field does not match remaining bytes")]
    LengthMismatch,
    #[error("payload length {0} exceeds the maximum segment length")]
    Oversized(u32),
    #[error("unknown segment type {0}")]
    UnknownType(u32),
    #[error("checksum verification failed")]
    ChecksumFailed,
}

/// One's-complement checksum over `data`.
///
/// Sums consecutive 16-bit big-endian words, pads an odd trailing byte with
/// zero, folds the carries and returns the complement. Over a buffer whose
/// checksum field is zeroed this yields the value to store; over a buffer
/// carrying its own correct checksum it yields zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_segment_equals_constructed_one() {
        for seg in [
            Segment::data(1, 2, 0, b"abc".to_vec()),
            Segment::control(SegmentType::Fin, 7, 8, 300),
            Segment::data_ack(9, 10, 3000),
        ] {
            assert_eq!(Segment::decode(&seg.encode()).unwrap(), seg);
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let seg = Segment::data(4000, 5000, 1500, b"hello".to_vec());
        let decoded = Segment::decode(&seg.encode()).unwrap();
        assert_eq!(decoded.header.seg_type, SegmentType::Data);
        assert_eq!(decoded.header.src_port, 4000);
        assert_eq!(decoded.header.dest_port, 5000);
        assert_eq!(decoded.header.seq, 1500);
        assert_eq!(decoded.header.length, 5);
        assert_eq!(decoded.data, b"hello");
    }

    #[test]
    fn encoded_segment_checksums_to_zero() {
        let payloads: [&[u8]; 5] = [b"", b"a", b"odd", b"even", &[0xff; 1500]];
        for payload in payloads {
            let bytes = Segment::data(1, 2, 3, payload.to_vec()).encode();
            assert_eq!(checksum(&bytes), 0, "payload len {}", payload.len());
        }
    }

    #[test]
    fn checksum_field_is_written_big_endian() {
        let bytes = Segment::control(SegmentType::Syn, 7, 8, 0).encode();
        let mut zeroed = bytes.clone();
        zeroed[OFF_CHECKSUM] = 0;
        zeroed[OFF_CHECKSUM + 1] = 0;
        let expected = checksum(&zeroed);
        assert_eq!(&bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2], &expected.to_be_bytes());
    }

    #[test]
    fn odd_trailing_byte_is_zero_padded() {
        // [0x12] is summed as the word 0x1200.
        assert_eq!(checksum(&[0x12]), !0x1200);
        assert_eq!(checksum(&[0x12, 0x00]), checksum(&[0x12]));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1]),
            Err(SegmentError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Segment::data(1, 2, 0, b"data".to_vec()).encode();
        bytes.pop();
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::LengthMismatch));
    }

    #[test]
    fn decode_oversized_length_returns_error() {
        let mut bytes = Segment::control(SegmentType::Fin, 1, 2, 0).encode();
        put_u32(&mut bytes, OFF_LENGTH, MAX_SEG_LEN as u32 + 1);
        assert_eq!(
            Segment::decode(&bytes),
            Err(SegmentError::Oversized(MAX_SEG_LEN as u32 + 1))
        );
    }

    #[test]
    fn decode_flipped_bit_returns_checksum_error() {
        let mut bytes = Segment::data(1, 2, 0, b"test".to_vec()).encode();
        bytes[HEADER_LEN + 1] ^= 0x10;
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::ChecksumFailed));
    }

    #[test]
    fn decode_unknown_type_with_valid_checksum() {
        let mut bytes = Segment::control(SegmentType::Syn, 1, 2, 0).encode();
        put_u32(&mut bytes, OFF_TYPE, 42);
        bytes[OFF_CHECKSUM] = 0;
        bytes[OFF_CHECKSUM + 1] = 0;
        let csum = checksum(&bytes);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::UnknownType(42)));
    }

    #[test]
    fn data_ack_carries_ack_number() {
        let seg = Segment::decode(&Segment::data_ack(9, 10, 3000).encode()).unwrap();
        assert_eq!(seg.header.seg_type, SegmentType::DataAck);
        assert_eq!(seg.header.ack, 3000);
        assert!(seg.data.is_empty());
    }

    #[test]
    fn expected_len_needs_full_header() {
        let bytes = Segment::data(1, 2, 0, vec![0u8; 10]).encode();
        assert_eq!(Segment::expected_len(&bytes[..HEADER_LEN - 1]), None);
        assert_eq!(Segment::expected_len(&bytes[..HEADER_LEN]), Some(HEADER_LEN + 10));
    }

    #[test]
    fn header_len_constant_is_correct() {
        // type + src + dest + seq + ack + length (4 each) + checksum (2)
        assert_eq!(HEADER_LEN, 6 * 4 + 2);
    }
}
