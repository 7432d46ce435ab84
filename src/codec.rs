//! Delimiter framing shared by every byte-stream link.
//!
//! A frame is `!&` + body + `!#`. Segments on the transport hand-off and
//! packets on overlay links both use it; only the body differs.
//!
//! [`FrameDecoder`] is a byte-at-a-time scanner with four states:
//!
//! ```text
//!            '!'             '&'
//!   Idle ──────────▶ StartSeen ──────▶ Collecting ◀─────────┐
//!    ▲                   │ other           │ '!'            │ other
//!    └───────────────────┘                 ▼                │
//!    ▲                               EndTentative ──────────┘
//!    │            '#' + body complete      │
//!    └─────────────────────────────────────┘
//! ```
//!
//! A tentative end marker is only accepted when the collected body is exactly
//! as long as its own header announces; otherwise the marker bytes are kept as
//! body bytes and collection continues. A body that outgrows its announced
//! length (or `max_body`) is abandoned and the scanner re-arms on the next
//! start marker.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const START_MARKER: [u8; 2] = *b"!&";
pub const END_MARKER: [u8; 2] = *b"!#";

/// Reports the full body length once enough of the body is known.
pub type LengthFn = fn(&[u8]) -> Option<usize>;

/// Wrap `body` in start and end markers.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&START_MARKER);
    out.extend_from_slice(body);
    out.extend_from_slice(&END_MARKER);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    StartSeen,
    Collecting,
    EndTentative,
}

/// Incremental frame scanner.
#[derive(Debug)]
pub struct FrameDecoder {
    state: ScanState,
    body: Vec<u8>,
    expected_len: LengthFn,
    max_body: usize,
}

impl FrameDecoder {
    pub fn new(expected_len: LengthFn, max_body: usize) -> Self {
        Self {
            state: ScanState::Idle,
            body: Vec::new(),
            expected_len,
            max_body,
        }
    }

    /// Feed one byte. Returns the body of a frame when `byte` completes one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            ScanState::Idle => {
                if byte == START_MARKER[0] {
                    self.state = ScanState::StartSeen;
                }
            }
            ScanState::StartSeen => {
                self.state = if byte == START_MARKER[1] {
                    self.body.clear();
                    ScanState::Collecting
                } else if byte == START_MARKER[0] {
                    ScanState::StartSeen
                } else {
                    ScanState::Idle
                };
            }
            ScanState::Collecting => {
                if byte == END_MARKER[0] {
                    self.state = ScanState::EndTentative;
                } else {
                    self.collect(&[byte]);
                }
            }
            ScanState::EndTentative => {
                if byte == END_MARKER[1] && self.body_complete() {
                    self.state = ScanState::Idle;
                    return Some(std::mem::take(&mut self.body));
                }
                if byte == END_MARKER[0] {
                    // The earlier '!' was data; this one may still start the end marker.
                    self.collect(&[END_MARKER[0]]);
                } else {
                    self.state = ScanState::Collecting;
                    self.collect(&[END_MARKER[0], byte]);
                }
            }
        }
        None
    }

    /// `true` while a frame is partially collected.
    pub fn in_frame(&self) -> bool {
        matches!(self.state, ScanState::Collecting | ScanState::EndTentative)
    }

    fn body_complete(&self) -> bool {
        (self.expected_len)(&self.body) == Some(self.body.len())
    }

    fn collect(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
        let overrun = match (self.expected_len)(&self.body) {
            Some(expected) => self.body.len() > expected,
            None => false,
        };
        if overrun || self.body.len() > self.max_body {
            log::debug!("[codec] abandoning malformed frame after {} bytes", self.body.len());
            self.body.clear();
            self.state = ScanState::Idle;
        }
    }
}

/// Read bytes until `decoder` yields a frame body.
///
/// Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, decoder: &mut FrameDecoder) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if decoder.in_frame() {
                log::debug!("[codec] stream ended inside a frame");
            }
            return Ok(None);
        }

        let mut consumed = 0;
        let mut complete = None;
        for &byte in available {
            consumed += 1;
            if let Some(body) = decoder.push(byte) {
                complete = Some(body);
                break;
            }
        }
        reader.consume(consumed);

        if complete.is_some() {
            return Ok(complete);
        }
    }
}

/// Frame `body` and write it out in full.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&frame(body)).await?;
    writer.flush().await
}
