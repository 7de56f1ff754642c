//! GC2 frame reassembly
//!
//! The device streams text frames over a 64-byte interrupt endpoint. A frame
//! always starts at a packet boundary and may span several packets:
//!
//! ```text
//! packet 1: "0H\nSHOT_ID=1\nTIME_SEC=0\nMSEC_SINCE_CONTACT=1000\nSPEED_MPH=1"
//! packet 2: "61.20\nAZIMUTH_DEG=-1.10\n ... \nHMT=0\n\t"
//! ```
//!
//! A start packet begins with a two-byte discriminator (`0` plus an uppercase
//! letter) on its own line; the frame ends with `\n\t`. The decoder buffers
//! until the terminator arrives and emits exactly one [`DecodedMessage`] per
//! complete frame.
//!
//! Recovery is lossy by choice: a start packet arriving while a frame is
//! still pending discards the stale partial and begins the new frame.
//!
//! # Example
//! ```
//! use protocol::{DecodedMessage, FrameDecoder, FrameKind, encode_frame, split_packets};
//!
//! let frame = encode_frame(FrameKind::DeviceStatus, &[("FLAGS", "7"), ("BALLS", "1")]);
//! let mut decoder = FrameDecoder::new();
//! let decoded: Vec<_> = split_packets(&frame)
//!     .iter()
//!     .filter_map(|p| decoder.push_packet(p))
//!     .collect();
//! assert_eq!(decoded.len(), 1);
//! assert!(matches!(decoded[0], DecodedMessage::DeviceStatus(_)));
//! ```

use crate::constants::{FRAME_TERMINATOR, MAX_FRAME_SIZE, PACKET_SIZE};
use crate::error::DecodeError;
use crate::messages::{DecodedMessage, FrameKind};
use crate::types::RawPacket;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Idle,
    Frame(FrameKind),
    /// Discarding the rest of an unknown or oversized frame
    Skipping,
}

/// Counters for anomalies the decoder recovered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Complete frames decoded into messages
    pub frames_decoded: u64,
    /// Partial frames discarded because a newer frame started
    pub stale_frames_dropped: u64,
    /// Continuation packets seen with no frame pending
    pub orphan_packets: u64,
    /// Error messages produced (unknown type, oversize, bad encoding)
    pub errors: u64,
}

/// Reassembles packets into decoded messages
pub struct FrameDecoder {
    buffer: BytesMut,
    pending: Pending,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
            pending: Pending::Idle,
            stats: DecoderStats::default(),
        }
    }

    /// Feed one packet; returns a message when it completes a frame
    pub fn push_packet(&mut self, packet: &RawPacket) -> Option<DecodedMessage> {
        self.push(packet.as_bytes())
    }

    /// Feed one packet's bytes; returns a message when they complete a frame
    pub fn push(&mut self, packet: &[u8]) -> Option<DecodedMessage> {
        let bytes = trim_padding(packet);
        if bytes.is_empty() {
            return None;
        }

        if let Some(letter) = start_marker(bytes) {
            return self.start_frame(letter, &bytes[2..]);
        }

        match self.pending {
            Pending::Idle => {
                self.stats.orphan_packets += 1;
                warn!(
                    "Dropping continuation packet with no frame pending ({} bytes)",
                    bytes.len()
                );
                None
            }
            Pending::Frame(kind) => self.append(kind, bytes),
            Pending::Skipping => {
                self.skip(bytes);
                None
            }
        }
    }

    /// Discard any partial frame; used at session start
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = Pending::Idle;
    }

    /// Whether a partial frame is buffered
    pub fn has_partial(&self) -> bool {
        matches!(self.pending, Pending::Frame(_))
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn start_frame(&mut self, letter: u8, rest: &[u8]) -> Option<DecodedMessage> {
        if let Pending::Frame(kind) = self.pending {
            self.stats.stale_frames_dropped += 1;
            warn!(
                "New frame started before {} frame completed, dropping {} buffered bytes",
                kind.marker(),
                self.buffer.len()
            );
        }
        self.buffer.clear();

        match FrameKind::from_marker(letter) {
            Some(kind) => {
                trace!("Frame start: {}", kind.marker());
                self.pending = Pending::Frame(kind);
                self.append(kind, rest)
            }
            None => {
                let marker = format!("0{}", letter as char);
                warn!("Unknown frame type {}", marker);
                self.pending = Pending::Skipping;
                self.skip(rest);
                Some(self.fail(DecodeError::UnknownFrameType { marker }))
            }
        }
    }

    fn append(&mut self, kind: FrameKind, bytes: &[u8]) -> Option<DecodedMessage> {
        // The terminator may straddle the previous packet
        let search_from = self.buffer.len().saturating_sub(1);
        self.buffer.extend_from_slice(bytes);

        if let Some(offset) = find_terminator(&self.buffer[search_from..]) {
            let end = search_from + offset;
            let trailing = self.buffer.len() - end - FRAME_TERMINATOR.len();
            if trailing > 0 {
                debug!("Discarding {} bytes after frame terminator", trailing);
            }
            let frame = self.buffer.split_to(end);
            self.buffer.clear();
            self.pending = Pending::Idle;
            return Some(self.finish(kind, &frame));
        }

        if self.buffer.len() > MAX_FRAME_SIZE {
            let size = self.buffer.len();
            warn!("{} frame exceeded {} bytes, dropping", kind.marker(), MAX_FRAME_SIZE);
            // Keep the last byte so a straddling terminator is still seen
            self.buffer.advance(size - 1);
            self.pending = Pending::Skipping;
            return Some(self.fail(DecodeError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            }));
        }

        None
    }

    fn skip(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if find_terminator(&self.buffer).is_some() {
            trace!("Skipped frame finished");
            self.buffer.clear();
            self.pending = Pending::Idle;
        } else if self.buffer.len() > 1 {
            let stale = self.buffer.len() - 1;
            self.buffer.advance(stale);
        }
    }

    fn finish(&mut self, kind: FrameKind, frame: &[u8]) -> DecodedMessage {
        match std::str::from_utf8(frame) {
            Ok(body) => {
                self.stats.frames_decoded += 1;
                debug!("Decoded {} frame ({} bytes)", kind.marker(), frame.len());
                DecodedMessage::from_frame(kind, body)
            }
            Err(e) => self.fail(DecodeError::InvalidUtf8(e)),
        }
    }

    fn fail(&mut self, err: DecodeError) -> DecodedMessage {
        self.stats.errors += 1;
        err.into()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Discriminator letter if `bytes` begins a new frame
fn start_marker(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [b'0', letter, rest @ ..]
            if letter.is_ascii_uppercase()
                && matches!(rest.first(), None | Some(b'\n') | Some(b'\r')) =>
        {
            Some(*letter)
        }
        _ => None,
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}

fn trim_padding(packet: &[u8]) -> &[u8] {
    let end = packet
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &packet[..end]
}

/// Encode a frame the way the device sends it
pub fn encode_frame(kind: FrameKind, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut text = String::from(kind.marker());
    for (key, value) in fields {
        text.push('\n');
        text.push_str(key);
        text.push('=');
        text.push_str(value);
    }
    text.push('\n');
    text.push('\t');
    text.into_bytes()
}

/// Chunk a byte stream into interrupt-sized packets
pub fn split_packets(bytes: &[u8]) -> Vec<RawPacket> {
    bytes.chunks(PACKET_SIZE).map(RawPacket::from_slice).collect()
}
