//! Byte-stream framing for the two wire dialects.
//!
//! [`Framer`] owns a receive buffer and turns a stream of incoming bytes
//! into whole frames. It never blocks and never loses synchronization for
//! long: a corrupt or implausible frame causes exactly one byte to be
//! dropped before the next parse attempt, so a stray false-positive start
//! byte inside garbage data can't wedge the parser.

use crate::codec::verify_checksum;
use crate::error::FrameFault;
use crate::utils::HexSlice;
use log::{debug, trace};

/// Start-of-frame byte for the radio-module dialect.
const RADIO_START: u8 = 0x7E;
/// Start-of-frame bytes for the wired dialect (either is accepted).
const WIRED_START: [u8; 2] = [0xFF, 0xFE];

/// Maximum radio-module frame payload length (inclusive), per the
/// radio-module's own framing limit.
const RADIO_MAX_LEN: u16 = 95;
/// Sanity cap on wired-dialect payload length. The protocol's length field
/// can address far more, but no real message is longer; treat anything
/// bigger as desync so the framer doesn't stall waiting for bytes that will
/// never arrive.
const WIRED_MAX_LEN: u16 = 200;

/// A complete, checksum/CRC-valid frame as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A radio-module frame: `0x7E | len | payload | checksum`. `payload`
    /// includes the radio-module API type byte as its first element.
    Radio { payload: Vec<u8> },
    /// A wired-dialect frame: `(0xFF|0xFE) | type | len | payload | crc`.
    ///
    /// `payload` is handed over with its trailing CRC still attached to the
    /// byte count the length field declared (i.e. it's `subtype | mode |
    /// body | padding`, not yet CRC-checked): wired messages are sometimes
    /// TEA-encrypted, and the CRC was computed over the plaintext before
    /// encryption, so it can only be verified after the message layer
    /// decrypts. The framer only guarantees the byte count is complete.
    Wired { msg_type: u8, payload: Vec<u8> },
}

/// Wraps an already-built radio-module payload (first byte is the API type)
/// as a complete `0x7E`-framed buffer, for the outbound side of the raw-frame
/// observation stream and for transmission.
pub(crate) fn wrap_radio(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(RADIO_START);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out.push(crate::codec::checksum(payload));
    out
}

/// Wraps an already-built, already-CRC'd-and-optionally-encrypted wired
/// message body (`subtype | mode | payload | padding | crc`) as a complete
/// `0xFF`-framed buffer.
pub(crate) fn wrap_wired(msg_type: u8, body_with_crc: &[u8]) -> Vec<u8> {
    let inner_len = body_with_crc.len() - 2;
    let mut out = Vec::with_capacity(body_with_crc.len() + 4);
    out.push(WIRED_START[0]);
    out.push(msg_type);
    out.extend_from_slice(&(inner_len as u16).to_be_bytes());
    out.extend_from_slice(body_with_crc);
    out
}

/// Incremental byte-stream framer. Feed it bytes as they arrive from a
/// transport; call [`Framer::parse`] after each feed to drain any frames
/// that have become complete.
pub(crate) struct Framer {
    wireless: bool,
    buf: Vec<u8>,
    /// Set once we've dropped a byte for resync, cleared once we parse a
    /// valid frame again — used only to avoid logging every single dropped
    /// byte during an extended burst of garbage.
    resyncing: bool,
}

impl Framer {
    pub(crate) fn new(wireless: bool) -> Self {
        Framer {
            wireless,
            buf: Vec::new(),
            resyncing: false,
        }
    }

    /// Appends newly-read bytes to the internal buffer.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drains as many complete frames as the buffer currently holds, paired
    /// with the exact raw bytes each one occupied on the wire (for the
    /// raw-frame observation stream).
    pub(crate) fn parse(&mut self) -> Vec<(Frame, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            match self.parse_one() {
                Ok(Some(frame)) => {
                    if self.resyncing {
                        debug!("framer resynced");
                        self.resyncing = false;
                    }
                    frames.push(frame);
                }
                Ok(None) => {
                    // `parse_one` returns `None` either because the buffer is
                    // empty, or because it just resynced onto a start byte
                    // further into the buffer — in the latter case there may
                    // be a whole frame sitting there right now, so loop back
                    // around and try again instead of waiting for the next
                    // `parse()` call.
                    if self.buf.is_empty() {
                        break;
                    }
                }
                Err(FrameFault::Incomplete) => break,
                Err(FrameFault::Corrupt) => {
                    if !self.resyncing {
                        debug!("framer lost sync, resyncing");
                        self.resyncing = true;
                    }
                    self.buf.remove(0);
                }
            }
        }
        frames
    }

    fn parse_one(&mut self) -> Result<Option<(Frame, Vec<u8>)>, FrameFault> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.wireless {
            self.parse_one_radio()
        } else {
            self.parse_one_wired()
        }
    }

    fn resync_to_next_start(&mut self, is_start: impl Fn(u8) -> bool) {
        if let Some(pos) = self.buf.iter().position(|&b| is_start(b)) {
            if pos > 0 {
                trace!("dropping {} bytes of garbage before next start byte", pos);
                self.buf.drain(0..pos);
            }
        } else {
            trace!("no start byte found, clearing {} bytes", self.buf.len());
            self.buf.clear();
        }
    }

    fn parse_one_radio(&mut self) -> Result<Option<(Frame, Vec<u8>)>, FrameFault> {
        if self.buf[0] != RADIO_START {
            self.resync_to_next_start(|b| b == RADIO_START);
            return Ok(None);
        }
        if self.buf.len() < 3 {
            return Err(FrameFault::Incomplete);
        }
        let len = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        if len == 0 || len > RADIO_MAX_LEN {
            return Err(FrameFault::Corrupt);
        }
        let total = 3 + len as usize + 1; // start+len + payload + checksum
        if self.buf.len() < total {
            return Err(FrameFault::Incomplete);
        }
        // Checksum covers payload + trailing checksum byte (offset 3..total).
        if !verify_checksum(&self.buf[3..total]) {
            return Err(FrameFault::Corrupt);
        }
        let payload = self.buf[3..total - 1].to_vec();
        let raw = self.buf[0..total].to_vec();
        trace!("radio frame in: {:?}", HexSlice(&raw));
        self.buf.drain(0..total);
        Ok(Some((Frame::Radio { payload }, raw)))
    }

    fn parse_one_wired(&mut self) -> Result<Option<(Frame, Vec<u8>)>, FrameFault> {
        if self.buf[0] != WIRED_START[0] && self.buf[0] != WIRED_START[1] {
            self.resync_to_next_start(|b| b == WIRED_START[0] || b == WIRED_START[1]);
            return Ok(None);
        }
        if self.buf.len() < 4 {
            return Err(FrameFault::Incomplete);
        }
        let msg_type = self.buf[1];
        let len = u16::from_be_bytes([self.buf[2], self.buf[3]]);
        if len > WIRED_MAX_LEN {
            return Err(FrameFault::Corrupt);
        }
        let total = 4 + len as usize + 2; // header + payload + crc
        if self.buf.len() < total {
            return Err(FrameFault::Incomplete);
        }
        // CRC is deferred to the message layer: see the `Frame::Wired` doc
        // comment. Bytes 4..total here are `payload | crc`; the trailing
        // CRC rides along in `payload` so the message layer can check it
        // after decrypting.
        let payload = self.buf[4..total].to_vec();
        let raw = self.buf[0..total].to_vec();
        trace!("wired frame in: {:?}", HexSlice(&raw));
        self.buf.drain(0..total);
        Ok(Some((Frame::Wired { msg_type, payload }, raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{checksum, crc16};

    fn radio_frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![RADIO_START];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out.push(checksum(payload));
        out
    }

    fn wired_frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFFu8, msg_type];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        let crc = crc16(&out[1..]);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn parses_single_radio_frame() {
        let mut framer = Framer::new(true);
        framer.feed(&radio_frame(&[0x80, 0x01, 0x02]));
        let frames: Vec<Frame> = framer.parse().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            frames,
            vec![Frame::Radio {
                payload: vec![0x80, 0x01, 0x02]
            }]
        );
    }

    #[test]
    fn parses_single_wired_frame() {
        let raw = wired_frame(0x01, &[0xAA, 0xBB]);
        let expected_payload = raw[4..].to_vec();
        let mut framer = Framer::new(false);
        framer.feed(&raw);
        let frames: Vec<Frame> = framer.parse().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            frames,
            vec![Frame::Wired {
                msg_type: 0x01,
                payload: expected_payload,
            }]
        );
    }

    #[test]
    fn idempotent_byte_at_a_time_vs_all_at_once() {
        let mut data = Vec::new();
        data.extend(radio_frame(&[0x80, 1, 2, 3]));
        data.extend(radio_frame(&[0xF8, 0]));

        let mut whole = Framer::new(true);
        whole.feed(&data);
        let whole_frames: Vec<Frame> = whole.parse().into_iter().map(|(f, _)| f).collect();

        let mut incremental = Framer::new(true);
        let mut inc_frames = Vec::new();
        for &b in &data {
            incremental.feed(&[b]);
            inc_frames.extend(incremental.parse().into_iter().map(|(f, _)| f));
        }

        assert_eq!(whole_frames, inc_frames);
        assert_eq!(whole_frames.len(), 2);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let mut framer = Framer::new(true);
        let mut data = vec![0x01, 0x02, 0x03];
        data.extend(radio_frame(&[0xF8, 0]));
        framer.feed(&data);
        let frames: Vec<Frame> = framer.parse().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            frames,
            vec![Frame::Radio {
                payload: vec![0xF8, 0]
            }]
        );
    }

    #[test]
    fn resyncs_past_false_start_with_bad_checksum() {
        let mut framer = Framer::new(true);
        let mut data = vec![RADIO_START, 0x00, 0x02, 0xAA, 0xBB, 0x00]; // bad checksum
        data.extend(radio_frame(&[0xF8, 0]));
        framer.feed(&data);
        let frames: Vec<Frame> = framer.parse().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            frames,
            vec![Frame::Radio {
                payload: vec![0xF8, 0]
            }]
        );
    }

    #[test]
    fn waits_for_incomplete_frame() {
        let mut framer = Framer::new(true);
        let full = radio_frame(&[0x80, 1, 2, 3]);
        framer.feed(&full[..full.len() - 1]);
        assert!(framer.parse().is_empty());
        framer.feed(&full[full.len() - 1..]);
        assert_eq!(framer.parse().len(), 1);
    }

    #[test]
    fn radio_rejects_zero_and_oversize_length() {
        let mut framer = Framer::new(true);
        framer.feed(&[RADIO_START, 0x00, 0x00]);
        assert!(framer.parse().is_empty());
        // Length 0 should have been dropped; buffer now has 2 leftover bytes,
        // neither of which is a start byte, so it's empty.
        assert_eq!(framer.buf.len(), 0);
    }

    #[test]
    fn wired_accepts_either_start_byte() {
        for start in [0xFFu8, 0xFE] {
            let mut framer = Framer::new(false);
            let mut frame = wired_frame(0x02, &[1, 2, 3]);
            frame[0] = start;
            framer.feed(&frame);
            assert_eq!(framer.parse().len(), 1);
        }
    }
}
