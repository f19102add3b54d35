//! The small subset of the radio module's own command protocol this crate
//! needs: set channel, read the module's local address, send an addressed
//! unicast, and recognize reset/status events. Not a general-purpose driver
//! for the module.

use crate::bytes::{ByteReader, ByteWriter};
use crate::codec::checksum;
use crate::framer::Frame;

/// Maximum payload bytes per addressed-transmit chunk; larger transmits are
/// split across consecutive chunks, mirroring the reference client's own
/// chunking loop.
const MAX_TX_CHUNK: usize = 85;

/// Builds a radio-module frame `0x7E | len | payload | checksum` around an
/// arbitrary payload.
fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(0x7E);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out.push(checksum(payload));
    out
}

/// `AT`-style set-channel command.
pub(crate) fn set_channel(channel: u8) -> Vec<u8> {
    wrap(&[0x08, 0x00, b'C', b'H', channel])
}

/// Queries one half of the module's local 64-bit address. `high` selects
/// `SH` (upper 32 bits) vs `SL` (lower 32 bits).
pub(crate) fn get_local_address(high: bool) -> Vec<u8> {
    let letter = if high { b'H' } else { b'L' };
    wrap(&[0x08, 0x01, b'S', letter])
}

/// Builds the addressed-transmit chunks needed to deliver `payload` to
/// `dest`, splitting at [`MAX_TX_CHUNK`] bytes.
pub(crate) fn addressed_transmit(dest: u64, payload: &[u8]) -> Vec<Vec<u8>> {
    split_chunks(payload, MAX_TX_CHUNK)
        .into_iter()
        .map(|chunk| {
            let mut body = Vec::with_capacity(chunk.len() + 11);
            let mut w = ByteWriter::new(&mut body);
            w.write_u8(0x00);
            w.write_u8(0x00);
            w.write_u64_be(dest);
            w.write_u8(0x01); // options: no ack
            w.write_slice(chunk);
            wrap(&body)
        })
        .collect()
}

/// Splits `payload` into chunks of at most `max` bytes, preserving order.
/// A zero-length payload yields a single empty chunk (so callers always
/// send at least one addressed-transmit frame).
pub(crate) fn split_chunks(payload: &[u8], max: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![&payload[0..0]];
    }
    payload.chunks(max).collect()
}

/// A decoded inbound radio-module event of interest to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RadioEvent {
    /// `0x80`: a 64-bit-addressed receive carrying a vehicle-layer payload.
    Receive { src: u64, payload: Vec<u8> },
    /// `0x88`: an AT response. Only `status == 0` responses carry a usable
    /// value; others are dropped by the caller.
    AddressHalf { high: bool, status: u8, value: u32 },
    /// `0x8A`: module status. `reset == true` means the module power-cycled
    /// and channel state must be reasserted.
    ModuleStatus { reset: bool },
    /// Recognized API type but not one this crate acts on.
    Other,
}

/// Interprets a [`Frame::Radio`] payload as a radio-module API frame.
/// Returns `None` for frames too short to carry a recognizable API type.
pub(crate) fn decode(frame: &Frame) -> Option<RadioEvent> {
    let payload = match frame {
        Frame::Radio { payload } => payload,
        Frame::Wired { .. } => return None,
    };
    let (&api_type, rest) = payload.split_first()?;
    match api_type {
        0x80 => {
            let mut r = ByteReader::new(rest);
            let src = r.read_u64_be().ok()?;
            let _rssi = r.read_u8().ok()?;
            let _options = r.read_u8().ok()?;
            let payload = r.into_rest().to_vec();
            Some(RadioEvent::Receive { src, payload })
        }
        0x88 => {
            let mut r = ByteReader::new(rest);
            let _frame_id = r.read_u8().ok()?;
            if r.read_u8().ok()? != b'S' {
                return Some(RadioEvent::Other);
            }
            let high = match r.read_u8().ok()? {
                b'H' => true,
                b'L' => false,
                _ => return Some(RadioEvent::Other),
            };
            let status = r.read_u8().ok()?;
            let value = if r.bytes_left() >= 4 {
                r.read_u32_be().unwrap_or(0)
            } else {
                0
            };
            Some(RadioEvent::AddressHalf {
                high,
                status,
                value,
            })
        }
        0x8A => {
            let reset = rest.first() == Some(&0);
            Some(RadioEvent::ModuleStatus { reset })
        }
        _ => Some(RadioEvent::Other),
    }
}

/// Assembles a 64-bit local address from its two 32-bit halves, in the
/// order the reference client latches them: `SL` (low) must arrive before
/// `SH` (high) is accepted, mirroring its `haveMacLow` gate.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LocalAddress {
    low: Option<u32>,
    high: Option<u32>,
}

impl LocalAddress {
    pub(crate) fn reset(&mut self) {
        *self = LocalAddress::default();
    }

    pub(crate) fn have_low(&self) -> bool {
        self.low.is_some()
    }

    /// Records a half-address reply. `SH` is ignored until `SL` has been
    /// recorded, matching the reference gate.
    pub(crate) fn record(&mut self, high: bool, value: u32) {
        if high {
            if self.low.is_some() {
                self.high = Some(value);
            }
        } else {
            self.low = Some(value);
        }
    }

    /// The assembled 64-bit address, once both halves are present.
    pub(crate) fn assembled(&self) -> Option<u64> {
        match (self.low, self.high) {
            (Some(low), Some(high)) => Some((u64::from(high) << 32) | u64::from(low)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_split_at_boundary() {
        let payload = vec![0u8; 85];
        assert_eq!(split_chunks(&payload, 85).len(), 1);
        let payload = vec![0u8; 86];
        let chunks = split_chunks(&payload, 85);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 85);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn set_channel_frame_matches_fixture() {
        let frame = set_channel(0x0E);
        assert_eq!(
            frame,
            vec![0x7E, 0x00, 0x05, 0x08, 0x00, b'C', b'H', 0x0E, checksum(&[0x08, 0x00, b'C', b'H', 0x0E])]
        );
    }

    #[test]
    fn get_local_address_frame_matches_fixture() {
        let frame = get_local_address(false);
        assert_eq!(
            frame,
            vec![0x7E, 0x00, 0x04, 0x08, 0x01, b'S', b'L', checksum(&[0x08, 0x01, b'S', b'L'])]
        );
    }

    #[test]
    fn local_address_ignores_high_before_low() {
        let mut addr = LocalAddress::default();
        addr.record(true, 0x5566);
        assert!(addr.assembled().is_none());
        addr.record(false, 0x1122_3344);
        assert!(addr.have_low());
        addr.record(true, 0x5566);
        assert_eq!(addr.assembled(), Some(0x0000_5566_1122_3344));
    }

    #[test]
    fn decodes_addressed_receive() {
        let mut payload = vec![0x80u8];
        payload.extend_from_slice(&0xAABBCCDDEEFF0011u64.to_be_bytes());
        payload.push(0x50); // rssi
        payload.push(0x00); // options
        payload.extend_from_slice(&[0xF8, 0x00]);
        let frame = Frame::Radio { payload };
        match decode(&frame) {
            Some(RadioEvent::Receive { src, payload }) => {
                assert_eq!(src, 0xAABBCCDDEEFF0011);
                assert_eq!(payload, vec![0xF8, 0x00]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
