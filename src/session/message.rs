//! Construction and parsing of vehicle-layer messages: the small fixed-shape
//! handshake packets (identify, acquire, query, alarm ack) and the general
//! configuration-message envelope (padding, CRC placement, selective TEA
//! encryption) used for everything else.

use crate::bytes::ByteWriter;
use crate::codec::{crc16, tea_decrypt, tea_encrypt, TEA_KEY};
use crate::framer::{wrap_wired, Frame};

/// Radio-module broadcast address, used for the enumeration identify
/// request (no specific vehicle is addressed yet).
pub(crate) const BROADCAST_ADDRESS: u64 = 0x0000_0000_0000_FFFF;

fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc16(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// `0xF8 | 0x00 | crc` — enumeration identify request.
pub(crate) fn build_identify_request() -> Vec<u8> {
    let mut buf = vec![0xF8u8, 0x00];
    append_crc(&mut buf);
    buf
}

/// `mode | localAddress:u64 LE | crc` — wireless connect handshake, step 1.
pub(crate) fn build_acquire(config_mode: bool, local_address: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11);
    let mut w = ByteWriter::new(&mut buf);
    w.write_u8(if config_mode { 0xFE } else { 0x00 });
    w.write_u64_le(local_address);
    append_crc(&mut buf);
    buf
}

/// `0x01 | crc` — wireless connect handshake, step 2.
pub(crate) fn build_query() -> Vec<u8> {
    let mut buf = vec![0x01u8];
    append_crc(&mut buf);
    buf
}

/// `0x04 | 0x01 | crc` — alarm acknowledgement.
pub(crate) fn build_alarm_ack() -> Vec<u8> {
    let mut buf = vec![0x04u8, 0x01];
    append_crc(&mut buf);
    buf
}

/// Rounds `n` up to the next multiple of 8, matching the configuration
/// message body's padding rule.
fn padded(n: usize) -> usize {
    if n % 8 == 0 {
        n
    } else {
        ((n >> 3) + 1) << 3
    }
}

/// Builds a full configuration message: `0xFF | type | len:u16 BE | subtype |
/// mode | payload | zero-pad | crc:u16 LE`, with the `subtype..pad` region
/// TEA-encrypted unless `msg_type` is `0x06` (bypass messages travel
/// unencrypted).
pub(crate) fn build_config_message(msg_type: u8, subtype: u8, mode: u8, payload: &[u8]) -> Vec<u8> {
    let inner_len = padded(payload.len() + 2);

    // CRC covers type | len | subtype | mode | payload | pad, i.e. the frame
    // header's type/len bytes plus the body, before the body is encrypted.
    let mut body = Vec::with_capacity(inner_len + 2);
    body.push(subtype);
    body.push(mode);
    body.extend_from_slice(payload);
    body.resize(inner_len, 0);

    let mut crc_input = Vec::with_capacity(3 + inner_len);
    crc_input.push(msg_type);
    crc_input.extend_from_slice(&(inner_len as u16).to_be_bytes());
    crc_input.extend_from_slice(&body);
    let crc = crc16(&crc_input);
    body.extend_from_slice(&crc.to_le_bytes());

    if msg_type != 0x06 {
        tea_encrypt(&mut body, &TEA_KEY, 0, inner_len);
    }
    wrap_wired(msg_type, &body)
}

/// A configuration message once CRC-checked and, where applicable,
/// decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigMessage {
    pub(crate) msg_type: u8,
    pub(crate) subtype: u8,
    pub(crate) mode: u8,
    pub(crate) body: Vec<u8>,
}

/// Decrypts (where applicable) and CRC-checks a decoded [`Frame::Wired`].
/// `msg_type` and `payload` come straight off the framer; `payload` is
/// `subtype | mode | body | padding | crc`, per the framer's own doc
/// comment on why CRC verification is deferred this far.
///
/// Per the open question this crate settled on: type `0x0A` is, like `0x06`,
/// treated as never encrypted on receipt (construction only ever leaves
/// `0x06` unencrypted, but CRC validity is the real gate here regardless of
/// which interpretation produced the bytes).
pub(crate) fn parse_config_message(frame: &Frame) -> Option<ConfigMessage> {
    let (msg_type, payload) = match frame {
        Frame::Wired { msg_type, payload } => (*msg_type, payload.clone()),
        Frame::Radio { .. } => return None,
    };
    if payload.len() < 2 {
        return None;
    }
    let declared_len = payload.len() - 2;
    let mut payload = payload;
    if msg_type != 0x06 && msg_type != 0x0A {
        tea_decrypt(&mut payload, &TEA_KEY, 0, declared_len);
    }

    let mut crc_input = Vec::with_capacity(3 + payload.len());
    crc_input.push(msg_type);
    crc_input.extend_from_slice(&(declared_len as u16).to_be_bytes());
    crc_input.extend_from_slice(&payload);
    if crc16(&crc_input) != 0 {
        return None;
    }

    let subtype = payload[0];
    let mode = payload[1];
    let body = payload[2..declared_len].to_vec();
    Some(ConfigMessage {
        msg_type,
        subtype,
        mode,
        body,
    })
}

/// Decodes a bypass-mode IMU reading: six signed 16-bit little-endian words.
pub(crate) fn decode_imu(body: &[u8]) -> Option<[i16; 6]> {
    if body.len() < 12 {
        return None;
    }
    let mut out = [0i16; 6];
    for (i, chunk) in body[..12].chunks_exact(2).enumerate() {
        out[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
    Some(out)
}

/// Decodes an EEPROM reply's throttle-mode bit.
pub(crate) fn decode_throttle_mode(mode_byte: u8) -> bool {
    mode_byte & 0x1 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_request_matches_fixture() {
        let req = build_identify_request();
        assert_eq!(req[0..2], [0xF8, 0x00]);
        assert_eq!(crc16(&req), 0);
    }

    #[test]
    fn acquire_is_eleven_bytes_with_valid_crc() {
        let msg = build_acquire(false, 0xAABBCCDDEEFF0011);
        assert_eq!(msg.len(), 11);
        assert_eq!(msg[0], 0x00);
        assert_eq!(crc16(&msg), 0);
    }

    #[test]
    fn config_message_round_trips_through_parse() {
        let raw = build_config_message(2, 16, 0, &[]);
        // raw = 0xFF | type | len(2) | body(padded) | crc -- strip the 4-byte
        // header the framer would otherwise have consumed.
        let payload = raw[4..].to_vec();
        let frame = Frame::Wired {
            msg_type: 2,
            payload,
        };
        let parsed = parse_config_message(&frame).expect("valid message");
        assert_eq!(parsed.msg_type, 2);
        assert_eq!(parsed.subtype, 16);
        assert_eq!(parsed.mode, 0);
    }

    #[test]
    fn bypass_messages_are_not_encrypted() {
        let raw = build_config_message(6, 1, 1, &[0xAAu8; 16]);
        // subtype/mode land in plaintext right after the 4-byte header.
        assert_eq!(raw[4], 1); // subtype
        assert_eq!(raw[5], 1); // mode
    }

    #[test]
    fn non_bypass_messages_are_encrypted() {
        let raw = build_config_message(2, 16, 0, &[0x42]);
        // subtype/mode are scrambled; only decrypting recovers them.
        assert_ne!(raw[4], 16);
    }

    #[test]
    fn rejects_corrupted_crc() {
        let raw = build_config_message(6, 1, 1, &[0u8; 16]);
        let mut payload = raw[4..].to_vec();
        *payload.last_mut().unwrap() ^= 0xFF;
        let frame = Frame::Wired {
            msg_type: 6,
            payload,
        };
        assert!(parse_config_message(&frame).is_none());
    }

    #[test]
    fn decodes_imu_sample() {
        let mut body = Vec::new();
        for v in [-1i16, 2, -3, 4, -5, 6] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_imu(&body), Some([-1, 2, -3, 4, -5, 6]));
    }
}
