//! Decoders for the two dense, bit-packed telemetry message bodies (#22
//! attitude/velocity/status, #23 GPS). Both formats cram several narrow
//! signed and unsigned fields into shared 32-bit words, so fields are
//! described declaratively as [`BitField`]s and unpacked through one
//! shared [`read_bitfield`] helper rather than hand-inlining the
//! shift/mask/sign-extend for each one.

use crate::event::{HoldMode, Telemetry22, Telemetry23};
use std::convert::TryInto;

/// Describes one field packed into a 32-bit word: its bit offset (from the
/// LSB), its width, and whether it should be sign-extended.
#[derive(Debug, Clone, Copy)]
struct BitField {
    offset: u32,
    width: u32,
    signed: bool,
}

const fn field(offset: u32, width: u32, signed: bool) -> BitField {
    BitField {
        offset,
        width,
        signed,
    }
}

/// Extracts and (optionally) sign-extends `field` out of `word`.
fn read_bitfield(word: u32, field: BitField) -> i32 {
    let mask = if field.width >= 32 {
        u32::MAX
    } else {
        (1u32 << field.width) - 1
    };
    let raw = (word >> field.offset) & mask;
    if field.signed && field.width < 32 && raw & (1 << (field.width - 1)) != 0 {
        (raw | !mask) as i32
    } else {
        raw as i32
    }
}

fn le_u32(body: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(body[at..at + 4].try_into().unwrap())
}

fn le_u16(body: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(body[at..at + 2].try_into().unwrap())
}

const ROLL: BitField = field(0, 11, true);
const PITCH: BitField = field(11, 11, true);
const YAW: BitField = field(22, 10, true);

fn decode_attitude(word: u32) -> (f32, f32, f32) {
    let roll = read_bitfield(word, ROLL) as f32 / 10.0;
    let pitch = read_bitfield(word, PITCH) as f32 / 10.0;
    let yaw = read_bitfield(word, YAW) as f32;
    (roll, pitch, yaw)
}

/// Decodes telemetry message #22 (attitude, velocity, status) from its
/// 29-byte body (subtype and mode already stripped).
pub(crate) fn decode_telemetry22(body: &[u8]) -> Option<Telemetry22> {
    if body.len() < 29 {
        return None;
    }

    let (roll_deg, pitch_deg, yaw_deg) = decode_attitude(le_u32(body, 0));
    let packet_loss = body[4];
    let rssi = body[5];
    let throttle = le_u16(body, 6);
    let alt_pressure_m = le_u16(body, 8) as i16 as f32 / 10.0;

    let mag_word = le_u32(body, 10);
    let btemp = body[14];
    let mag_x = read_bitfield(mag_word, field(0, 13, true));
    let mag_y = read_bitfield(mag_word, field(13, 13, true));
    // The top 6 bits of mag_word and btemp together form one 13-bit signed
    // value; each half is unsigned on its own, and only the combined value
    // gets sign-extended.
    let mag_z_low6 = read_bitfield(mag_word, field(26, 6, false)) as u32;
    let mag_z_combined = mag_z_low6 | (u32::from(btemp) << 6);
    let mag_z = read_bitfield(mag_z_combined, field(0, 13, true));

    let vel_word = le_u32(body, 15);
    let vel_n_mps = read_bitfield(vel_word, field(0, 10, true)) as f32 / 10.0;
    let vel_e_mps = read_bitfield(vel_word, field(10, 10, true)) as f32 / 10.0;
    let vel_d_mps = read_bitfield(vel_word, field(20, 10, true)) as f32 / 10.0;

    let err_word = le_u32(body, 19);
    let err_n_raw = read_bitfield(err_word, field(0, 10, true));
    let err_e_raw = read_bitfield(err_word, field(10, 10, true));
    let err_d_raw = read_bitfield(err_word, field(20, 10, true));
    // Bits 30/31 don't mark the value missing, only whether it's still
    // scaled by 10 or reported raw.
    let err_n_unscaled = err_word & (1 << 30) != 0;
    let err_e_unscaled = err_word & (1 << 30) != 0;
    let err_d_unscaled = err_word & (1 << 31) != 0;
    let err_n = if err_n_unscaled { err_n_raw as f32 } else { err_n_raw as f32 / 10.0 };
    let err_e = if err_e_unscaled { err_e_raw as f32 } else { err_e_raw as f32 / 10.0 };
    let err_d = if err_d_unscaled { err_d_raw as f32 } else { err_d_raw as f32 / 10.0 };

    let batt_heli = body[23] as f32 / 10.0;
    let time_flight_s = u32::from(le_u16(body, 24)) * 40;
    let svs = body[26] & 0x1F;
    let hold_mode = HoldMode::from_bits((body[26] & 0xE0) >> 5);
    let current = body[27] as f32 / 10.0;
    let picture = body[28];

    Some(Telemetry22 {
        roll_deg,
        pitch_deg,
        yaw_deg,
        packet_loss,
        rssi,
        throttle,
        alt_pressure_m,
        mag_x,
        mag_y,
        mag_z,
        vel_n_mps,
        vel_e_mps,
        vel_d_mps,
        err_n,
        err_e,
        err_d,
        batt_heli,
        time_flight_s,
        svs,
        hold_mode,
        current,
        picture,
    })
}

/// Decodes a packed geographic coordinate: a signed 9-bit whole-degree part
/// in the top bits and an unsigned 23-bit microdegree fraction below it,
/// combined with the whole part's sign.
fn decode_coordinate(word: u32) -> f64 {
    let degrees = read_bitfield(word, field(23, 9, true));
    let fraction = read_bitfield(word, field(0, 23, false)) as f64 / 1_000_000.0;
    if degrees < 0 {
        f64::from(degrees) - fraction
    } else {
        f64::from(degrees) + fraction
    }
}

/// Decodes telemetry message #23 (GPS position and accuracy) from its
/// 29-byte body (subtype and mode already stripped).
pub(crate) fn decode_telemetry23(body: &[u8]) -> Option<Telemetry23> {
    if body.len() < 29 {
        return None;
    }

    let (roll_deg, pitch_deg, yaw_deg) = decode_attitude(le_u32(body, 0));
    let packet_loss = body[4];
    let rssi = body[5];
    let throttle = le_u16(body, 6);
    let alt_pressure_m = le_u16(body, 8) as i16 as f32 / 10.0;
    let alt_gps_m = le_u16(body, 10) as i16 as f32;

    let latitude_deg = decode_coordinate(le_u32(body, 12));
    let longitude_deg = decode_coordinate(le_u32(body, 16));

    let acc_word = le_u32(body, 20);
    let pdop = read_bitfield(acc_word, field(0, 10, false)) as f32 / 10.0;
    let hacc_m = read_bitfield(acc_word, field(10, 11, false)) as f32 / 10.0;
    let vacc_m = read_bitfield(acc_word, field(21, 11, false)) as f32 / 10.0;

    let time_word = le_u32(body, 24);
    let gps_time_ms = read_bitfield(time_word, field(0, 20, false)) as u32 * 1000;
    let temp_raw = read_bitfield(time_word, field(20, 12, true));
    let temperature_c = if temp_raw == 0x7FF {
        None
    } else {
        Some(temp_raw as f32 * 0.0625)
    };

    let tilt = body[28];

    Some(Telemetry23 {
        roll_deg,
        pitch_deg,
        yaw_deg,
        packet_loss,
        rssi,
        throttle,
        alt_pressure_m,
        alt_gps_m,
        latitude_deg,
        longitude_deg,
        pdop,
        hacc_m,
        vacc_m,
        gps_time_ms,
        temperature_c,
        tilt,
    })
}
