//! The 50 Hz control multiplexer: packs eight logical control inputs (roll,
//! pitch, throttle, yaw, tilt, ascent, hold, shutter — aux channels are
//! reserved and always sent zeroed) into the round-robin radio control
//! frames the vehicle expects, plus the two alternate encodings used outside
//! normal flight: wired bypass (direct motor speeds) and configuration mode
//! (all ten channels in one message).

use crate::bytes::ByteWriter;
use crate::codec::crc16;
use crate::session::message::build_config_message;

/// Maps a logical input index to its output channel slot:
/// `[roll, pitch, throttle, yaw, tilt, ascent, hold, shutter, aux x8]`.
const TX_MAP: [usize; 16] = [1, 2, 0, 3, 7, 5, 8, 4, 6, 9, 10, 11, 12, 13, 14, 15];

/// Index of the throttle input within the logical input array.
const THROTTLE_INPUT: usize = 2;
/// Index of the hold input within the logical input array.
const HOLD_INPUT: usize = 6;

/// The eight logical control inputs, each a percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls {
    pub roll: u8,
    pub pitch: u8,
    pub throttle: u8,
    pub yaw: u8,
    pub tilt: u8,
    pub ascent: u8,
    pub hold: u8,
    pub shutter: u8,
}

impl Controls {
    fn as_inputs(&self) -> [u8; 8] {
        [
            self.roll,
            self.pitch,
            self.throttle,
            self.yaw,
            self.tilt,
            self.ascent,
            self.hold,
            self.shutter,
        ]
    }
}

/// Scales a generic control input (percentage, 0..=100) to the signed
/// channel range the vehicle expects.
fn scale_generic(pct: u8) -> i16 {
    (1022 * i32::from(pct) / 100 - 511) as i16
}

/// Scales the throttle input. When `throttle_mode` is known and disabled
/// (full range, no idle floor) the offset drops to zero.
fn scale_throttle(pct: u8, throttle_mode: bool) -> i16 {
    let offset = if throttle_mode { 511 } else { 0 };
    (1022 * i32::from(pct) / 100 - offset) as i16
}

/// Scales the hold input, which only occupies the upper half of the signed
/// range.
fn scale_hold(pct: u8) -> i16 {
    (511 * i32::from(pct) / 100) as i16
}

/// Maps the eight logical inputs onto the 16-slot channel array the
/// multiplexer packs from, applying each input's scale formula and leaving
/// aux channels zeroed.
fn channel_values(controls: &Controls, throttle_mode: bool) -> [i16; 16] {
    let inputs = controls.as_inputs();
    let mut channels = [0i16; 16];
    for (input_index, &value) in inputs.iter().enumerate() {
        let scaled = if input_index == THROTTLE_INPUT {
            scale_throttle(value, throttle_mode)
        } else if input_index == HOLD_INPUT {
            scale_hold(value)
        } else {
            scale_generic(value)
        };
        channels[TX_MAP[input_index]] = scaled;
    }
    channels
}

/// Drives the round-robin control multiplexer: state that must persist
/// across successive 50 Hz ticks (the duty-cycle counter).
#[derive(Debug, Default)]
pub(crate) struct ControlMux {
    interval: u8,
}

impl ControlMux {
    pub(crate) fn new() -> Self {
        ControlMux { interval: 0 }
    }

    /// Advances the duty cycle and builds the next control frame, or `None`
    /// on the idle tick (every fifth tick carries nothing).
    ///
    /// Channels 0..4 are sent every tick. On even ticks channels 4 and 5
    /// additionally ride along (six channels total); on odd ticks channels
    /// 6, 7 and 8 additionally ride along instead (seven channels total),
    /// each tagged with its own slot index as the nibble.
    pub(crate) fn next_frame(&mut self, controls: &Controls, throttle_mode: bool) -> Option<Vec<u8>> {
        self.interval = (self.interval + 1) % 5;
        if self.interval == 4 {
            return None;
        }
        let channels = channel_values(controls, throttle_mode);
        Some(build_control_frame(self.interval, &channels))
    }
}

/// Builds one multiplexed control frame for duty-cycle position `interval`
/// (0..=3), packing 10-bit signed channel values two-to-three-bytes at a
/// time with a leading nibble identifying each channel slot, terminated
/// with a vehicle-layer CRC exactly like the handshake messages.
fn build_control_frame(interval: u8, channels: &[i16; 16]) -> Vec<u8> {
    let odd = interval % 2 == 1;
    let mut chan_count: u8 = if odd { 7 } else { 6 };
    if interval == 3 {
        chan_count |= 0x80;
    }

    let mut buf = Vec::with_capacity(18);
    let mut w = ByteWriter::new(&mut buf);
    w.write_u8(chan_count);

    for i in 0..4 {
        write_channel(&mut buf, i as u8, channels[i]);
    }
    if odd {
        write_channel(&mut buf, 6, channels[6]);
        write_channel(&mut buf, 7, channels[7]);
        write_channel(&mut buf, 8, channels[8]);
    } else {
        write_channel(&mut buf, 4, channels[4]);
        write_channel(&mut buf, 5, channels[5]);
    }
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Appends one channel's packed nibble+value encoding: a leading nibble
/// identifying the channel, packed with the high bits of a signed 10-bit
/// value, followed by the value's low byte.
fn write_channel(buf: &mut Vec<u8>, nibble: u8, value: i16) {
    let raw = (value as u16) & 0x03FF;
    buf.push((nibble << 4) | ((raw >> 8) as u8 & 0x0F));
    buf.push((raw & 0xFF) as u8);
}

/// Builds the wired-bypass motor-speed message: four direct motor speeds,
/// each a percentage scaled to the full 0..=1023 range, sent unencrypted.
pub(crate) fn build_bypass_motors(motors: [u8; 4]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    let mut w = ByteWriter::new(&mut payload);
    for pct in motors {
        let value = (1023 * u32::from(pct) / 100) as u16;
        w.write_u16_le(value);
    }
    build_config_message(6, 1, 1, &payload)
}

/// Builds the configuration-mode control message: all ten raw channel
/// values in one message, each masked to the low 10 bits and tagged with
/// its channel index in the high nibble exactly as [`write_channel`] packs
/// it for the round-robin frames, but all ten in a single, unencrypted-free
/// configuration message.
pub(crate) fn build_config_controls(channels: [i16; 10]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(21);
    payload.push(0x0A);
    for (i, &value) in channels.iter().enumerate() {
        let raw = (value as u16) & 0x03FF;
        let tagged = raw | ((i as u16) << 12);
        payload.extend_from_slice(&tagged.to_le_bytes());
    }
    build_config_message(5, 0, 1, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_scale_spans_full_signed_range() {
        assert_eq!(scale_generic(0), -511);
        assert_eq!(scale_generic(100), 511);
        assert_eq!(scale_generic(50), 0);
    }

    #[test]
    fn throttle_scale_depends_on_mode() {
        assert_eq!(scale_throttle(0, true), -511);
        assert_eq!(scale_throttle(0, false), 0);
        assert_eq!(scale_throttle(100, true), 511);
        assert_eq!(scale_throttle(100, false), 1022);
    }

    #[test]
    fn hold_scale_only_spans_upper_half() {
        assert_eq!(scale_hold(0), 0);
        assert_eq!(scale_hold(100), 511);
    }

    #[test]
    fn aux_channels_are_always_zeroed() {
        let controls = Controls {
            roll: 100,
            pitch: 100,
            throttle: 100,
            yaw: 100,
            tilt: 100,
            ascent: 100,
            hold: 100,
            shutter: 100,
        };
        let channels = channel_values(&controls, false);
        // Slot 6 isn't targeted by any of the eight logical inputs' TX_MAP
        // entries and must stay zero even when every input is maxed out.
        for &slot in &[6, 9, 10, 11, 12, 13, 14, 15] {
            assert_eq!(channels[slot], 0, "slot {slot} should stay zero");
        }
    }

    #[test]
    fn txmap_places_roll_pitch_throttle_yaw_at_expected_slots() {
        let controls = Controls {
            roll: 100,
            pitch: 0,
            throttle: 0,
            yaw: 0,
            ..Default::default()
        };
        let channels = channel_values(&controls, false);
        // roll is logical input 0, TX_MAP[0] == 1
        assert_eq!(channels[1], 511);
    }

    #[test]
    fn duty_cycle_skips_every_fifth_tick() {
        let mut mux = ControlMux::new();
        let controls = Controls::default();
        let mut produced = 0;
        for _ in 0..5 {
            if mux.next_frame(&controls, false).is_some() {
                produced += 1;
            }
        }
        assert_eq!(produced, 4);
    }

    #[test]
    fn odd_ticks_carry_seven_channels_even_ticks_six() {
        let mut mux = ControlMux::new();
        let controls = Controls::default();
        let frame1 = mux.next_frame(&controls, false).unwrap(); // interval 1, odd
        assert_eq!(frame1[0] & 0x7F, 7);
        let frame2 = mux.next_frame(&controls, false).unwrap(); // interval 2, even
        assert_eq!(frame2[0] & 0x7F, 6);
    }

    #[test]
    fn third_interval_sets_high_bit() {
        let mut mux = ControlMux::new();
        let controls = Controls::default();
        mux.next_frame(&controls, false); // interval 1
        mux.next_frame(&controls, false); // interval 2
        let frame3 = mux.next_frame(&controls, false).unwrap(); // interval 3
        assert_eq!(frame3[0] & 0x80, 0x80);
    }

    #[test]
    fn bypass_motors_scale_to_full_range() {
        let msg = build_bypass_motors([0, 50, 100, 100]);
        assert!(!msg.is_empty());
    }

    #[test]
    fn config_controls_message_is_well_formed() {
        let msg = build_config_controls([0; 10]);
        assert!(!msg.is_empty());
    }
}
