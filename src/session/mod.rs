//! The connection state machine: enumeration, the two-phase wireless
//! connect handshake, the wired direct-connect shortcut, and the steady
//! -state behavior once connected (telemetry renewal, alarm acks, control
//! and bypass traffic).
//!
//! [`Session`] never touches a transport directly. It is driven by two
//! ticks (`session_tick` at 10 Hz, `control_tick` at 50 Hz) and by decoded
//! frames handed to it as they arrive; it returns whatever outbound bytes
//! need writing and whatever events callers should see. This keeps the
//! state machine synchronous and unit-testable without a real transport.

pub(crate) mod control;
pub(crate) mod message;
pub(crate) mod telemetry;

use crate::event::{ImuSample, VehicleEvent, VehicleFound};
use crate::framer::Frame;
use crate::radio::{self, LocalAddress, RadioEvent};
use control::{Controls, ControlMux};
use log::{debug, warn};
use message::ConfigMessage;

/// Channel sweep bounds used while enumerating.
const CHANNEL_MIN: u8 = 0x0C;
const CHANNEL_MAX: u8 = 0x17;

/// Enumeration advances to the next channel every third attempt.
const ENUM_ATTEMPTS_PER_CHANNEL: u32 = 3;
/// Wireless connect gives up after this many connect-tick attempts.
const CONNECT_ATTEMPT_LIMIT: u32 = 100;
/// Below this attempt count, connect alternates acquire/no-op; above it,
/// acquire alternates with query.
const CONNECT_QUERY_THRESHOLD: u32 = 10;
/// Telemetry subscription is renewed every 10th connected tick.
const TELEMETRY_RENEW_PERIOD: u64 = 10;

/// The connection state machine's states, matching the legal-transition
/// table: `Idle -> {Enumerating, Connecting}`, `Enumerating -> {Idle}`,
/// `Connecting -> {Idle, Connected}`, `Connected -> {Idle}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    Enumerating,
    Connecting,
    Connected,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Enumerating => "enumerating",
            State::Connecting => "connecting",
            State::Connected => "connected",
        }
    }
}

/// How the session reached its current connection: affects handshake and
/// steady-state behavior (wireless needs the acquire/query dance and
/// periodic telemetry renewal gating; wired connects immediately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Wired,
    Wireless,
    UdpTunnel,
}

/// Connection and protocol state, independent of any transport or I/O.
pub(crate) struct Session {
    state: State,
    dialect: Dialect,
    config_mode: bool,

    channel: u8,
    enum_attempt: u32,
    conn_attempt: u32,
    tick_count: u64,

    remote_address: u64,
    local_address: LocalAddress,

    throttle_mode: Option<bool>,
    streaming_telemetry: bool,
    bypass_mode: bool,

    control_mux: ControlMux,
}

impl Session {
    pub(crate) fn new() -> Self {
        Session {
            state: State::Idle,
            dialect: Dialect::Wired,
            config_mode: false,
            channel: CHANNEL_MIN,
            enum_attempt: 0,
            conn_attempt: 0,
            tick_count: 0,
            remote_address: 0,
            local_address: LocalAddress::default(),
            throttle_mode: None,
            streaming_telemetry: false,
            bypass_mode: false,
            control_mux: ControlMux::new(),
        }
    }

    pub(crate) fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    fn transition(&mut self, to: State) -> Vec<VehicleEvent> {
        if self.state == to {
            return Vec::new();
        }
        debug!("session state {} -> {}", self.state.name(), to.name());
        let event = VehicleEvent::StateChanged {
            from: self.state.name(),
            to: to.name(),
        };
        self.state = to;
        vec![event]
    }

    // -- connection entry points --------------------------------------

    pub(crate) fn open_wired(&mut self, config_mode: bool) -> Vec<VehicleEvent> {
        self.reset_handshake_counters();
        self.dialect = Dialect::Wired;
        self.config_mode = config_mode;
        self.bypass_mode = false;
        self.transition(State::Connecting)
    }

    pub(crate) fn open_wireless(&mut self, remote_address: u64, channel: u8) -> (Vec<VehicleEvent>, Vec<u8>) {
        self.reset_handshake_counters();
        self.dialect = Dialect::Wireless;
        self.config_mode = false;
        self.remote_address = remote_address;
        self.channel = channel;
        self.local_address.reset();
        let events = self.transition(State::Connecting);
        (events, radio::set_channel(channel))
    }

    pub(crate) fn open_udp_tunnel(&mut self) -> Vec<VehicleEvent> {
        self.reset_handshake_counters();
        self.dialect = Dialect::UdpTunnel;
        self.config_mode = true;
        self.transition(State::Connecting)
    }

    pub(crate) fn enumerate(&mut self) -> (Vec<VehicleEvent>, Vec<u8>) {
        self.reset_handshake_counters();
        self.dialect = Dialect::Wireless;
        self.channel = CHANNEL_MIN;
        let events = self.transition(State::Enumerating);
        (events, radio::set_channel(self.channel))
    }

    pub(crate) fn close(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if self.state == State::Connected && !self.config_mode && self.dialect != Dialect::Wireless {
            out.push(message::build_config_message(6, 0, 0, &[]));
        }
        self.bypass_mode = false;
        self.transition(State::Idle);
        out
    }

    fn reset_handshake_counters(&mut self) {
        self.enum_attempt = 0;
        self.conn_attempt = 0;
        self.tick_count = 0;
        self.throttle_mode = None;
        self.streaming_telemetry = false;
    }

    // -- commands --------------------------------------------------------

    pub(crate) fn arm(&self) -> Option<Vec<u8>> {
        self.bypass_message(message::build_config_message(6, 2, 1, &[]))
    }

    pub(crate) fn disarm(&self) -> Option<Vec<u8>> {
        self.bypass_message(message::build_config_message(6, 3, 1, &[]))
    }

    pub(crate) fn enter_bypass(&mut self) -> Vec<u8> {
        self.bypass_mode = true;
        message::build_config_message(6, 0, 1, &[])
    }

    pub(crate) fn leave_bypass(&mut self) -> Vec<u8> {
        self.bypass_mode = false;
        message::build_config_message(6, 0, 0, &[])
    }

    pub(crate) fn stream_telemetry(&mut self, enable: bool) -> Vec<u8> {
        self.streaming_telemetry = enable;
        message::build_config_message(1, 22, u8::from(enable), &[])
    }

    /// Bypass-only commands are rejected in config mode and over the
    /// wireless dialect, matching the reference client's guard.
    fn bypass_message(&self, built: Vec<u8>) -> Option<Vec<u8>> {
        if self.config_mode || self.dialect == Dialect::Wireless {
            None
        } else {
            Some(built)
        }
    }

    // -- ticks -------------------------------------------------------------

    /// Advances the 10 Hz session tick, returning any messages that need
    /// sending this tick.
    pub(crate) fn session_tick(&mut self) -> Vec<Vec<u8>> {
        self.tick_count += 1;
        match self.state {
            State::Idle => Vec::new(),
            State::Enumerating => self.enumerating_tick(),
            State::Connecting => self.connecting_tick(),
            State::Connected => self.connected_tick(),
        }
    }

    fn enumerating_tick(&mut self) -> Vec<Vec<u8>> {
        let attempt = self.enum_attempt;
        self.enum_attempt += 1;
        if attempt % ENUM_ATTEMPTS_PER_CHANNEL == ENUM_ATTEMPTS_PER_CHANNEL - 1 {
            if self.channel >= CHANNEL_MAX {
                self.transition(State::Idle);
                return Vec::new();
            }
            self.channel += 1;
            vec![radio::set_channel(self.channel)]
        } else {
            vec![message::build_identify_request()]
        }
    }

    fn connecting_tick(&mut self) -> Vec<Vec<u8>> {
        match self.dialect {
            Dialect::Wired | Dialect::UdpTunnel => {
                self.transition(State::Connected);
                Vec::new()
            }
            Dialect::Wireless => {
                self.conn_attempt += 1;
                if self.conn_attempt > CONNECT_ATTEMPT_LIMIT {
                    warn!("wireless connect handshake timed out after {CONNECT_ATTEMPT_LIMIT} attempts");
                    self.transition(State::Idle);
                    return Vec::new();
                }
                if self.local_address.assembled().is_none() {
                    return vec![radio::get_local_address(self.local_address.have_low())];
                }
                if self.conn_attempt % 2 == 0 {
                    vec![message::build_acquire(self.config_mode, self.local_address.assembled().unwrap())]
                } else if self.conn_attempt > CONNECT_QUERY_THRESHOLD {
                    vec![message::build_query()]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn connected_tick(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if self.throttle_mode.is_none() && (self.dialect == Dialect::Wireless || self.config_mode) {
            out.push(message::build_config_message(2, 16, 0, &[]));
        }
        if self.streaming_telemetry && self.tick_count % TELEMETRY_RENEW_PERIOD == 0 {
            out.push(message::build_config_message(1, 22, 1, &[]));
        }
        out
    }

    /// Advances the 50 Hz control tick, returning the control frame to send
    /// (if any — every fifth tick carries nothing, and nothing is sent
    /// until the session reaches `Connected`, though the duty cycle still
    /// advances so its phase doesn't jump once connected).
    pub(crate) fn control_tick(&mut self, controls: &Controls) -> Option<Vec<u8>> {
        let body = self
            .control_mux
            .next_frame(controls, self.throttle_mode.unwrap_or(false))?;
        if self.state != State::Connected {
            return None;
        }
        Some(match self.dialect {
            Dialect::Wireless => radio::addressed_transmit(self.remote_address, &body)
                .into_iter()
                .next()
                .unwrap_or(body),
            Dialect::Wired | Dialect::UdpTunnel => body,
        })
    }

    // -- inbound handling ----------------------------------------------

    /// Feeds one decoded frame into the session, returning any events it
    /// produced together with any messages that need sending in response
    /// (an alarm acknowledgement, or a channel reassertion after the radio
    /// module reports it power-cycled).
    pub(crate) fn handle_frame(&mut self, frame: &Frame) -> (Vec<VehicleEvent>, Vec<Vec<u8>>) {
        match self.dialect {
            Dialect::Wireless => self.handle_radio_frame(frame),
            _ => (self.handle_config_frame(frame), Vec::new()),
        }
    }

    fn handle_radio_frame(&mut self, frame: &Frame) -> (Vec<VehicleEvent>, Vec<Vec<u8>>) {
        let Some(event) = radio::decode(frame) else {
            return (Vec::new(), Vec::new());
        };
        match event {
            RadioEvent::AddressHalf { high, status, value } => {
                if status == 0 {
                    self.local_address.record(high, value);
                }
                (Vec::new(), Vec::new())
            }
            RadioEvent::ModuleStatus { reset } => {
                if reset {
                    (Vec::new(), vec![radio::set_channel(self.channel)])
                } else {
                    (Vec::new(), Vec::new())
                }
            }
            RadioEvent::Receive { src, payload } => self.handle_vehicle_payload(src, &payload),
            RadioEvent::Other => (Vec::new(), Vec::new()),
        }
    }

    fn handle_vehicle_payload(&mut self, src: u64, payload: &[u8]) -> (Vec<VehicleEvent>, Vec<Vec<u8>>) {
        if payload.is_empty() {
            return (Vec::new(), Vec::new());
        }
        match (self.state, payload[0]) {
            (State::Connecting, 0x01) => (self.transition(State::Connected), Vec::new()),
            (State::Enumerating, 0xF8) => {
                if payload.len() > 17 {
                    let found = VehicleFound {
                        address: src,
                        channel: payload[17] + 0x0C,
                    };
                    (vec![VehicleEvent::VehicleFound(found)], Vec::new())
                } else {
                    (Vec::new(), Vec::new())
                }
            }
            (State::Connected, 0x03) => {
                let ack_required = payload.len() > 14 && payload[14] != 0;
                let outbound = if ack_required {
                    vec![message::build_alarm_ack()]
                } else {
                    Vec::new()
                };
                (vec![VehicleEvent::Message("alarm".to_string())], outbound)
            }
            _ => (Vec::new(), Vec::new()),
        }
    }

    fn handle_config_frame(&mut self, frame: &Frame) -> Vec<VehicleEvent> {
        let Some(msg) = message::parse_config_message(frame) else {
            return Vec::new();
        };
        self.dispatch_config_message(msg)
    }

    fn dispatch_config_message(&mut self, msg: ConfigMessage) -> Vec<VehicleEvent> {
        match (msg.msg_type, msg.subtype) {
            (2, 16) => {
                let enabled = message::decode_throttle_mode(msg.mode);
                self.throttle_mode = Some(enabled);
                vec![VehicleEvent::ThrottleModeKnown(enabled)]
            }
            (6, 0) => match message::decode_imu(&msg.body) {
                Some(axes) => vec![VehicleEvent::Imu(ImuSample {
                    gyro_x: axes[0],
                    gyro_y: axes[1],
                    gyro_z: axes[2],
                    acc_x: axes[3],
                    acc_y: axes[4],
                    acc_z: axes[5],
                })],
                None => Vec::new(),
            },
            (1, 22) => match telemetry::decode_telemetry22(&msg.body) {
                Some(t) => vec![VehicleEvent::Telemetry22(t)],
                None => Vec::new(),
            },
            (1, 23) => match telemetry::decode_telemetry23(&msg.body) {
                Some(t) => vec![VehicleEvent::Telemetry23(t)],
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let session = Session::new();
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn wired_open_transitions_to_connecting_then_connected() {
        let mut session = Session::new();
        let events = session.open_wired(false);
        assert_eq!(events.len(), 1);
        assert_eq!(session.state_name(), "connecting");
        session.session_tick();
        assert_eq!(session.state_name(), "connected");
    }

    #[test]
    fn enumerate_sweeps_channels_and_gives_up_at_bound() {
        let mut session = Session::new();
        session.enumerate();
        assert_eq!(session.state_name(), "enumerating");
        // Drive enough ticks to exhaust the whole channel range.
        for _ in 0..((CHANNEL_MAX - CHANNEL_MIN + 1) as u32) * ENUM_ATTEMPTS_PER_CHANNEL + 1 {
            session.session_tick();
        }
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn wireless_connect_requests_local_address_before_acquiring() {
        let mut session = Session::new();
        session.open_wireless(0x1122_3344_5566, 0x0C);
        let sent = session.connecting_tick();
        assert_eq!(sent.len(), 1);
        // get_local_address frames start with 0x7E 0x00 0x04 0x08 0x01 'S'
        assert_eq!(&sent[0][0..6], &[0x7E, 0x00, 0x04, 0x08, 0x01, b'S']);
    }

    #[test]
    fn wireless_connect_completes_once_query_response_arrives() {
        let mut session = Session::new();
        session.open_wireless(0x1122_3344_5566, 0x0C);
        session.local_address.record(false, 0x1122_3344);
        session.local_address.record(true, 0x5566);
        assert!(session.local_address.assembled().is_some());

        let frame = Frame::Radio {
            payload: {
                let mut p = vec![0x80u8];
                p.extend_from_slice(&0u64.to_be_bytes());
                p.push(0); // rssi
                p.push(0); // options
                p.push(0x01); // query response
                p
            },
        };
        let (events, _) = session.handle_frame(&frame);
        assert_eq!(session.state_name(), "connected");
        assert!(matches!(events[0], VehicleEvent::StateChanged { .. }));
    }

    #[test]
    fn throttle_mode_request_only_sent_until_known() {
        let mut session = Session::new();
        session.open_wired(false);
        session.session_tick(); // -> connected
        let first = session.connected_tick();
        assert_eq!(first.len(), 1);
        session.throttle_mode = Some(true);
        let second = session.connected_tick();
        assert!(second.is_empty());
    }

    #[test]
    fn bypass_commands_rejected_in_config_mode() {
        let mut session = Session::new();
        session.config_mode = true;
        assert!(session.arm().is_none());
    }

    #[test]
    fn close_from_bypass_sends_drop_message() {
        let mut session = Session::new();
        session.open_wired(false);
        session.session_tick();
        session.bypass_mode = true;
        let sent = session.close();
        assert_eq!(sent.len(), 1);
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn decodes_throttle_mode_message() {
        let mut session = Session::new();
        let raw = message::build_config_message(2, 16, 1, &[]);
        let frame = Frame::Wired {
            msg_type: 2,
            payload: raw[4..].to_vec(),
        };
        let (events, _) = session.handle_frame(&frame);
        assert!(matches!(events[0], VehicleEvent::ThrottleModeKnown(true)));
    }
}
