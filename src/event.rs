//! The observation surface: a raw-frame byte stream plus a typed event
//! stream, both fanned out to subscribers registered on [`EventBus`].

/// Which way a raw frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// A single frame as it appeared on the wire: wrapped, and still encrypted
/// where the wire format leaves it encrypted. Published for every valid
/// outbound write and every checksum/CRC-valid inbound frame; frames that
/// fail validation are never published.
#[derive(Debug, Clone)]
pub struct RawFrameEvent {
    pub bytes: Vec<u8>,
    pub direction: Direction,
}

/// A parsed six-axis reading, emitted at the wire rate while in bypass mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImuSample {
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub acc_x: i16,
    pub acc_y: i16,
    pub acc_z: i16,
}

/// The hold-mode enumeration carried in telemetry message #22.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldMode {
    Manual,
    Altitude,
    Position,
    ReturnToHome,
    Other(u8),
}

impl HoldMode {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            0 => HoldMode::Manual,
            1 => HoldMode::Altitude,
            2 => HoldMode::Position,
            3 => HoldMode::ReturnToHome,
            other => HoldMode::Other(other),
        }
    }
}

/// Decoded telemetry message #22: attitude, velocity, and status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry22 {
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    pub packet_loss: u8,
    pub rssi: u8,
    pub throttle: u16,
    pub alt_pressure_m: f32,
    pub mag_x: i32,
    pub mag_y: i32,
    pub mag_z: i32,
    pub vel_n_mps: f32,
    pub vel_e_mps: f32,
    pub vel_d_mps: f32,
    pub err_n: f32,
    pub err_e: f32,
    pub err_d: f32,
    pub batt_heli: f32,
    pub time_flight_s: u32,
    pub svs: u8,
    pub hold_mode: HoldMode,
    pub current: f32,
    pub picture: u8,
}

/// Decoded telemetry message #23: GPS position and accuracy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry23 {
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    pub packet_loss: u8,
    pub rssi: u8,
    pub throttle: u16,
    pub alt_pressure_m: f32,
    pub alt_gps_m: f32,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub pdop: f32,
    pub hacc_m: f32,
    pub vacc_m: f32,
    pub gps_time_ms: u32,
    pub temperature_c: Option<f32>,
    pub tilt: u8,
}

/// A discovered vehicle from an enumeration sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleFound {
    pub address: u64,
    pub channel: u8,
}

/// The typed counterpart of the raw-frame stream: every decoded outcome a
/// caller might want to react to.
#[derive(Debug, Clone)]
pub enum VehicleEvent {
    StateChanged { from: &'static str, to: &'static str },
    VehicleFound(VehicleFound),
    Imu(ImuSample),
    Telemetry22(Telemetry22),
    Telemetry23(Telemetry23),
    ThrottleModeKnown(bool),
    Message(String),
}

/// Fans raw frames and typed events out to whoever subscribed.
///
/// Dispatch is synchronous on the emitting thread, matching the teacher's
/// producer/consumer split generalized from a single-reader byte queue to an
/// arbitrary number of subscribers: each subscriber gets its own
/// `crossbeam_channel` receiver, so a slow subscriber only ever backs up its
/// own queue, never the others'.
pub struct EventBus {
    raw_frame: Vec<crossbeam_channel::Sender<RawFrameEvent>>,
    vehicle: Vec<crossbeam_channel::Sender<VehicleEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            raw_frame: Vec::new(),
            vehicle: Vec::new(),
        }
    }

    /// Registers a new subscriber to the raw-frame stream and returns its
    /// receiving end.
    pub fn subscribe_raw_frames(&mut self) -> crossbeam_channel::Receiver<RawFrameEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.raw_frame.push(tx);
        rx
    }

    /// Registers a new subscriber to the typed event stream and returns its
    /// receiving end.
    pub fn subscribe_events(&mut self) -> crossbeam_channel::Receiver<VehicleEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.vehicle.push(tx);
        rx
    }

    pub(crate) fn emit_raw_frame(&mut self, event: RawFrameEvent) {
        self.raw_frame.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn emit_event(&mut self, event: VehicleEvent) {
        self.vehicle.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_to_multiple_subscribers() {
        let mut bus = EventBus::new();
        let a = bus.subscribe_raw_frames();
        let b = bus.subscribe_raw_frames();
        bus.emit_raw_frame(RawFrameEvent {
            bytes: vec![1, 2, 3],
            direction: Direction::Outbound,
        });
        assert_eq!(a.try_recv().unwrap().bytes, vec![1, 2, 3]);
        assert_eq!(b.try_recv().unwrap().bytes, vec![1, 2, 3]);
    }

    #[test]
    fn drops_disconnected_subscribers() {
        let mut bus = EventBus::new();
        {
            let _rx = bus.subscribe_raw_frames();
        }
        assert_eq!(bus.raw_frame.len(), 1);
        bus.emit_raw_frame(RawFrameEvent {
            bytes: vec![],
            direction: Direction::Inbound,
        });
        assert_eq!(bus.raw_frame.len(), 0);
    }
}
