//! Transport abstraction: the uniform open/write/read/close surface that lets
//! the rest of the crate stay oblivious to whether it's talking to a wired
//! serial port, a radio-module serial port, or a UDP tunnel.

mod serial;
mod udp;

#[cfg(test)]
pub(crate) mod loopback;

pub(crate) use serial::SerialTransport;
pub(crate) use udp::UdpTransport;

use crate::error::Error;

/// How a caller's connection target names the transport to open.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// A direct wired serial connection, e.g. `COM3` or `/dev/ttyUSB0`.
    WiredSerial { port_name: String },
    /// A radio-module serial connection tunneling the vehicle protocol.
    RadioSerial { port_name: String },
    /// A UDP tunnel to a locally-running bridge application.
    UdpTunnel { local_port: u16, peer_port: u16 },
}

/// A byte-oriented, non-blocking transport.
///
/// Every method must return promptly: `read` never blocks waiting for data,
/// and returns an empty vector when nothing is available. All transports are
/// driven from the same cooperative tick, so a blocking call here would stall
/// every other piece of state the engine owns.
pub(crate) trait Transport: Send {
    /// Opens the underlying channel. Called once before any `write`/`read`.
    fn open(&mut self) -> Result<(), Error>;

    /// Writes `bytes` out. Does not guarantee delivery, only that the bytes
    /// were handed to the OS (or peer, for UDP) without blocking.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Returns whatever bytes are immediately available, or an empty vector
    /// if none are.
    fn read(&mut self) -> Result<Vec<u8>, Error>;

    /// Releases the underlying channel. Idempotent.
    fn close(&mut self);

    /// Whether this transport dialect frames with the radio-module envelope
    /// (`true`) or the wired dialect (`false`). The UDP tunnel carries wired
    /// traffic, so it reports `false`.
    fn wireless_framing(&self) -> bool;
}

impl dyn Transport {
    /// Builds the concrete transport named by `config`.
    pub(crate) fn for_config(config: &TransportConfig) -> Box<dyn Transport> {
        match config {
            TransportConfig::WiredSerial { port_name } => {
                Box::new(SerialTransport::wired(port_name.clone()))
            }
            TransportConfig::RadioSerial { port_name } => {
                Box::new(SerialTransport::radio(port_name.clone()))
            }
            TransportConfig::UdpTunnel {
                local_port,
                peer_port,
            } => Box::new(UdpTransport::new(*local_port, *peer_port)),
        }
    }
}
