//! UDP tunnel transport.
//!
//! A third-party bridge application sits between this crate and the vehicle,
//! relaying the wired serial dialect over UDP datagrams. Each outbound
//! datagram wraps the wired frame in a thin envelope; the bridge expects a
//! keepalive datagram periodically or it tears the tunnel down.

use super::Transport;
use crate::error::Error;
use log::trace;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

/// Envelope marker byte prefixing every datagram sent to the bridge.
const ENVELOPE_START: u8 = 0xDF;
/// Sub-type byte identifying a payload-carrying datagram.
const ENVELOPE_PAYLOAD: u8 = 0x12;
/// Keepalive datagram sent when no real traffic has gone out recently.
const KEEPALIVE: [u8; 1] = [0x13];
/// Interval after which a keepalive is due if nothing else was sent.
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(400);

pub(crate) struct UdpTransport {
    local_port: u16,
    peer_port: u16,
    socket: Option<UdpSocket>,
    last_sent: Option<Instant>,
}

impl UdpTransport {
    pub(crate) fn new(local_port: u16, peer_port: u16) -> Self {
        UdpTransport {
            local_port,
            peer_port,
            socket: None,
            last_sent: None,
        }
    }

    fn wrap(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(ENVELOPE_START);
        out.extend_from_slice(&((payload.len() + 1) as u16).to_be_bytes());
        out.push(ENVELOPE_PAYLOAD);
        out.extend_from_slice(payload);
        out.push(crate::codec::checksum(&out[1..]));
        out
    }

    /// Sends a keepalive if the tunnel has been quiet long enough. Called
    /// once per tick by the owning session.
    pub(crate) fn tick(&mut self) -> Result<(), Error> {
        let due = match self.last_sent {
            Some(t) => t.elapsed() >= KEEPALIVE_INTERVAL,
            None => true,
        };
        if due {
            self.send_raw(&KEEPALIVE)?;
        }
        Ok(())
    }

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(Error::InvalidArgument("transport not open"))?;
        socket
            .send_to(bytes, ("127.0.0.1", self.peer_port))
            .map_err(Error::TransportLost)?;
        self.last_sent = Some(Instant::now());
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn open(&mut self) -> Result<(), Error> {
        let socket = UdpSocket::bind(("127.0.0.1", self.local_port))
            .map_err(Error::TransportOpenFailed)?;
        socket.set_nonblocking(true).map_err(Error::TransportOpenFailed)?;
        trace!(
            "udp tunnel bound on {} talking to peer port {}",
            self.local_port, self.peer_port
        );
        self.socket = Some(socket);
        self.last_sent = None;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let wrapped = Self::wrap(bytes);
        self.send_raw(&wrapped)
    }

    fn read(&mut self) -> Result<Vec<u8>, Error> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(Error::InvalidArgument("transport not open"))?;
        let mut buf = [0u8; 2048];
        let mut out = Vec::new();
        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, _)) => out.extend_from_slice(unwrap_datagram(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::TransportLost(e)),
            }
        }
        Ok(out)
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn wireless_framing(&self) -> bool {
        false
    }
}

/// Strips the tunnel envelope off an inbound datagram, if present. Unknown
/// or keepalive datagrams yield an empty slice.
fn unwrap_datagram(datagram: &[u8]) -> &[u8] {
    if datagram.len() < 4 || datagram[0] != ENVELOPE_START {
        return &[];
    }
    let len = u16::from_be_bytes([datagram[1], datagram[2]]) as usize;
    if datagram.len() < 3 + len || len == 0 {
        return &[];
    }
    if datagram[3] != ENVELOPE_PAYLOAD {
        return &[];
    }
    &datagram[4..3 + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_well_formed_datagram() {
        let wrapped = UdpTransport::wrap(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(unwrap_datagram(&wrapped), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn rejects_truncated_datagram() {
        assert_eq!(unwrap_datagram(&[0xDF, 0x00]), &[] as &[u8]);
    }

    #[test]
    fn rejects_non_envelope_datagram() {
        assert_eq!(unwrap_datagram(&[0x01, 0x02, 0x03, 0x04]), &[] as &[u8]);
    }
}
