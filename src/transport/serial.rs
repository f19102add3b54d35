//! Wired and radio-module serial transports.
//!
//! Both dialects ride a plain `serialport` handle; they differ only in baud
//! rate, whether DTR is asserted, and which framing dialect the bytes they
//! carry use.

use super::Transport;
use crate::error::Error;
use log::{trace, warn};
use std::io::{Read, Write};
use std::time::Duration;

/// Baud rate for a direct wired connection.
const WIRED_BAUD: u32 = 115_200;
/// Baud rate for the radio-module link.
const RADIO_BAUD: u32 = 57_600;

pub(crate) struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    assert_dtr: bool,
    wireless: bool,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    pub(crate) fn wired(port_name: String) -> Self {
        SerialTransport {
            port_name,
            baud_rate: WIRED_BAUD,
            assert_dtr: true,
            wireless: false,
            port: None,
        }
    }

    pub(crate) fn radio(port_name: String) -> Self {
        SerialTransport {
            port_name,
            baud_rate: RADIO_BAUD,
            assert_dtr: false,
            wireless: true,
            port: None,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), Error> {
        let mut port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(0))
            .open()
            .map_err(|e| Error::TransportOpenFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        port.write_data_terminal_ready(self.assert_dtr)
            .map_err(|e| Error::TransportOpenFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        trace!(
            "opened {} at {} baud, dtr={}",
            self.port_name, self.baud_rate, self.assert_dtr
        );
        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::InvalidArgument("transport not open"))?;
        port.write_all(bytes).map_err(Error::TransportLost)
    }

    fn read(&mut self) -> Result<Vec<u8>, Error> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::InvalidArgument("transport not open"))?;
        let available = port.bytes_to_read().unwrap_or(0) as usize;
        if available == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(Error::TransportLost(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            trace!("closed {}", self.port_name);
        } else {
            warn!("close called on already-closed {}", self.port_name);
        }
    }

    fn wireless_framing(&self) -> bool {
        self.wireless
    }
}
