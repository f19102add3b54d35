//! In-memory transport double used by session- and radio-level unit tests.

use super::Transport;
use crate::error::Error;
use std::collections::VecDeque;

/// A transport whose "wire" is two in-process queues. Tests push bytes onto
/// `inbound` to simulate vehicle traffic and drain `outbound` to inspect
/// what the engine sent.
pub(crate) struct LoopbackTransport {
    wireless: bool,
    opened: bool,
    pub(crate) inbound: VecDeque<u8>,
    pub(crate) outbound: Vec<u8>,
}

impl LoopbackTransport {
    pub(crate) fn new(wireless: bool) -> Self {
        LoopbackTransport {
            wireless,
            opened: false,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        }
    }

    pub(crate) fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    pub(crate) fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<(), Error> {
        self.opened = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if !self.opened {
            return Err(Error::InvalidArgument("transport not open"));
        }
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, Error> {
        if !self.opened {
            return Err(Error::InvalidArgument("transport not open"));
        }
        Ok(self.inbound.drain(..).collect())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn wireless_framing(&self) -> bool {
        self.wireless
    }
}
