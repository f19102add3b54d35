use std::fmt;

/// Errors returned by the protocol engine's public surface.
///
/// Frame-level problems (bad checksum, bad CRC, truncated frames) never
/// reach here — the framer resyncs silently and the session retries or
/// times out on its own. Only conditions a caller needs to react to are
/// represented.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// `open` could not bring up the underlying transport (port missing,
    /// permission denied, address in use, ...).
    TransportOpenFailed(std::io::Error),

    /// A write or read on an already-open transport failed. The session
    /// closes itself silently when this occurs; callers observe it only as
    /// a transition back to `Idle`.
    TransportLost(std::io::Error),

    /// A public method was called with an argument outside its documented
    /// range, or while the session was in a state that forbids it (e.g.
    /// `enumerate` while not `Idle`). The call is rejected and no state is
    /// mutated.
    InvalidArgument(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TransportOpenFailed(e) => write!(f, "failed to open transport: {}", e),
            Error::TransportLost(e) => write!(f, "transport lost: {}", e),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TransportOpenFailed(e) | Error::TransportLost(e) => Some(e),
            Error::InvalidArgument(_) => None,
        }
    }
}

/// Frame-level faults, internal to the framer.
///
/// These never cross the component boundary as an [`Error`]: `Corrupt`
/// causes the framer to drop a byte and resync, and `Incomplete` just means
/// "wait for more bytes".
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum FrameFault {
    /// Not enough bytes buffered yet to determine whether a frame is valid.
    Incomplete,
    /// Checksum/CRC mismatch, an impossible length, or an unrecognized start
    /// byte. Indistinguishable from a decrypt failure (decrypt failure is
    /// not distinguishable from CRC failure and is treated identically).
    Corrupt,
}
