use std::net::Ipv4Addr;

use thiserror::Error;

use crate::proto::Version;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the VPN core
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0} phase timed out")]
    PhaseTimeout(&'static str),

    #[error("version {0} is not accepted by the peer")]
    VersionMismatch(Version),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("peer closed the session")]
    PeerClosed,

    #[error("session error threshold reached")]
    SessionExpired,

    #[error("virtual address {0} is already bound to another session")]
    AddrInUse(Ipv4Addr),

    #[error("slot {0} is not in use")]
    SlotNotInUse(u16),

    #[error("event loop '{0}' is not supported by this build")]
    EventLoopUnsupported(&'static str),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}

/// Wire-level failures. A session that produces one of these is closed
/// and not retried.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame length {0:#06x} exceeds the maximum payload size")]
    OversizedLength(u16),

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("{kind} payload is malformed ({len} bytes)")]
    MalformedPayload { kind: &'static str, len: usize },

    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),

    #[error("string field does not fit its wire buffer")]
    FieldTooLong,

    #[error("datagram does not contain exactly one frame")]
    BadDatagram,

    #[error("unexpected {got} packet in {phase} phase")]
    UnexpectedPacket {
        got: &'static str,
        phase: &'static str,
    },

    #[error("stream ended mid-frame")]
    TruncatedStream,
}
