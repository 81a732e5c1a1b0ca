//! Component-level error taxonomy (§7). Each stateful component gets its
//! own `thiserror` enum; `TransportError` is the union type surfaced at
//! the `TransportManager` boundary, the same shape as `rns_transport`'s
//! per-module error enums feeding into a single `RnsError` at the top.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DutyCycleError {
    #[error("no duty-cycle band configured for frequency {0} Hz")]
    UnknownBand(u64),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("reassembly buffer for packet {0:04x} timed out")]
    Timeout(u16),
    #[error("malformed fragment: {0}")]
    Malformed(#[from] meshline_proto::ProtoError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("serial port is already owned by another driver instance")]
    PortBusy,
    #[error("serial write failed or stream closed")]
    SerialIo,
    #[error("oversize frame rejected ({0} bytes payload)")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("driver is in an unrecoverable error state; call configure() to restart")]
    Unrecoverable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortRangeError {
    #[error("short-range link is not ready")]
    NotReady,
    #[error("short-range link send queue is full")]
    QueueFull,
    #[error("frame exceeds the short-range link's MTU")]
    FrameTooLarge,
    #[error("short-range link I/O failed")]
    Io,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake with peer did not complete within 30s")]
    Timeout,
    #[error("key pinning failed")]
    KeyPinningFailed,
    #[error("cipher authentication failed during handshake")]
    AuthenticationFailed,
    #[error("no handshake session in progress for this peer")]
    NoSession,
    #[error("unexpected handshake step for current state")]
    UnexpectedStep,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport {0} is not started or has no underlying hardware")]
    TransportUnavailable(String),
    #[error("packet_id {0} seen within the dedup window")]
    Duplicate(String),
    #[error("channel busy: CAD repeatedly failed")]
    ChannelBusy,
    #[error("duty cycle exceeded, backoff required")]
    DutyCycleExceeded(#[from] DutyCycleError),
    #[error("fragment reassembly failed")]
    Fragment(#[from] FragmentError),
    #[error("radio driver error")]
    Radio(#[from] RadioError),
    #[error("malformed wire frame: {0}")]
    ParseError(#[from] meshline_proto::ProtoError),
    #[error("handshake error")]
    Handshake(#[from] HandshakeError),
    #[error("short-range link error")]
    ShortRange(#[from] ShortRangeError),
    #[error("pending packet dropped after exhausting retries")]
    RetryExhausted,
    #[error("no transport destination named {0}")]
    UnknownTransport(String),
}
