use thiserror::Error;

/// Codec and crypto failures at the protocol layer.
///
/// Kept small and `Copy` so it's cheap to thread through byte parsers; the
/// transport layer wraps these into its own richer error taxonomy rather
/// than propagating them to an application boundary directly (parse
/// failures are counted in metrics, never surfaced — see the transport
/// crate's error handling).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    #[error("buffer too short for frame")]
    Truncated,
    #[error("frame or field exceeds its maximum size")]
    TooLarge,
    #[error("malformed FMP packet")]
    MalformedFmp,
    #[error("unknown packet type discriminant")]
    UnknownPacketType,
    #[error("cryptographic authentication failed")]
    AuthenticationFailed,
    #[error("invalid key material")]
    InvalidKey,
}
