//! Handshake Manager (§4.9): session state machine plus the orchestration
//! that drives sessions to completion, holds established links, and
//! schedules rekeys.

pub mod manager;
pub mod session;

pub use manager::{HandshakeManager, HandshakeManagerConfig, HandshakeTransport, SecureLink};
pub use session::{EstablishedLink, HandshakeSession, Role, SessionState};
