//! Stateful, `tokio`-driven runtime over `meshline-proto`'s wire
//! fundamentals: duty cycling, fragmentation, the long-range radio
//! driver, the FMP adapter, the short-range adapter, pathfinder routing,
//! the handshake manager, and the transport manager that ties them all
//! to a single application-facing boundary (§4, §6).

pub mod config;
pub mod duty_cycle;
pub mod error;
pub mod fmp_transport;
pub mod fragmenter;
pub mod handshake;
pub mod longrange;
pub mod manager;
pub mod pathfinder;
pub mod radio;
pub mod shortrange;
pub mod transport_trait;

pub use config::MeshConfig;
pub use duty_cycle::{DutyCycleBand, DutyCycleConfig, DutyCycleGovernor};
pub use error::{DutyCycleError, FragmentError, HandshakeError, RadioError, ShortRangeError, TransportError};
pub use fmp_transport::FmpTransport;
pub use fragmenter::{Fragmenter, FragmenterConfig};
pub use handshake::{
    EstablishedLink, HandshakeManager, HandshakeManagerConfig, HandshakeSession, HandshakeTransport, Role,
    SecureLink, SessionState,
};
pub use longrange::LongRangeTransport;
pub use manager::{TransportManager, TransportStatus};
pub use pathfinder::{Pathfinder, PathConstraints};
pub use radio::{RadioConfig, RadioDriver};
pub use shortrange::{ShortRangeLink, ShortRangeTransport};
pub use transport_trait::{ReceiveCallback, Transport, TransmitResult, TransportMetadata, TransportMetrics};
