//! The `Transport` capability trait (§4.12): every concrete transport
//! (long-range radio, FMP, short-range adapter) implements this so the
//! manager can hold them as `Vec<Box<dyn Transport>>`, generalizing
//! `embedded_link::EmbeddedLinkAdapter`'s `send_frame`/`poll_frame` shape
//! to the richer packet-level contract §6 names.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use meshline_proto::Packet;

use crate::error::TransportError;

pub type ReceiveCallback = Arc<dyn Fn(Packet, TransportMetadata) + Send + Sync>;

/// Attached by a transport to every packet it hands to the manager;
/// mirrors `meshline_proto::packet::TransportMetadata` but is produced
/// fresh per-transport rather than carried on the wire.
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    pub transport: String,
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
    pub hops: u8,
    pub link_latency_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransmitResult {
    pub success: bool,
    pub queued: bool,
    pub estimated_delivery: Option<Instant>,
    pub error: Option<String>,
}

impl TransmitResult {
    pub fn success() -> Self {
        Self { success: true, queued: false, estimated_delivery: None, error: None }
    }

    pub fn queued(estimated_delivery: Instant) -> Self {
        Self { success: false, queued: true, estimated_delivery: Some(estimated_delivery), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, queued: false, estimated_delivery: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub parse_errors: u64,
    pub bitrate_bps: u64,
    pub reliability: f32,
}

/// The manager's narrow view onto a transport (§9 REDESIGN FLAGS: "dynamic
/// dispatch over transports"). Fragmentation/framing internals stay
/// monomorphic inside each impl; this trait only crosses the manager
/// boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), TransportError>;
    async fn stop(&self);
    async fn transmit(&self, packet: Packet) -> TransmitResult;
    fn set_receive_callback(&self, callback: ReceiveCallback);
    fn metrics(&self) -> TransportMetrics;
    fn is_available(&self) -> bool;
}
