//! Short-Range Transport Adapter (§4.8): wraps a synchronous,
//! frame-oriented legacy link behind the async `Transport` interface.
//! The link trait mirrors `embedded_link::EmbeddedLinkAdapter`'s
//! `send_frame`/`poll_frame` shape, adapted to `&self` so it can be
//! shared between the `transmit` fast path and the background poll
//! loop the same way `RadioDriver` is.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_proto::hash::AddressHash;
use meshline_proto::{Packet, PacketId, PacketType};
use rand_core::OsRng;
use tokio_util::sync::CancellationToken;

use crate::error::{ShortRangeError, TransportError};
use crate::transport_trait::{ReceiveCallback, Transport, TransmitResult, TransportMetadata, TransportMetrics};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const NOMINAL_BITRATE_BPS: u64 = 2_000_000;
const NOMINAL_RELIABILITY: f32 = 0.95;

/// Legacy frame layout: `type(1) | sender_id(8) | has_recipient(1) |
/// recipient_id(8) | payload`. Not part of any spec'd wire format —
/// this adapter's own framing over whatever the underlying link trait
/// transports.
const LEGACY_HEADER_LEN: usize = 1 + 8 + 1 + 8;

pub trait ShortRangeLink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), ShortRangeError>;
    fn poll_frame(&self) -> Result<Option<Vec<u8>>, ShortRangeError>;
}

fn legacy_type_byte(packet_type: PacketType) -> u8 {
    match packet_type {
        PacketType::Data => 0x01,
        PacketType::Announce => 0x02,
        PacketType::Handshake => 0x03,
        PacketType::Ack => 0x04,
        PacketType::Fragment => 0x05,
    }
}

fn packet_type_from_legacy(byte: u8) -> Option<PacketType> {
    Some(match byte {
        0x01 => PacketType::Data,
        0x02 => PacketType::Announce,
        0x03 => PacketType::Handshake,
        0x04 => PacketType::Ack,
        0x05 => PacketType::Fragment,
        _ => return None,
    })
}

fn encode_legacy_frame(packet: &Packet) -> Vec<u8> {
    let sender_id = packet.source_hash.short_prefix();
    let mut out = Vec::with_capacity(LEGACY_HEADER_LEN + packet.payload.len());
    out.push(legacy_type_byte(packet.packet_type));
    out.extend_from_slice(&sender_id);
    if packet.is_broadcast() {
        out.push(0);
        out.extend_from_slice(&[0u8; 8]);
    } else {
        out.push(1);
        out.extend_from_slice(&packet.destination_hash.short_prefix());
    }
    out.extend_from_slice(&packet.payload);
    out
}

fn decode_legacy_frame(bytes: &[u8]) -> Option<Packet> {
    if bytes.len() < LEGACY_HEADER_LEN {
        return None;
    }
    let packet_type = packet_type_from_legacy(bytes[0])?;
    let sender_id = &bytes[1..9];
    let has_recipient = bytes[9] != 0;
    let recipient_id = &bytes[10..18];
    let payload = bytes[LEGACY_HEADER_LEN..].to_vec();

    let destination_hash =
        if has_recipient { AddressHash::from_short(recipient_id) } else { AddressHash::BROADCAST };

    Some(Packet {
        packet_id: PacketId::generate(&mut OsRng),
        source_hash: AddressHash::from_short(sender_id),
        destination_hash,
        payload,
        packet_type,
        hops: 0,
        ttl: meshline_proto::packet::DEFAULT_TTL,
        timestamp_ms: 0,
        reliable: false,
    })
}

pub struct ShortRangeTransport {
    link: Arc<dyn ShortRangeLink>,
    receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
    metrics: Arc<std::sync::Mutex<TransportMetrics>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ShortRangeTransport {
    pub fn new(link: Arc<dyn ShortRangeLink>) -> Self {
        let mut metrics = TransportMetrics::default();
        metrics.bitrate_bps = NOMINAL_BITRATE_BPS;
        metrics.reliability = NOMINAL_RELIABILITY;
        Self {
            link,
            receive_callback: Arc::new(std::sync::Mutex::new(None)),
            metrics: Arc::new(std::sync::Mutex::new(metrics)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    async fn run_poll_loop(
        link: Arc<dyn ShortRangeLink>,
        receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
        metrics: Arc<std::sync::Mutex<TransportMetrics>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let polled = {
                let link = link.clone();
                tokio::task::spawn_blocking(move || link.poll_frame()).await
            };
            let Ok(Ok(Some(frame))) = polled else { continue };

            let Some(packet) = decode_legacy_frame(&frame) else {
                if let Ok(mut m) = metrics.lock() {
                    m.parse_errors += 1;
                }
                continue;
            };

            if let Ok(mut m) = metrics.lock() {
                m.packets_received += 1;
                m.bytes_received += packet.payload.len() as u64;
            }

            let callback = receive_callback.lock().expect("receive_callback mutex poisoned").clone();
            if let Some(callback) = callback {
                let metadata = TransportMetadata {
                    transport: "shortrange".to_string(),
                    rssi: None,
                    snr: None,
                    hops: packet.hops,
                    link_latency_ms: None,
                };
                callback(packet, metadata);
            }
        }
    }
}

#[async_trait]
impl Transport for ShortRangeTransport {
    fn name(&self) -> &str {
        "shortrange"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.started.store(true, AtomicOrdering::SeqCst);
        tokio::spawn(Self::run_poll_loop(
            self.link.clone(),
            self.receive_callback.clone(),
            self.metrics.clone(),
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.started.store(false, AtomicOrdering::SeqCst);
    }

    async fn transmit(&self, packet: Packet) -> TransmitResult {
        let frame = encode_legacy_frame(&packet);
        let link = self.link.clone();
        let result = tokio::task::spawn_blocking(move || link.send_frame(&frame)).await;
        match result {
            Ok(Ok(())) => {
                if let Ok(mut m) = self.metrics.lock() {
                    m.packets_sent += 1;
                    m.bytes_sent += packet.payload.len() as u64;
                }
                TransmitResult::success()
            }
            Ok(Err(err)) => TransmitResult::failed(TransportError::from(err).to_string()),
            Err(join_err) => TransmitResult::failed(join_err.to_string()),
        }
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.receive_callback.lock().expect("receive_callback mutex poisoned") = Some(callback);
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.lock().expect("metrics mutex poisoned").clone()
    }

    fn is_available(&self) -> bool {
        self.started.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct MockLink {
        sent: StdMutex<Vec<Vec<u8>>>,
        inbound: StdMutex<Vec<Vec<u8>>>,
    }

    impl MockLink {
        fn new() -> Self {
            Self { sent: StdMutex::new(Vec::new()), inbound: StdMutex::new(Vec::new()) }
        }
    }

    impl ShortRangeLink for MockLink {
        fn send_frame(&self, frame: &[u8]) -> Result<(), ShortRangeError> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn poll_frame(&self) -> Result<Option<Vec<u8>>, ShortRangeError> {
            Ok(self.inbound.lock().unwrap().pop())
        }
    }

    fn packet(destination: AddressHash) -> Packet {
        Packet::new(
            &mut OsRng,
            AddressHash::from_key_material(b"sender"),
            destination,
            b"hi".to_vec(),
            PacketType::Data,
            false,
            1_000,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transmit_encodes_sender_and_recipient_short_ids() {
        let link = Arc::new(MockLink::new());
        let transport = ShortRangeTransport::new(link.clone());
        let result = transport.transmit(packet(AddressHash::from_key_material(b"dest"))).await;
        assert!(result.success);
        let frames = link.sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x01);
        assert_eq!(frames[0][9], 1);
    }

    #[tokio::test]
    async fn broadcast_packet_omits_recipient_id() {
        let link = Arc::new(MockLink::new());
        let transport = ShortRangeTransport::new(link.clone());
        transport.transmit(packet(AddressHash::BROADCAST)).await;
        let frames = link.sent.lock().unwrap();
        assert_eq!(frames[0][9], 0);
    }

    #[test]
    fn decode_reconstructs_zero_padded_addresses() {
        let packet = packet(AddressHash::from_key_material(b"dest"));
        let frame = encode_legacy_frame(&packet);
        let decoded = decode_legacy_frame(&frame).unwrap();
        assert_eq!(decoded.source_hash.short_prefix(), packet.source_hash.short_prefix());
        assert_eq!(decoded.destination_hash.short_prefix(), packet.destination_hash.short_prefix());
        assert_eq!(decoded.payload, packet.payload);
        assert_eq!(decoded.packet_type, packet.packet_type);
    }

    #[test]
    fn unknown_legacy_type_byte_is_rejected() {
        let mut frame = vec![0xFFu8; LEGACY_HEADER_LEN];
        frame[9] = 0;
        assert!(decode_legacy_frame(&frame).is_none());
    }
}
