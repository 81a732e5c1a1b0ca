//! FMP Transport (§4.7): bridges the universal Packet model to the
//! Foreign Mesh Protocol wire format spoken by existing radio nodes,
//! over the same Radio Driver surface the Long-Range Transport uses.
//! Table upkeep (`forwarding_table`, `known_destinations`) follows
//! `transport::announce_table::AnnounceTable`'s shape: plain maps keyed
//! by destination, pruned on a timer rather than eagerly on every read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use meshline_proto::fmp::{FmpDestinationType, FmpPacket, FmpPacketType};
use meshline_proto::hash::AddressHash;
use meshline_proto::{Packet, PacketId, PacketType};
use rand_core::{OsRng, RngCore};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::radio::{RadioConfig, RadioDriver, ReceivedFrame};
use crate::transport_trait::{ReceiveCallback, Transport, TransmitResult, TransportMetadata, TransportMetrics};

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(300);
const FORWARDING_ENTRY_TTL: Duration = Duration::from_secs(600);
const MAX_RELAY_HOPS: u8 = 8;
const CHUNK_SIZE: usize = 200;
const CHUNK_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_RELIABILITY: f32 = 0.6;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn build_announce_packet(identity_hash: AddressHash, public_key: [u8; 32]) -> FmpPacket {
    let payload = meshline_proto::fmp::FmpAnnouncePayload {
        identity_hash,
        public_key,
        app_data: Vec::new(),
    }
    .encode();
    FmpPacket {
        packet_type: FmpPacketType::Announce,
        destination_type: FmpDestinationType::Plain,
        hops: 0,
        context: 0,
        destination_hash: AddressHash::BROADCAST,
        transport_id: identity_hash,
        payload,
    }
}

#[derive(Clone)]
struct ForwardingEntry {
    next_hop: AddressHash,
    hops: u8,
    expires_at: Instant,
}

#[derive(Clone)]
struct KnownDestination {
    public_key: [u8; 32],
    last_seen: Instant,
    via_transport: AddressHash,
    hops: u8,
    rssi: Option<i16>,
    snr: Option<f32>,
}

#[derive(Default)]
struct FmpTables {
    forwarding_table: HashMap<String, ForwardingEntry>,
    known_destinations: HashMap<String, KnownDestination>,
}

impl FmpTables {
    fn prune_expired(&mut self, now: Instant) {
        self.forwarding_table.retain(|_, entry| entry.expires_at > now);
    }
}

pub struct FmpTransport {
    identity_hash: AddressHash,
    announce_public_key: [u8; 32],
    radio: Arc<dyn RadioDriver>,
    radio_config: RadioConfig,
    tables: Arc<Mutex<FmpTables>>,
    receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
    metrics: Arc<std::sync::Mutex<TransportMetrics>>,
    announces_received: Arc<AtomicU64>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl FmpTransport {
    /// `identity_hash` is random per §4.7 unless the application supplies
    /// a persisted one; `announce_public_key` is carried in our Announce
    /// payload and is opaque to this transport (the application's
    /// long-term identity key, not used for any cryptographic operation
    /// here).
    pub fn new(
        radio: Arc<dyn RadioDriver>,
        radio_config: RadioConfig,
        identity_hash: Option<AddressHash>,
        announce_public_key: [u8; 32],
    ) -> Self {
        let identity_hash = identity_hash.unwrap_or_else(|| {
            let mut bytes = [0u8; 16];
            OsRng.fill_bytes(&mut bytes);
            AddressHash::new(bytes)
        });
        let mut metrics = TransportMetrics::default();
        metrics.reliability = DEFAULT_RELIABILITY;
        Self {
            identity_hash,
            announce_public_key,
            radio,
            radio_config,
            tables: Arc::new(Mutex::new(FmpTables::default())),
            receive_callback: Arc::new(std::sync::Mutex::new(None)),
            metrics: Arc::new(std::sync::Mutex::new(metrics)),
            announces_received: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn identity_hash(&self) -> AddressHash {
        self.identity_hash
    }

    /// Count of Announce frames processed since `start()`. Not part of
    /// the common `TransportMetrics` — specific to this transport's
    /// table upkeep.
    pub fn announces_received(&self) -> u64 {
        self.announces_received.load(AtomicOrdering::SeqCst)
    }

    async fn send_fmp(&self, packet: &FmpPacket) -> Result<(), TransportError> {
        let encoded = packet.encode();
        if encoded.len() <= CHUNK_SIZE {
            self.radio.transmit(&encoded).await?;
            return Ok(());
        }
        let chunks: Vec<&[u8]> = encoded.chunks(CHUNK_SIZE).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            self.radio.transmit(chunk).await?;
            if i + 1 < chunks.len() {
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        }
        Ok(())
    }

    fn build_announce(&self) -> FmpPacket {
        build_announce_packet(self.identity_hash, self.announce_public_key)
    }

    async fn run_announce_loop(
        identity_hash: AddressHash,
        announce_public_key: [u8; 32],
        radio: Arc<dyn RadioDriver>,
        cancel: CancellationToken,
    ) {
        loop {
            let announce = build_announce_packet(identity_hash, announce_public_key);
            let _ = radio.transmit(&announce.encode()).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(ANNOUNCE_INTERVAL) => {}
            }
        }
    }

    async fn run_prune_loop(tables: Arc<Mutex<FmpTables>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(FORWARDING_ENTRY_TTL) => {}
            }
            tables.lock().await.prune_expired(Instant::now());
        }
    }
}

/// Converts an inbound FMP Data packet into the universal Packet model.
/// The FMP wire format carries no `packet_id`/`ttl`/`reliable` of its
/// own, so these are synthesized fresh on arrival — a packet crossing
/// the FMP bridge is, from the core's point of view, originating here.
fn fmp_data_to_packet(fmp: &FmpPacket) -> Packet {
    Packet {
        packet_id: PacketId::generate(&mut OsRng),
        source_hash: fmp.transport_id,
        destination_hash: fmp.destination_hash,
        payload: fmp.payload.clone(),
        packet_type: PacketType::Data,
        hops: fmp.hops,
        ttl: meshline_proto::packet::DEFAULT_TTL,
        timestamp_ms: now_ms(),
        reliable: false,
    }
}

async fn handle_received_frame(
    frame: ReceivedFrame,
    identity_hash: AddressHash,
    radio: Arc<dyn RadioDriver>,
    tables: Arc<Mutex<FmpTables>>,
    receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
    metrics: Arc<std::sync::Mutex<TransportMetrics>>,
    announces_received: Arc<AtomicU64>,
) {
    let fmp = match FmpPacket::decode(&frame.payload) {
        Ok(fmp) => fmp,
        Err(_) => {
            if let Ok(mut m) = metrics.lock() {
                m.parse_errors += 1;
            }
            return;
        }
    };

    match fmp.packet_type {
        FmpPacketType::Announce => {
            let Ok(announce) = meshline_proto::fmp::FmpAnnouncePayload::decode(&fmp.payload) else {
                if let Ok(mut m) = metrics.lock() {
                    m.parse_errors += 1;
                }
                return;
            };
            let dest_hex = announce.identity_hash.to_hex();
            let mut tables = tables.lock().await;
            let now = Instant::now();
            tables.known_destinations.insert(
                dest_hex.clone(),
                KnownDestination {
                    public_key: announce.public_key,
                    last_seen: now,
                    via_transport: fmp.transport_id,
                    hops: fmp.hops,
                    rssi: Some(frame.rssi_dbm),
                    snr: Some(frame.snr_db),
                },
            );
            tables.forwarding_table.insert(
                dest_hex,
                ForwardingEntry {
                    next_hop: fmp.transport_id,
                    hops: fmp.hops,
                    expires_at: now + FORWARDING_ENTRY_TTL,
                },
            );
            announces_received.fetch_add(1, AtomicOrdering::SeqCst);
        }
        FmpPacketType::Data => {
            let for_us = fmp.destination_hash == identity_hash || fmp.is_broadcast();
            if for_us {
                if let Ok(mut m) = metrics.lock() {
                    m.packets_received += 1;
                    m.bytes_received += fmp.payload.len() as u64;
                }
                let callback =
                    receive_callback.lock().expect("receive_callback mutex poisoned").clone();
                if let Some(callback) = callback {
                    let packet = fmp_data_to_packet(&fmp);
                    let metadata = TransportMetadata {
                        transport: "fmp".to_string(),
                        rssi: Some(frame.rssi_dbm),
                        snr: Some(frame.snr_db),
                        hops: fmp.hops,
                        link_latency_ms: None,
                    };
                    callback(packet, metadata);
                }
            } else if fmp.hops < MAX_RELAY_HOPS && fmp.transport_id != identity_hash {
                let relayed = fmp.hop();
                let _ = radio.transmit(&relayed.encode()).await;
            }
        }
        FmpPacketType::Link | FmpPacketType::Proof => {
            // Reserved; link-establishment-over-FMP is deferred.
        }
    }
}

#[async_trait]
impl Transport for FmpTransport {
    fn name(&self) -> &str {
        "fmp"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.radio.configure(self.radio_config).await?;

        let identity_hash = self.identity_hash;
        let radio = self.radio.clone();
        let tables = self.tables.clone();
        let receive_callback = self.receive_callback.clone();
        let metrics = self.metrics.clone();
        let announces_received = self.announces_received.clone();
        self.radio
            .start_receive(Arc::new(move |frame: ReceivedFrame| {
                let radio = radio.clone();
                let tables = tables.clone();
                let receive_callback = receive_callback.clone();
                let metrics = metrics.clone();
                let announces_received = announces_received.clone();
                tokio::spawn(async move {
                    handle_received_frame(
                        frame,
                        identity_hash,
                        radio,
                        tables,
                        receive_callback,
                        metrics,
                        announces_received,
                    )
                    .await;
                });
            }))
            .await?;

        self.started.store(true, AtomicOrdering::SeqCst);
        tokio::spawn(Self::run_announce_loop(
            self.identity_hash,
            self.announce_public_key,
            self.radio.clone(),
            self.cancel.clone(),
        ));
        tokio::spawn(Self::run_prune_loop(self.tables.clone(), self.cancel.clone()));
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.radio.stop().await;
        self.started.store(false, AtomicOrdering::SeqCst);
    }

    async fn transmit(&self, packet: Packet) -> TransmitResult {
        let destination_type =
            if packet.is_broadcast() { FmpDestinationType::Plain } else { FmpDestinationType::Single };
        let fmp = FmpPacket {
            packet_type: FmpPacketType::Data,
            destination_type,
            hops: packet.hops,
            context: 0,
            destination_hash: packet.destination_hash,
            transport_id: self.identity_hash,
            payload: packet.payload.clone(),
        };
        match self.send_fmp(&fmp).await {
            Ok(()) => {
                if let Ok(mut m) = self.metrics.lock() {
                    m.packets_sent += 1;
                    m.bytes_sent += packet.payload.len() as u64;
                }
                TransmitResult::success()
            }
            Err(err) => TransmitResult::failed(err.to_string()),
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
    use crate::radio::{DriverState, RadioMetrics};
    use std::sync::atomic::{AtomicU32, Ordering as StdOrdering};
    use std::sync::Mutex as StdMutex;

    struct MockRadio {
        sent: StdMutex<Vec<Vec<u8>>>,
        transmit_count: AtomicU32,
    }

    impl MockRadio {
        fn new() -> Self {
            Self { sent: StdMutex::new(Vec::new()), transmit_count: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl RadioDriver for MockRadio {
        async fn configure(&self, _config: RadioConfig) -> Result<(), crate::error::RadioError> {
            Ok(())
        }
        async fn start_receive(
            &self,
            _callback: crate::radio::RadioReceiveCallback,
        ) -> Result<(), crate::error::RadioError> {
            Ok(())
        }
        async fn transmit(&self, bytes: &[u8]) -> Result<(), crate::error::RadioError> {
            self.transmit_count.fetch_add(1, StdOrdering::SeqCst);
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
        async fn channel_free(&self, _rssi_threshold_dbm: i16) -> bool {
            true
        }
        async fn stop(&self) {}
        fn metrics(&self) -> RadioMetrics {
            RadioMetrics::default()
        }
        fn state(&self) -> DriverState {
            DriverState::Connected
        }
    }

    fn packet(destination: AddressHash, payload: Vec<u8>) -> Packet {
        Packet::new(&mut OsRng, AddressHash::from_key_material(b"a"), destination, payload, PacketType::Data, false, 1_000)
            .unwrap()
    }

    #[tokio::test]
    async fn a_large_payload_is_chunked_into_multiple_radio_writes() {
        let radio = Arc::new(MockRadio::new());
        let transport = FmpTransport::new(
            radio.clone() as Arc<dyn RadioDriver>,
            RadioConfig::default(),
            Some(AddressHash::from_key_material(b"me")),
            [0x11; 32],
        );
        let result = transport.transmit(packet(AddressHash::from_key_material(b"b"), vec![0xAB; 500])).await;
        assert!(result.success);
        assert!(radio.transmit_count.load(StdOrdering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn announce_received_updates_forwarding_and_known_destinations() {
        let radio = Arc::new(MockRadio::new());
        let transport = FmpTransport::new(
            radio.clone() as Arc<dyn RadioDriver>,
            RadioConfig::default(),
            Some(AddressHash::from_key_material(b"me")),
            [0x11; 32],
        );
        let announce = transport.build_announce();
        let frame = ReceivedFrame { payload: announce.encode(), rssi_dbm: -80, snr_db: 6.0 };
        handle_received_frame(
            frame,
            transport.identity_hash,
            radio.clone() as Arc<dyn RadioDriver>,
            transport.tables.clone(),
            transport.receive_callback.clone(),
            transport.metrics.clone(),
            transport.announces_received.clone(),
        )
        .await;

        let tables = transport.tables.lock().await;
        assert_eq!(tables.known_destinations.len(), 1);
        assert_eq!(tables.forwarding_table.len(), 1);
        assert_eq!(transport.announces_received(), 1);
    }

    #[tokio::test]
    async fn data_addressed_to_us_is_delivered_via_callback() {
        let radio = Arc::new(MockRadio::new());
        let transport = FmpTransport::new(
            radio.clone() as Arc<dyn RadioDriver>,
            RadioConfig::default(),
            Some(AddressHash::from_key_material(b"me")),
            [0x11; 32],
        );
        let delivered = Arc::new(StdMutex::new(None));
        let delivered_clone = delivered.clone();
        transport.set_receive_callback(Arc::new(move |packet, _meta| {
            *delivered_clone.lock().unwrap() = Some(packet);
        }));

        let fmp = FmpPacket {
            packet_type: FmpPacketType::Data,
            destination_type: FmpDestinationType::Single,
            hops: 1,
            context: 0,
            destination_hash: transport.identity_hash,
            transport_id: AddressHash::from_key_material(b"neighbor"),
            payload: b"hello mesh".to_vec(),
        };
        let frame = ReceivedFrame { payload: fmp.encode(), rssi_dbm: -70, snr_db: 8.0 };
        handle_received_frame(
            frame,
            transport.identity_hash,
            radio.clone() as Arc<dyn RadioDriver>,
            transport.tables.clone(),
            transport.receive_callback.clone(),
            transport.metrics.clone(),
            transport.announces_received.clone(),
        )
        .await;

        let delivered = delivered.lock().unwrap().clone().expect("packet delivered");
        assert_eq!(delivered.payload, b"hello mesh");
    }

    #[tokio::test]
    async fn data_not_addressed_to_us_is_relayed() {
        let radio = Arc::new(MockRadio::new());
        let transport = FmpTransport::new(
            radio.clone() as Arc<dyn RadioDriver>,
            RadioConfig::default(),
            Some(AddressHash::from_key_material(b"me")),
            [0x11; 32],
        );
        let fmp = FmpPacket {
            packet_type: FmpPacketType::Data,
            destination_type: FmpDestinationType::Single,
            hops: 1,
            context: 0,
            destination_hash: AddressHash::from_key_material(b"other-node"),
            transport_id: AddressHash::from_key_material(b"neighbor"),
            payload: b"relay me".to_vec(),
        };
        let frame = ReceivedFrame { payload: fmp.encode(), rssi_dbm: -70, snr_db: 8.0 };
        handle_received_frame(
            frame,
            transport.identity_hash,
            radio.clone() as Arc<dyn RadioDriver>,
            transport.tables.clone(),
            transport.receive_callback.clone(),
            transport.metrics.clone(),
            transport.announces_received.clone(),
        )
        .await;

        assert_eq!(radio.transmit_count.load(StdOrdering::SeqCst), 1);
    }
}
