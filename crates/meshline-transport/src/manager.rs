//! Transport Manager (§4.11): the application-facing boundary over an
//! ordered list of `Transport`s — dedup, transport selection, relay,
//! and retry. Background upkeep follows `transport::jobs`'s
//! `tokio::select!` loop shape; the dedup cache's prune-on-timer
//! pattern is the same one `Pathfinder`'s path tables use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshline_proto::{Packet, PacketId};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport_trait::{ReceiveCallback, Transport, TransmitResult, TransportMetadata};

const DEDUP_TTL: Duration = Duration::from_secs(60);
const RETRY_AGE: Duration = Duration::from_secs(5);
const MAX_SEND_ATTEMPTS: u8 = 3;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);
const SHORT_RANGE_NAME: &str = "shortrange";

struct PendingPacket {
    packet: Packet,
    queued_at: Instant,
    attempts: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStatus {
    pub short_range_active: bool,
    pub short_range_peers: usize,
    pub long_range_active: bool,
    pub long_range_peers: usize,
    pub total_bandwidth_bps: u64,
    pub pending_packets: usize,
}

type PacketHandler = Arc<dyn Fn(Packet, TransportMetadata) + Send + Sync>;

struct TransportEntry {
    name: String,
    transport: Arc<dyn Transport>,
}

pub struct TransportManager {
    transports: Arc<RwLock<Vec<TransportEntry>>>,
    seen_packets: Arc<Mutex<HashMap<PacketId, Instant>>>,
    pending: Arc<Mutex<Vec<PendingPacket>>>,
    packet_handler: Arc<std::sync::Mutex<Option<PacketHandler>>>,
    status_tx: watch::Sender<TransportStatus>,
    status_rx: watch::Receiver<TransportStatus>,
    cancel: CancellationToken,
}

impl TransportManager {
    pub fn new() -> Self {
        let (status_tx, status_rx) = watch::channel(TransportStatus::default());
        Self {
            transports: Arc::new(RwLock::new(Vec::new())),
            seen_packets: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
            packet_handler: Arc::new(std::sync::Mutex::new(None)),
            status_tx,
            status_rx,
            cancel: CancellationToken::new(),
        }
    }

    fn receive_dispatch(&self) -> ReceiveCallback {
        let transports = self.transports.clone();
        let seen_packets = self.seen_packets.clone();
        let packet_handler = self.packet_handler.clone();
        Arc::new(move |packet: Packet, metadata: TransportMetadata| {
            let transports = transports.clone();
            let seen_packets = seen_packets.clone();
            let packet_handler = packet_handler.clone();
            tokio::spawn(async move {
                {
                    let mut seen = seen_packets.lock().await;
                    if let Some(seen_at) = seen.get(&packet.packet_id) {
                        if seen_at.elapsed() <= DEDUP_TTL {
                            return;
                        }
                    }
                    seen.insert(packet.packet_id, Instant::now());
                }

                let handler = packet_handler.lock().expect("packet_handler mutex poisoned").clone();
                if let Some(handler) = handler {
                    handler(packet.clone(), metadata.clone());
                }

                if packet.is_broadcast() && packet.can_relay() {
                    let relayed = packet.relayed();
                    let entries = transports.read().await;
                    for entry in entries.iter() {
                        if entry.name == metadata.transport || !entry.transport.is_available() {
                            continue;
                        }
                        let relayed = relayed.clone();
                        let transport = entry.transport.clone();
                        tokio::spawn(async move {
                            transport.transmit(relayed).await;
                        });
                    }
                }
            });
        })
    }

    pub async fn add_transport(&self, name: impl Into<String>, transport: Arc<dyn Transport>) {
        let name = name.into();
        transport.set_receive_callback(self.receive_dispatch());
        let _ = transport.start().await;
        self.transports.write().await.push(TransportEntry { name, transport });
    }

    pub async fn remove_transport(&self, name: &str) {
        let mut entries = self.transports.write().await;
        if let Some(idx) = entries.iter().position(|e| e.name == name) {
            let entry = entries.remove(idx);
            entry.transport.stop().await;
        }
    }

    pub async fn get_transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.read().await.iter().find(|e| e.name == name).map(|e| e.transport.clone())
    }

    pub async fn start_all(&self) -> Result<(), TransportError> {
        for entry in self.transports.read().await.iter() {
            entry.transport.start().await?;
        }
        tokio::spawn(Self::run_maintenance_loop(
            self.transports.clone(),
            self.seen_packets.clone(),
            self.pending.clone(),
            self.status_tx.clone(),
            self.cancel.clone(),
        ));
        Ok(())
    }

    pub async fn stop_all(&self) {
        self.cancel.cancel();
        for entry in self.transports.read().await.iter() {
            entry.transport.stop().await;
        }
    }

    pub fn set_packet_handler(&self, handler: PacketHandler) {
        *self.packet_handler.lock().expect("packet_handler mutex poisoned") = Some(handler);
    }

    pub fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_rx.clone()
    }

    async fn is_duplicate(&self, packet_id: PacketId) -> bool {
        let seen = self.seen_packets.lock().await;
        seen.get(&packet_id).is_some_and(|at| at.elapsed() <= DEDUP_TTL)
    }

    async fn stamp(&self, packet_id: PacketId) {
        self.seen_packets.lock().await.insert(packet_id, Instant::now());
    }

    async fn enqueue_pending(&self, packet: Packet) {
        self.pending.lock().await.push(PendingPacket { packet, queued_at: Instant::now(), attempts: 0 });
    }

    /// §4.11 `send`: prefers the short-range transport, else the first
    /// available one in registration order, else queues (if the packet
    /// is marked reliable) or fails outright.
    pub async fn send(&self, packet: Packet) -> TransmitResult {
        if self.is_duplicate(packet.packet_id).await {
            return TransmitResult::failed(TransportError::Duplicate(packet.packet_id.to_string()).to_string());
        }
        self.stamp(packet.packet_id).await;

        let entries = self.transports.read().await;
        let chosen = entries
            .iter()
            .find(|e| e.name == SHORT_RANGE_NAME && e.transport.is_available())
            .or_else(|| entries.iter().find(|e| e.transport.is_available()));

        let Some(entry) = chosen else {
            drop(entries);
            if packet.reliable {
                self.enqueue_pending(packet).await;
                return TransmitResult::queued(Instant::now() + RETRY_AGE);
            }
            return TransmitResult::failed(TransportError::TransportUnavailable("none".to_string()).to_string());
        };

        let result = entry.transport.transmit(packet.clone()).await;
        if !result.success && !result.queued && packet.reliable {
            drop(entries);
            self.enqueue_pending(packet).await;
        }
        result
    }

    /// §4.11 `broadcast`: stamps dedup, then transmits on every available
    /// transport concurrently.
    pub async fn broadcast(&self, packet: Packet) {
        self.stamp(packet.packet_id).await;
        let entries = self.transports.read().await;
        let mut handles = Vec::new();
        for entry in entries.iter().filter(|e| e.transport.is_available()) {
            let transport = entry.transport.clone();
            let packet = packet.clone();
            handles.push(tokio::spawn(async move {
                transport.transmit(packet).await;
            }));
        }
        drop(entries);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_maintenance_loop(
        transports: Arc<RwLock<Vec<TransportEntry>>>,
        seen_packets: Arc<Mutex<HashMap<PacketId, Instant>>>,
        pending: Arc<Mutex<Vec<PendingPacket>>>,
        status_tx: watch::Sender<TransportStatus>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
            }

            seen_packets.lock().await.retain(|_, at| at.elapsed() <= DEDUP_TTL);

            let due: Vec<PendingPacket> = {
                let mut pending = pending.lock().await;
                let mut due = Vec::new();
                let mut keep = Vec::new();
                for entry in pending.drain(..) {
                    if entry.queued_at.elapsed() >= RETRY_AGE {
                        due.push(entry);
                    } else {
                        keep.push(entry);
                    }
                }
                *pending = keep;
                due
            };

            for mut entry in due {
                let chosen = {
                    let entries = transports.read().await;
                    entries
                        .iter()
                        .find(|e| e.name == SHORT_RANGE_NAME && e.transport.is_available())
                        .or_else(|| entries.iter().find(|e| e.transport.is_available()))
                        .map(|e| e.transport.clone())
                };
                let Some(transport) = chosen else {
                    entry.attempts += 1;
                    if entry.attempts < MAX_SEND_ATTEMPTS {
                        pending.lock().await.push(entry);
                    } else {
                        log::warn!("transport manager: dropping pending packet after {MAX_SEND_ATTEMPTS} attempts");
                    }
                    continue;
                };
                let result = transport.transmit(entry.packet.clone()).await;
                if !result.success {
                    entry.attempts += 1;
                    entry.queued_at = Instant::now();
                    if entry.attempts < MAX_SEND_ATTEMPTS {
                        pending.lock().await.push(entry);
                    } else {
                        log::warn!("transport manager: dropping pending packet after {MAX_SEND_ATTEMPTS} attempts");
                    }
                }
            }

            let entries = transports.read().await;
            let short_range = entries.iter().find(|e| e.name == SHORT_RANGE_NAME);
            let long_range = entries.iter().find(|e| e.name == "longrange");
            let total_bandwidth_bps =
                entries.iter().filter(|e| e.transport.is_available()).map(|e| e.transport.metrics().bitrate_bps).sum();
            let status = TransportStatus {
                short_range_active: short_range.is_some_and(|e| e.transport.is_available()),
                short_range_peers: 0,
                long_range_active: long_range.is_some_and(|e| e.transport.is_available()),
                long_range_peers: 0,
                total_bandwidth_bps,
                pending_packets: pending.lock().await.len(),
            };
            let _ = status_tx.send(status);
        }
    }
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new()
    }
}
