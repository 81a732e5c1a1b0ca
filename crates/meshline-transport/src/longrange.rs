//! Long-Range Transport (§4.6): composes the radio driver, duty-cycle
//! governor, and fragmenter behind the `Transport` capability interface,
//! with a priority queue absorbing sends that can't go out immediately
//! (duty-cycle backoff, a busy channel). Background processing follows
//! `transport::jobs::manage_transport`'s `tokio::select!` loop shape.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshline_proto::Packet;
use rand_core::{OsRng, RngCore};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::duty_cycle::{DutyCycleConfig, DutyCycleGovernor};
use crate::error::TransportError;
use crate::fragmenter::{Fragmenter, FragmenterConfig};
use crate::radio::{bitrate_bps, RadioConfig, RadioDriver, ReceivedFrame, CAD_ATTEMPTS, CAD_INTERVAL};
use crate::transport_trait::{ReceiveCallback, Transport, TransmitResult, TransportMetadata, TransportMetrics};

const CAD_THRESHOLD_DBM: i16 = -120;
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRIES: u8 = 3;
const DEFAULT_RELIABILITY: f32 = 0.75;

struct QueuedPacket {
    packet: Packet,
    priority: u8,
    due_time: Instant,
    retry_count: u8,
}

/// Lower `priority` values are serviced first; handshake and announce
/// traffic outrank ordinary data so control-plane messages aren't stuck
/// behind a large data queue.
fn priority_for(packet: &Packet) -> u8 {
    use meshline_proto::PacketType;
    let base = match packet.packet_type {
        PacketType::Handshake => 0,
        PacketType::Announce | PacketType::Ack => 1,
        PacketType::Data | PacketType::Fragment => 2,
    };
    if packet.reliable {
        base.saturating_sub(1)
    } else {
        base
    }
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.due_time == other.due_time
    }
}
impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    /// Reversed so `BinaryHeap`'s max-heap pops the *lowest* priority
    /// number first, and among equal priorities, the earliest `due_time`.
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| other.due_time.cmp(&self.due_time))
    }
}

pub struct LongRangeTransport {
    radio: Arc<dyn RadioDriver>,
    radio_config: RadioConfig,
    governor: Arc<Mutex<DutyCycleGovernor>>,
    fragmenter: Arc<Mutex<Fragmenter>>,
    queue: Arc<Mutex<BinaryHeap<QueuedPacket>>>,
    receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
    metrics: Arc<std::sync::Mutex<TransportMetrics>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl LongRangeTransport {
    pub fn new(
        radio: Arc<dyn RadioDriver>,
        radio_config: RadioConfig,
        duty_cycle_config: DutyCycleConfig,
        fragmenter_config: FragmenterConfig,
    ) -> Self {
        let mut metrics = TransportMetrics::default();
        metrics.bitrate_bps = bitrate_bps(radio_config.spreading_factor, radio_config.bandwidth_hz);
        metrics.reliability = DEFAULT_RELIABILITY;
        Self {
            radio,
            radio_config,
            governor: Arc::new(Mutex::new(DutyCycleGovernor::new(duty_cycle_config))),
            fragmenter: Arc::new(Mutex::new(Fragmenter::new(fragmenter_config))),
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            receive_callback: Arc::new(std::sync::Mutex::new(None)),
            metrics: Arc::new(std::sync::Mutex::new(metrics)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    async fn enqueue(&self, packet: Packet, due_time: Instant, retry_count: u8) {
        self.queue.lock().await.push(QueuedPacket {
            priority: priority_for(&packet),
            packet,
            due_time,
            retry_count,
        });
    }

    async fn run_queue_processor(
        radio: Arc<dyn RadioDriver>,
        radio_config: RadioConfig,
        governor: Arc<Mutex<DutyCycleGovernor>>,
        fragmenter: Arc<Mutex<Fragmenter>>,
        queue: Arc<Mutex<BinaryHeap<QueuedPacket>>>,
        metrics: Arc<std::sync::Mutex<TransportMetrics>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => {}
            }

            let ready = {
                let mut q = queue.lock().await;
                match q.peek() {
                    Some(head) if head.due_time <= Instant::now() => q.pop(),
                    _ => None,
                }
            };
            let Some(queued) = ready else { continue };

            let result = transmit_over_radio(
                &radio,
                &radio_config,
                &governor,
                &fragmenter,
                queued.packet.clone(),
            )
            .await;

            match result {
                Ok(r) if r.success => {
                    if let Ok(mut m) = metrics.lock() {
                        m.packets_sent += 1;
                    }
                }
                Ok(r) if r.queued => {
                    let due_time = r.estimated_delivery.unwrap_or_else(|| Instant::now() + RETRY_DELAY);
                    queue.lock().await.push(QueuedPacket {
                        priority: priority_for(&queued.packet),
                        packet: queued.packet,
                        due_time,
                        retry_count: queued.retry_count,
                    });
                }
                Ok(_) | Err(_) if queued.retry_count + 1 < MAX_RETRIES => {
                    queue.lock().await.push(QueuedPacket {
                        priority: priority_for(&queued.packet),
                        packet: queued.packet,
                        due_time: Instant::now() + RETRY_DELAY,
                        retry_count: queued.retry_count + 1,
                    });
                }
                Ok(_) | Err(_) => {
                    log::warn!("longrange: dropping packet after {MAX_RETRIES} failed retries");
                }
            }
        }
    }
}

fn random_jitter_ms() -> u64 {
    100 + (OsRng.next_u32() % 901) as u64
}

/// Implements the §4.6 `transmit` protocol: estimate size, consult the
/// duty-cycle governor, perform CAD per fragment, transmit, and log
/// airtime. Shared between the `Transport::transmit` fast path and the
/// background queue processor's retry path.
async fn transmit_over_radio(
    radio: &Arc<dyn RadioDriver>,
    radio_config: &RadioConfig,
    governor: &Mutex<DutyCycleGovernor>,
    fragmenter: &Mutex<Fragmenter>,
    packet: Packet,
) -> Result<TransmitResult, TransportError> {
    let encoded = packet.encode();
    let fragments = {
        let fragmenter = fragmenter.lock().await;
        fragmenter.fragment(packet.packet_id.short_id(), &encoded)
    };
    let total_on_air_bytes: usize = fragments.iter().map(|f| f.encode().len()).sum();

    let backoff_ms = {
        let mut governor = governor.lock().await;
        governor.backoff_for(
            total_on_air_bytes,
            radio_config.spreading_factor,
            radio_config.bandwidth_hz,
            radio_config.frequency_hz,
        )?
    };
    if backoff_ms > 0 {
        let estimated = Instant::now() + Duration::from_millis(backoff_ms);
        return Ok(TransmitResult {
            success: false,
            queued: true,
            estimated_delivery: Some(estimated),
            error: None,
        });
    }

    let mut total_airtime_ms = 0u64;
    let fragment_count = fragments.len();
    for (i, fragment) in fragments.into_iter().enumerate() {
        let mut busy = true;
        for _ in 0..CAD_ATTEMPTS {
            if radio.channel_free(CAD_THRESHOLD_DBM).await {
                busy = false;
                break;
            }
            tokio::time::sleep(CAD_INTERVAL).await;
        }
        if busy {
            return Err(TransportError::ChannelBusy);
        }

        let frame = fragment.encode();
        radio.transmit(&frame).await?;

        let airtime_ms = {
            let mut governor = governor.lock().await;
            let airtime = governor.estimate_airtime(
                frame.len(),
                radio_config.spreading_factor,
                radio_config.bandwidth_hz,
            );
            governor.log_transmission(airtime);
            airtime
        };
        total_airtime_ms += airtime_ms;

        if fragment_count > 1 && i + 1 < fragment_count {
            tokio::time::sleep(Duration::from_millis(airtime_ms) + Duration::from_millis(50)).await;
        }
    }

    Ok(TransmitResult {
        success: true,
        queued: false,
        estimated_delivery: Some(Instant::now() + Duration::from_millis(total_airtime_ms)),
        error: None,
    })
}

#[async_trait]
impl Transport for LongRangeTransport {
    fn name(&self) -> &str {
        "longrange"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.radio.configure(self.radio_config).await?;

        let fragmenter = self.fragmenter.clone();
        let receive_callback = self.receive_callback.clone();
        let metrics = self.metrics.clone();
        self.radio
            .start_receive(Arc::new(move |frame: ReceivedFrame| {
                let fragmenter = fragmenter.clone();
                let receive_callback = receive_callback.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    handle_received_frame(frame, fragmenter, receive_callback, metrics).await;
                });
            }))
            .await?;

        self.started.store(true, AtomicOrdering::SeqCst);
        tokio::spawn(Self::run_queue_processor(
            self.radio.clone(),
            self.radio_config,
            self.governor.clone(),
            self.fragmenter.clone(),
            self.queue.clone(),
            self.metrics.clone(),
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.radio.stop().await;
        self.started.store(false, AtomicOrdering::SeqCst);
    }

    async fn transmit(&self, packet: Packet) -> TransmitResult {
        match transmit_over_radio(&self.radio, &self.radio_config, &self.governor, &self.fragmenter, packet.clone())
            .await
        {
            Ok(result) => {
                if result.success {
                    if let Ok(mut m) = self.metrics.lock() {
                        m.packets_sent += 1;
                        m.bytes_sent += packet.payload.len() as u64;
                    }
                } else if result.queued {
                    self.enqueue(packet, result.estimated_delivery.unwrap_or_else(Instant::now), 0).await;
                }
                result
            }
            Err(TransportError::ChannelBusy) => {
                let due = Instant::now() + Duration::from_millis(random_jitter_ms());
                self.enqueue(packet, due, 0).await;
                TransmitResult { success: false, queued: true, estimated_delivery: Some(due), error: None }
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

/// Reassembles one radio frame into a fragment, feeds it to the
/// fragmenter, and on completion decodes and delivers the packet. The
/// radio link has no addressed peer below the packet layer, so
/// reassembly is keyed under a shared empty hash rather than a
/// per-sender one — fine for point-to-point air time, but two senders
/// transmitting the same `packet_id_short` concurrently could collide.
async fn handle_received_frame(
    frame: ReceivedFrame,
    fragmenter: Arc<Mutex<Fragmenter>>,
    receive_callback: Arc<std::sync::Mutex<Option<ReceiveCallback>>>,
    metrics: Arc<std::sync::Mutex<TransportMetrics>>,
) {
    let fragment = match meshline_proto::fragment::Fragment::decode(&frame.payload) {
        Ok(fragment) => fragment,
        Err(_) => {
            if let Ok(mut m) = metrics.lock() {
                m.parse_errors += 1;
            }
            return;
        }
    };

    let reassembled = {
        let mut fragmenter = fragmenter.lock().await;
        fragmenter.defragment(meshline_proto::hash::AddressHash::new_empty(), fragment)
    };
    let bytes = match reassembled {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return,
        Err(_) => {
            if let Ok(mut m) = metrics.lock() {
                m.parse_errors += 1;
            }
            return;
        }
    };

    let packet = match Packet::decode(&bytes) {
        Ok(packet) => packet,
        Err(_) => {
            if let Ok(mut m) = metrics.lock() {
                m.parse_errors += 1;
            }
            return;
        }
    };

    if let Ok(mut m) = metrics.lock() {
        m.packets_received += 1;
        m.bytes_received += packet.payload.len() as u64;
    }

    let callback = receive_callback.lock().expect("receive_callback mutex poisoned").clone();
    if let Some(callback) = callback {
        let metadata = TransportMetadata {
            transport: "longrange".to_string(),
            rssi: Some(frame.rssi_dbm),
            snr: Some(frame.snr_db),
            hops: packet.hops,
            link_latency_ms: None,
        };
        callback(packet, metadata);
    }
}
