//! S2: long-range fragmentation across a constrained MTU.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use meshline_proto::hash::AddressHash;
use meshline_proto::{Packet, PacketType};
use meshline_transport::radio::{DriverState, RadioConfig, RadioDriver, RadioMetrics, RadioReceiveCallback, ReceivedFrame};
use meshline_transport::{DutyCycleConfig, FragmenterConfig, LongRangeTransport, Transport};
use rand_core::OsRng;

struct LoopbackRadio {
    callback: StdMutex<Option<RadioReceiveCallback>>,
    transmit_count: AtomicU32,
}

impl LoopbackRadio {
    fn new() -> Self {
        Self { callback: StdMutex::new(None), transmit_count: AtomicU32::new(0) }
    }
}

#[async_trait]
impl RadioDriver for LoopbackRadio {
    async fn configure(&self, _config: RadioConfig) -> Result<(), meshline_transport::RadioError> {
        Ok(())
    }
    async fn start_receive(&self, callback: RadioReceiveCallback) -> Result<(), meshline_transport::RadioError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }
    async fn transmit(&self, bytes: &[u8]) -> Result<(), meshline_transport::RadioError> {
        self.transmit_count.fetch_add(1, Ordering::SeqCst);
        // Hand the frame straight to whoever is listening, simulating a
        // direct over-the-air delivery between two collocated nodes.
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(ReceivedFrame { payload: bytes.to_vec(), rssi_dbm: -60, snr_db: 9.0 });
        }
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

#[tokio::test]
async fn a_450_byte_payload_is_fragmented_and_reassembled_whole() {
    let radio = Arc::new(LoopbackRadio::new());
    let transport = LongRangeTransport::new(
        radio.clone() as Arc<dyn RadioDriver>,
        RadioConfig::default(),
        DutyCycleConfig::default(),
        FragmenterConfig { mtu: 200, ..Default::default() },
    );

    let delivered = Arc::new(StdMutex::new(None));
    let delivered_clone = delivered.clone();
    transport.set_receive_callback(Arc::new(move |packet: Packet, _meta| {
        *delivered_clone.lock().unwrap() = Some(packet);
    }));

    transport.start().await.unwrap();

    let payload = vec![0x5Au8; 450];
    let packet = Packet::new(
        &mut OsRng,
        AddressHash::from_key_material(b"node-a"),
        AddressHash::from_key_material(b"node-b"),
        payload.clone(),
        PacketType::Data,
        false,
        1_000,
    )
    .unwrap();

    let result = transport.transmit(packet).await;
    assert!(result.success);
    assert_eq!(radio.transmit_count.load(Ordering::SeqCst), 3);

    for _ in 0..20 {
        if delivered.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    let received = delivered.lock().unwrap().clone().expect("reassembled packet delivered");
    assert_eq!(received.payload, payload);
}
