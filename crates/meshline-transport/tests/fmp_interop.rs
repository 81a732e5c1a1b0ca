//! S5: FMP interoperability with an external, non-meshline FMP node.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use meshline_proto::fmp::{FmpAnnouncePayload, FmpDestinationType, FmpPacket, FmpPacketType};
use meshline_proto::hash::AddressHash;
use meshline_transport::radio::{DriverState, RadioConfig, RadioDriver, RadioMetrics, RadioReceiveCallback, ReceivedFrame};
use meshline_transport::{FmpTransport, Transport};

struct CapturingRadio {
    callback: StdMutex<Option<RadioReceiveCallback>>,
    transmit_count: AtomicU32,
}

impl CapturingRadio {
    fn new() -> Self {
        Self { callback: StdMutex::new(None), transmit_count: AtomicU32::new(0) }
    }
}

#[async_trait]
impl RadioDriver for CapturingRadio {
    async fn configure(&self, _config: RadioConfig) -> Result<(), meshline_transport::RadioError> {
        Ok(())
    }
    async fn start_receive(&self, callback: RadioReceiveCallback) -> Result<(), meshline_transport::RadioError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }
    async fn transmit(&self, _bytes: &[u8]) -> Result<(), meshline_transport::RadioError> {
        self.transmit_count.fetch_add(1, Ordering::SeqCst);
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
async fn an_external_announce_is_folded_into_the_node_s_tables() {
    let radio = Arc::new(CapturingRadio::new());
    let transport = FmpTransport::new(
        radio.clone() as Arc<dyn RadioDriver>,
        RadioConfig::default(),
        Some(AddressHash::from_key_material(b"this-node")),
        [0x77; 32],
    );
    transport.start().await.unwrap();

    let identity_hash = AddressHash::new([0x01; 16]);
    let announce = FmpPacket {
        packet_type: FmpPacketType::Announce,
        destination_type: FmpDestinationType::Plain,
        hops: 0,
        context: 0,
        destination_hash: AddressHash::BROADCAST,
        transport_id: identity_hash,
        payload: FmpAnnouncePayload { identity_hash, public_key: [0x02; 32], app_data: Vec::new() }.encode(),
    };

    let callback = radio.callback.lock().unwrap().clone().expect("start() registered a receive callback");
    callback(ReceivedFrame { payload: announce.encode(), rssi_dbm: -90, snr_db: 4.0 });

    for _ in 0..20 {
        if transport.announces_received() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    assert_eq!(transport.announces_received(), 1);
}
