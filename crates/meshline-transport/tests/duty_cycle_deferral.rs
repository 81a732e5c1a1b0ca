//! S3: duty-cycle deferral once the regulatory airtime budget is spent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meshline_proto::hash::AddressHash;
use meshline_proto::{Packet, PacketType};
use meshline_transport::radio::{DriverState, RadioConfig, RadioDriver, RadioMetrics, RadioReceiveCallback};
use meshline_transport::{DutyCycleConfig, FragmenterConfig, LongRangeTransport, Transport};
use rand_core::OsRng;

struct SilentRadio {
    transmit_count: AtomicU32,
}

#[async_trait]
impl RadioDriver for SilentRadio {
    async fn configure(&self, _config: RadioConfig) -> Result<(), meshline_transport::RadioError> {
        Ok(())
    }
    async fn start_receive(&self, _callback: RadioReceiveCallback) -> Result<(), meshline_transport::RadioError> {
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
async fn transmit_is_deferred_once_the_hourly_budget_is_spent() {
    let radio = Arc::new(SilentRadio { transmit_count: AtomicU32::new(0) });
    let transport = LongRangeTransport::new(
        radio.clone() as Arc<dyn RadioDriver>,
        RadioConfig::default(), // 868.1 MHz falls in the 1% main band (36 000 ms/hour).
        DutyCycleConfig::default(),
        FragmenterConfig::default(),
    );
    transport.start().await.unwrap();

    // Drain the governor's budget by transmitting small packets until the
    // logged airtime crosses 36 000 ms, the way a long session of small
    // sends would in practice.
    loop {
        let packet = Packet::new(
            &mut OsRng,
            AddressHash::from_key_material(b"a"),
            AddressHash::from_key_material(b"b"),
            vec![0u8; 40],
            PacketType::Data,
            false,
            1_000,
        )
        .unwrap();
        let result = transport.transmit(packet).await;
        if !result.success && result.queued {
            assert!(result.estimated_delivery.is_some());
            break;
        }
        assert!(radio.transmit_count.load(Ordering::SeqCst) < 2_000, "budget never exhausted");
    }
}
