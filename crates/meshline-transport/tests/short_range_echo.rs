//! S1: single-hop short-range echo.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use meshline_proto::hash::AddressHash;
use meshline_proto::{Packet, PacketType};
use meshline_transport::{ShortRangeLink, ShortRangeTransport, ShortRangeError, Transport};
use rand_core::OsRng;

struct LoopbackLink {
    inbound: StdMutex<Vec<Vec<u8>>>,
    outbound: StdMutex<Vec<Vec<u8>>>,
}

impl LoopbackLink {
    fn new() -> Self {
        Self { inbound: StdMutex::new(Vec::new()), outbound: StdMutex::new(Vec::new()) }
    }
}

impl ShortRangeLink for LoopbackLink {
    fn send_frame(&self, frame: &[u8]) -> Result<(), ShortRangeError> {
        self.outbound.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn poll_frame(&self) -> Result<Option<Vec<u8>>, ShortRangeError> {
        Ok(self.inbound.lock().unwrap().pop())
    }
}

#[tokio::test]
async fn single_hop_short_range_echo_is_delivered_exactly_once() {
    let node_a_link = Arc::new(LoopbackLink::new());
    let node_a = ShortRangeTransport::new(node_a_link.clone());

    let node_b_link = Arc::new(LoopbackLink::new());
    let node_b = ShortRangeTransport::new(node_b_link.clone());

    let delivered_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let delivered_payload = Arc::new(StdMutex::new(Vec::new()));
    let count = delivered_count.clone();
    let payload_out = delivered_payload.clone();
    node_b.set_receive_callback(Arc::new(move |packet: Packet, _meta| {
        count.fetch_add(1, Ordering::SeqCst);
        *payload_out.lock().unwrap() = packet.payload;
    }));

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    let b_hash = AddressHash::from_key_material(b"node-b");
    let packet = Packet::new(
        &mut OsRng,
        AddressHash::from_key_material(b"node-a"),
        b_hash,
        b"hello".to_vec(),
        PacketType::Data,
        false,
        1_000,
    )
    .unwrap();

    let result = node_a.transmit(packet).await;
    assert!(result.success);

    // Hand node A's outbound frame directly to node B's link, the way a
    // shared medium would deliver it.
    let frame = node_a_link.outbound.lock().unwrap().pop().expect("node A transmitted a frame");
    node_b_link.inbound.lock().unwrap().push(frame);

    // Give the poll loop a chance to observe the queued inbound frame.
    for _ in 0..20 {
        if delivered_count.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    assert_eq!(delivered_count.load(Ordering::SeqCst), 1);
    assert_eq!(*delivered_payload.lock().unwrap(), b"hello".to_vec());
}
