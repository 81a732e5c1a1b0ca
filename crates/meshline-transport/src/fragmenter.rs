//! Fragmenter (§4.3): splits outbound payloads larger than the radio MTU
//! and reassembles inbound fragments, keyed by `(packet_id_short,
//! source_hash)`. Stale reassembly buffers are evicted on a timer, the
//! same shape as ZeroTier's `Path::fragmented_packets` expiry sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshline_proto::fragment::{Fragment, FRAGMENT_HEADER_LEN};
use meshline_proto::hash::AddressHash;
use meshline_proto::ProtoError;

use crate::error::FragmentError;

const DEFAULT_MTU: usize = 200;
const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct FragmenterConfig {
    pub mtu: usize,
    pub reassembly_timeout: Duration,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self { mtu: DEFAULT_MTU, reassembly_timeout: REASSEMBLY_TIMEOUT }
    }
}

struct ReassemblyBuffer {
    total_fragments: u8,
    parts: HashMap<u8, Vec<u8>>,
    first_received_at: Instant,
}

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct BufferKey {
    packet_id_short: u16,
    source_hash: AddressHash,
}

pub struct Fragmenter {
    config: FragmenterConfig,
    buffers: HashMap<BufferKey, ReassemblyBuffer>,
}

impl Fragmenter {
    pub fn new(config: FragmenterConfig) -> Self {
        Self { config, buffers: HashMap::new() }
    }

    fn max_fragment_payload(&self) -> usize {
        self.config.mtu.saturating_sub(FRAGMENT_HEADER_LEN)
    }

    /// Splits `payload` into ordered fragments for `packet_id_short`. A
    /// payload fitting in one fragment still yields a single-element
    /// list with `total_fragments = 1`.
    pub fn fragment(&self, packet_id_short: u16, payload: &[u8]) -> Vec<Fragment> {
        let chunk_size = self.max_fragment_payload().max(1);
        if payload.len() <= chunk_size {
            return vec![Fragment {
                packet_id_short,
                fragment_num: 0,
                total_fragments: 1,
                payload: payload.to_vec(),
            }];
        }

        let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
        let total_fragments = chunks.len() as u8;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Fragment {
                packet_id_short,
                fragment_num: i as u8,
                total_fragments,
                payload: chunk.to_vec(),
            })
            .collect()
    }

    /// Feeds one received fragment in. Returns the reassembled payload
    /// once every fragment for its buffer has arrived. A fragment whose
    /// `fragment_num` doesn't fit within its own `total_fragments` is
    /// rejected as malformed. A fragment that would have joined a buffer
    /// which just timed out is rejected as `Timeout` rather than silently
    /// starting a new buffer in its place.
    pub fn defragment(
        &mut self,
        source_hash: AddressHash,
        fragment: Fragment,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let key = BufferKey { packet_id_short: fragment.packet_id_short, source_hash };
        let just_timed_out = self.evict_expired().contains(&key);

        if fragment.total_fragments == 1 {
            return Ok(Some(fragment.payload));
        }
        if fragment.fragment_num >= fragment.total_fragments {
            return Err(FragmentError::Malformed(ProtoError::TooLarge));
        }
        if just_timed_out {
            return Err(FragmentError::Timeout(fragment.packet_id_short));
        }

        let buffer = self.buffers.entry(key).or_insert_with(|| ReassemblyBuffer {
            total_fragments: fragment.total_fragments,
            parts: HashMap::new(),
            first_received_at: Instant::now(),
        });
        buffer.parts.insert(fragment.fragment_num, fragment.payload);

        if buffer.parts.len() == buffer.total_fragments as usize {
            let buffer = self.buffers.remove(&key).expect("just inserted");
            let mut out = Vec::new();
            for i in 0..buffer.total_fragments {
                if let Some(part) = buffer.parts.get(&i) {
                    out.extend_from_slice(part);
                } else {
                    return Err(FragmentError::Malformed(ProtoError::TooLarge));
                }
            }
            return Ok(Some(out));
        }
        Ok(None)
    }

    /// Drops buffers older than `config.reassembly_timeout`, returning the
    /// keys of the buffers it removed.
    fn evict_expired(&mut self) -> Vec<BufferKey> {
        let timeout = self.config.reassembly_timeout;
        let now = Instant::now();
        let expired: Vec<BufferKey> = self
            .buffers
            .iter()
            .filter(|(_, buf)| now.duration_since(buf.first_received_at) > timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.buffers.remove(key);
        }
        expired
    }

    pub fn pending_buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> AddressHash {
        AddressHash::from_key_material(b"node-a")
    }

    #[test]
    fn small_payload_yields_single_fragment() {
        let fragmenter = Fragmenter::new(FragmenterConfig::default());
        let fragments = fragmenter.fragment(1, b"hello");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total_fragments, 1);
    }

    #[test]
    fn large_payload_splits_and_reassembles() {
        let config = FragmenterConfig { mtu: 200, ..Default::default() };
        let fragmenter_split = Fragmenter::new(config.clone());
        let payload = vec![0xABu8; 450];
        let fragments = fragmenter_split.fragment(7, &payload);
        assert_eq!(fragments.len(), 3);
        assert!(fragments.last().unwrap().is_last());

        let mut reassembler = Fragmenter::new(config);
        let mut result = None;
        for fragment in fragments {
            result = reassembler.defragment(source(), fragment).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
        assert_eq!(reassembler.pending_buffer_count(), 0);
    }

    #[test]
    fn out_of_order_fragments_still_reassemble() {
        let fragmenter = Fragmenter::new(FragmenterConfig::default());
        let payload = vec![0x11u8; 300];
        let mut fragments = fragmenter.fragment(9, &payload);
        fragments.reverse();

        let mut reassembler = Fragmenter::new(FragmenterConfig::default());
        let mut result = None;
        for fragment in fragments {
            result = reassembler.defragment(source(), fragment).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn stale_buffer_is_reported_as_timed_out() {
        let config =
            FragmenterConfig { mtu: 200, reassembly_timeout: Duration::from_millis(10) };
        let fragmenter = Fragmenter::new(config.clone());
        let payload = vec![0x22u8; 300];
        let fragments = fragmenter.fragment(3, &payload);

        let mut reassembler = Fragmenter::new(config);
        reassembler.defragment(source(), fragments[0].clone()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // The first fragment's buffer timed out; the late second fragment
        // for the same buffer is rejected rather than silently starting a
        // fresh reassembly in its place.
        let result = reassembler.defragment(source(), fragments[1].clone());
        assert_eq!(result.unwrap_err(), FragmentError::Timeout(3));
        assert_eq!(reassembler.pending_buffer_count(), 0);
    }

    #[test]
    fn fragment_num_past_total_is_rejected_as_malformed() {
        let mut reassembler = Fragmenter::new(FragmenterConfig::default());
        let bad = Fragment {
            packet_id_short: 4,
            fragment_num: 2,
            total_fragments: 2,
            payload: vec![0x01],
        };
        let result = reassembler.defragment(source(), bad);
        assert!(matches!(result, Err(FragmentError::Malformed(_))));
    }
}
