//! Fragment wire format (§4.3). The stateful splitting/reassembly logic
//! (MTU handling, reassembly buffer timeouts) lives in
//! `meshline-transport::fragmenter`; this module only owns the value type
//! and its 4-byte header encoding.

use crate::error::ProtoError;

/// 16-bit short ID | 8-bit fragment number | 8-bit total fragment count.
pub const FRAGMENT_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub packet_id_short: u16,
    pub fragment_num: u8,
    pub total_fragments: u8,
    pub payload: Vec<u8>,
}

impl Fragment {
    pub fn is_last(&self) -> bool {
        self.fragment_num + 1 == self.total_fragments
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.packet_id_short.to_be_bytes());
        out.push(self.fragment_num);
        out.push(self.total_fragments);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() < FRAGMENT_HEADER_LEN {
            return Err(ProtoError::Truncated);
        }
        let packet_id_short = u16::from_be_bytes([bytes[0], bytes[1]]);
        let fragment_num = bytes[2];
        let total_fragments = bytes[3];
        if total_fragments == 0 || fragment_num >= total_fragments {
            return Err(ProtoError::MalformedFmp);
        }
        Ok(Self {
            packet_id_short,
            fragment_num,
            total_fragments,
            payload: bytes[FRAGMENT_HEADER_LEN..].to_vec(),
        })
    }
}
