//! Foreign Mesh Protocol wire codec (§4.5): the packet format spoken by
//! existing radio nodes this stack interoperates with, translated to and
//! from the universal `Packet` by `meshline-transport::fmp_transport`.

use crate::error::ProtoError;
use crate::hash::AddressHash;

const HEADER_LEN: usize = 2;
const HASH_LEN: usize = 16;
pub const FMP_HEADER_LEN: usize = HEADER_LEN + HASH_LEN + HASH_LEN;
pub const MAX_HOPS: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmpPacketType {
    Data,
    Announce,
    Link,
    Proof,
}

impl FmpPacketType {
    fn to_bits(self) -> u8 {
        match self {
            FmpPacketType::Data => 0b00,
            FmpPacketType::Announce => 0b01,
            FmpPacketType::Link => 0b10,
            FmpPacketType::Proof => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => FmpPacketType::Data,
            0b01 => FmpPacketType::Announce,
            0b10 => FmpPacketType::Link,
            _ => FmpPacketType::Proof,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmpDestinationType {
    Single,
    Group,
    Plain,
    Link,
}

impl FmpDestinationType {
    fn to_bits(self) -> u8 {
        match self {
            FmpDestinationType::Single => 0b00,
            FmpDestinationType::Group => 0b01,
            FmpDestinationType::Plain => 0b10,
            FmpDestinationType::Link => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => FmpDestinationType::Single,
            0b01 => FmpDestinationType::Group,
            0b10 => FmpDestinationType::Plain,
            _ => FmpDestinationType::Link,
        }
    }
}

/// `header(2 B) | dest_hash(16 B) | transport_id(16 B) | payload` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmpPacket {
    pub packet_type: FmpPacketType,
    pub destination_type: FmpDestinationType,
    pub hops: u8,
    pub context: u8,
    pub destination_hash: AddressHash,
    pub transport_id: AddressHash,
    pub payload: Vec<u8>,
}

impl FmpPacket {
    pub fn is_broadcast(&self) -> bool {
        self.destination_type == FmpDestinationType::Plain || self.destination_hash.is_broadcast()
    }

    /// Returns a copy with `hops` advanced, clamped at `MAX_HOPS` (§4.5).
    pub fn hop(&self) -> Self {
        Self { hops: (self.hops + 1).min(MAX_HOPS), ..self.clone() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let byte0 = (self.packet_type.to_bits() << 6)
            | (self.destination_type.to_bits() << 4)
            | (self.hops & 0x0F);
        let mut out = Vec::with_capacity(FMP_HEADER_LEN + self.payload.len());
        out.push(byte0);
        out.push(self.context);
        out.extend_from_slice(self.destination_hash.as_slice());
        out.extend_from_slice(self.transport_id.as_slice());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() < FMP_HEADER_LEN {
            return Err(ProtoError::Truncated);
        }
        let byte0 = bytes[0];
        let packet_type = FmpPacketType::from_bits((byte0 >> 6) & 0b11);
        let destination_type = FmpDestinationType::from_bits((byte0 >> 4) & 0b11);
        let hops = byte0 & 0x0F;
        let context = bytes[1];

        let dest_start = HEADER_LEN;
        let transport_start = dest_start + HASH_LEN;
        let payload_start = transport_start + HASH_LEN;

        let mut destination_hash = [0u8; HASH_LEN];
        destination_hash.copy_from_slice(&bytes[dest_start..transport_start]);
        let mut transport_id = [0u8; HASH_LEN];
        transport_id.copy_from_slice(&bytes[transport_start..payload_start]);

        Ok(Self {
            packet_type,
            destination_type,
            hops,
            context,
            destination_hash: AddressHash::new(destination_hash),
            transport_id: AddressHash::new(transport_id),
            payload: bytes[payload_start..].to_vec(),
        })
    }
}

const APP_DATA_LEN_FIELD: usize = 4;
const ANNOUNCE_FIXED_LEN: usize = HASH_LEN + 32 + APP_DATA_LEN_FIELD;

/// `identity_hash(16 B) | public_key(32 B) | app_data_len(4 B BE) |
/// app_data` (§4.5), carried as an FMP Announce packet's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmpAnnouncePayload {
    pub identity_hash: AddressHash,
    pub public_key: [u8; 32],
    pub app_data: Vec<u8>,
}

impl FmpAnnouncePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ANNOUNCE_FIXED_LEN + self.app_data.len());
        out.extend_from_slice(self.identity_hash.as_slice());
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&(self.app_data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.app_data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() < ANNOUNCE_FIXED_LEN {
            return Err(ProtoError::Truncated);
        }
        let mut identity_hash = [0u8; HASH_LEN];
        identity_hash.copy_from_slice(&bytes[..HASH_LEN]);
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[HASH_LEN..HASH_LEN + 32]);
        let len_start = HASH_LEN + 32;
        let app_data_len = u32::from_be_bytes(
            bytes[len_start..len_start + APP_DATA_LEN_FIELD].try_into().unwrap(),
        ) as usize;
        let app_data_start = len_start + APP_DATA_LEN_FIELD;
        if bytes.len() < app_data_start + app_data_len {
            return Err(ProtoError::Truncated);
        }
        Ok(Self {
            identity_hash: AddressHash::new(identity_hash),
            public_key,
            app_data: bytes[app_data_start..app_data_start + app_data_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(hops: u8) -> FmpPacket {
        FmpPacket {
            packet_type: FmpPacketType::Data,
            destination_type: FmpDestinationType::Single,
            hops,
            context: 7,
            destination_hash: AddressHash::from_key_material(b"dest"),
            transport_id: AddressHash::from_key_material(b"transport"),
            payload: b"payload bytes".to_vec(),
        }
    }

    #[test]
    fn round_trips_through_wire_encoding() {
        let packet = sample_packet(3);
        let encoded = packet.encode();
        let decoded = FmpPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn header_bit_packing_matches_layout() {
        let packet = FmpPacket {
            packet_type: FmpPacketType::Announce,
            destination_type: FmpDestinationType::Plain,
            hops: 5,
            context: 0,
            destination_hash: AddressHash::new_empty(),
            transport_id: AddressHash::new_empty(),
            payload: vec![],
        };
        let encoded = packet.encode();
        assert_eq!(encoded[0], (0b01 << 6) | (0b10 << 4) | 5);
    }

    #[test]
    fn is_broadcast_true_for_plain_destination_type() {
        let mut packet = sample_packet(0);
        packet.destination_type = FmpDestinationType::Plain;
        packet.destination_hash = AddressHash::from_key_material(b"not broadcast bytes");
        assert!(packet.is_broadcast());
    }

    #[test]
    fn is_broadcast_true_for_all_ones_hash() {
        let mut packet = sample_packet(0);
        packet.destination_hash = AddressHash::BROADCAST;
        assert!(packet.is_broadcast());
    }

    #[test]
    fn hop_clamps_at_max_hops() {
        let packet = sample_packet(MAX_HOPS);
        assert_eq!(packet.hop().hops, MAX_HOPS);
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(FmpPacket::decode(&[0u8; 10]).unwrap_err(), ProtoError::Truncated);
    }

    #[test]
    fn announce_payload_round_trips() {
        let announce = FmpAnnouncePayload {
            identity_hash: AddressHash::from_key_material(b"identity"),
            public_key: [0x42; 32],
            app_data: b"extra app data".to_vec(),
        };
        let encoded = announce.encode();
        let decoded = FmpAnnouncePayload::decode(&encoded).unwrap();
        assert_eq!(decoded, announce);
    }

    #[test]
    fn announce_payload_rejects_truncated_app_data() {
        let mut encoded = FmpAnnouncePayload {
            identity_hash: AddressHash::new_empty(),
            public_key: [0u8; 32],
            app_data: b"hello".to_vec(),
        }
        .encode();
        encoded.truncate(encoded.len() - 2);
        assert_eq!(FmpAnnouncePayload::decode(&encoded).unwrap_err(), ProtoError::Truncated);
    }
}
