//! The universal packet model (§3, §4.1): the value every transport
//! ultimately carries, independent of the medium it travels over.

use core::fmt;
use core::time::Duration;

use rand_core::RngCore;

use crate::error::ProtoError;
use crate::hash::AddressHash;

pub const DEFAULT_TTL: u8 = 8;
pub const MAX_HOPS: u8 = 15;
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// 16 hex characters of randomness, unique per send. Identity under
/// equality and dedup is defined solely on these bytes — never on the
/// packet's other fields, so a relayed copy of a packet is still "the
/// same" packet for dedup purposes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId([u8; 8]);

impl PacketId {
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 8];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The 16-bit short ID fragments are keyed by (§4.3): derived from the
    /// full packet ID, not independently random, so fragments of one send
    /// always collide onto the same reassembly buffer.
    pub fn short_id(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data,
    Announce,
    Handshake,
    Ack,
    Fragment,
}

impl PacketType {
    pub fn to_wire(self) -> u8 {
        match self {
            PacketType::Data => 0,
            PacketType::Announce => 1,
            PacketType::Handshake => 2,
            PacketType::Ack => 3,
            PacketType::Fragment => 4,
        }
    }

    pub fn from_wire(byte: u8) -> Result<Self, ProtoError> {
        Ok(match byte {
            0 => PacketType::Data,
            1 => PacketType::Announce,
            2 => PacketType::Handshake,
            3 => PacketType::Ack,
            4 => PacketType::Fragment,
            _ => return Err(ProtoError::UnknownPacketType),
        })
    }
}

/// The universal packet value (§3). Equality is defined on `packet_id`
/// alone — two `Packet`s with different `hops`/`ttl` (as happens across a
/// relay hop) are still the same packet for dedup purposes.
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_id: PacketId,
    pub source_hash: AddressHash,
    pub destination_hash: AddressHash,
    pub payload: Vec<u8>,
    pub packet_type: PacketType,
    pub hops: u8,
    pub ttl: u8,
    pub timestamp_ms: u64,
    pub reliable: bool,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_id == other.packet_id
    }
}
impl Eq for Packet {}

impl Packet {
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: RngCore>(
        rng: &mut R,
        source_hash: AddressHash,
        destination_hash: AddressHash,
        payload: Vec<u8>,
        packet_type: PacketType,
        reliable: bool,
        timestamp_ms: u64,
    ) -> Result<Self, ProtoError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtoError::TooLarge);
        }
        Ok(Self {
            packet_id: PacketId::generate(rng),
            source_hash,
            destination_hash,
            payload,
            packet_type,
            hops: 0,
            ttl: DEFAULT_TTL,
            timestamp_ms,
            reliable,
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_hash.is_broadcast()
    }

    /// True while the packet may still legally take another hop. A
    /// packet with `hops >= ttl` must never be relayed (§3 invariant,
    /// §8 property 2).
    pub fn can_relay(&self) -> bool {
        self.hops < self.ttl
    }

    /// Produces the outgoing copy of this packet for a relay hop: `hops`
    /// strictly increases, `ttl` strictly decreases. Panics are avoided by
    /// saturating — callers must check `can_relay()` first.
    pub fn relayed(&self) -> Self {
        Self {
            hops: self.hops.saturating_add(1).min(MAX_HOPS),
            ttl: self.ttl.saturating_sub(1),
            ..self.clone()
        }
    }

    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp_ms))
    }

    /// Wire encoding used by byte-oriented transports (long-range radio,
    /// short-range adapter) to carry a whole `Packet` over a medium with
    /// no wire format of its own — distinct from the FMP codec, which
    /// has its own header for interoperating with foreign FMP nodes.
    ///
    /// `packet_id(8) | source_hash(16) | destination_hash(16) |
    /// packet_type(1) | hops(1) | ttl(1) | reliable(1) |
    /// timestamp_ms(8, BE) | payload_len(4, BE) | payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(56 + self.payload.len());
        out.extend_from_slice(self.packet_id.as_bytes());
        out.extend_from_slice(self.source_hash.as_bytes());
        out.extend_from_slice(self.destination_hash.as_bytes());
        out.push(self.packet_type.to_wire());
        out.push(self.hops);
        out.push(self.ttl);
        out.push(self.reliable as u8);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        const FIXED_LEN: usize = 8 + 16 + 16 + 1 + 1 + 1 + 1 + 8 + 4;
        if bytes.len() < FIXED_LEN {
            return Err(ProtoError::Truncated);
        }
        let mut packet_id = [0u8; 8];
        packet_id.copy_from_slice(&bytes[0..8]);
        let mut source = [0u8; 16];
        source.copy_from_slice(&bytes[8..24]);
        let mut destination = [0u8; 16];
        destination.copy_from_slice(&bytes[24..40]);
        let packet_type = PacketType::from_wire(bytes[40])?;
        let hops = bytes[41];
        let ttl = bytes[42];
        let reliable = bytes[43] != 0;
        let timestamp_ms = u64::from_be_bytes(bytes[44..52].try_into().unwrap());
        let payload_len = u32::from_be_bytes(bytes[52..56].try_into().unwrap()) as usize;
        let payload = bytes.get(56..56 + payload_len).ok_or(ProtoError::Truncated)?.to_vec();

        Ok(Self {
            packet_id: PacketId::from_bytes(packet_id),
            source_hash: AddressHash::new(source),
            destination_hash: AddressHash::new(destination),
            payload,
            packet_type,
            hops,
            ttl,
            timestamp_ms,
            reliable,
        })
    }
}

/// Attached to a packet on receipt; never transmitted — purely local
/// bookkeeping about how this copy arrived (§3).
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    pub transport: String,
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
    pub timestamp_ms: u64,
    pub hops: u8,
    pub link_latency_ms: Option<u32>,
}

impl TransportMetadata {
    pub fn new(transport: impl Into<String>, timestamp_ms: u64, hops: u8) -> Self {
        Self {
            transport: transport.into(),
            rssi: None,
            snr: None,
            timestamp_ms,
            hops,
            link_latency_ms: None,
        }
    }
}
