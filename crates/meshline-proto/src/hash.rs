//! Fixed-size hash identifiers, stored as byte arrays rather than hex
//! strings so they can be used directly as map keys and compared in
//! constant time (REDESIGN FLAGS: "hash identifiers used as map keys").

use core::fmt;
use sha2::{Digest, Sha256};

pub const ADDRESS_HASH_LEN: usize = 16;

/// A 16-byte node/destination identifier.
///
/// The all-0xFF value is the reserved broadcast address; no peer may ever
/// adopt it as its own identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressHash([u8; ADDRESS_HASH_LEN]);

impl AddressHash {
    pub const BROADCAST: AddressHash = AddressHash([0xFF; ADDRESS_HASH_LEN]);

    pub const fn new(bytes: [u8; ADDRESS_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn new_empty() -> Self {
        Self([0u8; ADDRESS_HASH_LEN])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Derives a 16-byte address hash from arbitrary key material by
    /// truncating a SHA-256 digest, the same construction
    /// `styrene-rns`'s `Identity` uses to turn public keys into hashes.
    pub fn from_key_material(material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let mut bytes = [0u8; ADDRESS_HASH_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_HASH_LEN]);
        Self(bytes)
    }

    /// Left-pads a shorter identifier (e.g. a short-range mesh's legacy
    /// 8-byte address) out to the full 16 bytes.
    pub fn from_short(short: &[u8]) -> Self {
        let mut bytes = [0u8; ADDRESS_HASH_LEN];
        let start = ADDRESS_HASH_LEN.saturating_sub(short.len());
        let take = short.len().min(ADDRESS_HASH_LEN);
        bytes[start..].copy_from_slice(&short[short.len() - take..]);
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_HASH_LEN] {
        &self.0
    }

    /// First 8 bytes, used when mapping onto a short-range transport's
    /// legacy two-field address schema (§4.8).
    pub fn short_prefix(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.0[..8]);
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for AddressHash {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl fmt::Debug for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; ADDRESS_HASH_LEN]> for AddressHash {
    fn from(bytes: [u8; ADDRESS_HASH_LEN]) -> Self {
        Self(bytes)
    }
}
