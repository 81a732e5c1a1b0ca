//! Key-agreement primitives backing the handshake manager (§4.9).
//!
//! The original source used a placeholder (XOR, random bytes) for
//! Diffie-Hellman; per §9 Open Questions this spec requires a real
//! primitive while keeping the three-message state machine as the
//! contract. X25519 + HKDF-SHA256 is used here, the same combination
//! `styrene-rns`'s `Identity`/`DerivedKey` types use for RNS link
//! establishment.

use hkdf::Hkdf;
use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const CHAIN_KEY_LEN: usize = 32;

/// A long-lived X25519 keypair. The private scalar is wiped on drop.
/// Clonable so a single node identity can be handed to many concurrent
/// `HandshakeSession`s.
#[derive(Clone)]
pub struct StaticKeypair {
    private: StaticSecret,
    public: PublicKey,
}

impl StaticKeypair {
    pub fn generate() -> Self {
        Self::generate_from_rng(OsRng)
    }

    pub fn generate_from_rng<R: RngCore + CryptoRng>(mut rng: R) -> Self {
        let private = StaticSecret::random_from_rng(&mut rng);
        let public = PublicKey::from(&private);
        Self { private, public }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let private = StaticSecret::from(bytes);
        let public = PublicKey::from(&private);
        Self { private, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    pub fn diffie_hellman(&self, their_public: &PublicKey) -> [u8; 32] {
        *self.private.diffie_hellman(their_public).as_bytes()
    }
}

/// A one-shot X25519 keypair used for a single handshake message.
pub struct EphemeralKeypair {
    private: Option<EphemeralSecret>,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let private = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&private);
        Self { private: Some(private), public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// Consumes the ephemeral secret — an `EphemeralSecret` can only be
    /// used for a single Diffie-Hellman exchange, mirroring the XX
    /// pattern's single-use ephemeral keys.
    pub fn diffie_hellman(mut self, their_public: &PublicKey) -> [u8; 32] {
        let secret = self.private.take().expect("ephemeral key used twice");
        *secret.diffie_hellman(their_public).as_bytes()
    }
}

pub fn public_key_from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> PublicKey {
    PublicKey::from(bytes)
}

/// Running chaining key + transcript hash mixed across the handshake's
/// three messages (§4.9). Each `mix` folds new material in via
/// HKDF-Extract; `split` derives the two directional transport keys once
/// the handshake completes.
#[derive(Clone)]
pub struct HandshakeTranscript {
    chaining_key: [u8; CHAIN_KEY_LEN],
}

impl HandshakeTranscript {
    pub fn new(protocol_name: &[u8]) -> Self {
        let mut chaining_key = [0u8; CHAIN_KEY_LEN];
        let digest = sha2::Sha256::digest_prefixed(protocol_name);
        chaining_key.copy_from_slice(&digest);
        Self { chaining_key }
    }

    pub fn mix(&mut self, input_key_material: &[u8]) {
        let (next, _) = Hkdf::<Sha256>::extract(Some(&self.chaining_key), input_key_material);
        self.chaining_key.copy_from_slice(&next);
    }

    /// Derives the initiator->responder and responder->initiator
    /// transport keys from the final chaining key.
    pub fn split(&self) -> (TransportKey, TransportKey) {
        let hk = Hkdf::<Sha256>::from_prk(&self.chaining_key).expect("valid prk length");
        let mut init_to_resp = [0u8; 32];
        let mut resp_to_init = [0u8; 32];
        hk.expand(b"meshline-handshake-i2r", &mut init_to_resp).expect("expand length is valid");
        hk.expand(b"meshline-handshake-r2i", &mut resp_to_init).expect("expand length is valid");
        (TransportKey(init_to_resp), TransportKey(resp_to_init))
    }
}

/// A derived symmetric key for one direction of a `SecureLink`. Wiped on
/// drop so key material never lingers after `close_link`.
#[derive(Clone)]
pub struct TransportKey([u8; 32]);

impl TransportKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for TransportKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

trait Sha256DigestPrefixed {
    fn digest_prefixed(data: &[u8]) -> [u8; 32];
}

impl Sha256DigestPrefixed for sha2::Sha256 {
    fn digest_prefixed(data: &[u8]) -> [u8; 32] {
        use sha2::Digest;
        let mut out = [0u8; 32];
        if data.len() <= 32 {
            out[..data.len()].copy_from_slice(data);
        } else {
            out.copy_from_slice(&sha2::Sha256::digest(data));
        }
        out
    }
}
