//! Authenticated symmetric cipher for an established `SecureLink`.
//!
//! Structurally this is `styrene-rns`'s Fernet (AES-CBC encrypt-then-MAC
//! with HMAC-SHA256) with one change: Fernet derives its IV from a random
//! draw per message, but §5's concurrency model requires "concurrent
//! encrypt calls on one link must produce strictly increasing nonces", so
//! the IV here is derived from a per-link, atomically-incremented
//! counter instead of an RNG draw. The MAC still covers the whole
//! ciphertext, so any bit flip in transit is caught on decrypt the same
//! way Fernet's `verify` step catches it.

use core::sync::atomic::{AtomicU64, Ordering};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::ProtoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 8;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// One direction of an established `SecureLink` (§3, §4.9). Each link has
/// two of these, one per direction, so an `encrypt` on one never shares a
/// nonce counter with the decrypt side.
pub struct LinkCipher {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
    next_nonce: AtomicU64,
}

impl LinkCipher {
    pub fn new(enc_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        Self { enc_key, mac_key, next_nonce: AtomicU64::new(0) }
    }

    pub fn new_from_key(key: [u8; 32]) -> Self {
        Self::new(key, key)
    }

    fn derive_iv(&self, nonce: u64) -> [u8; IV_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(b"meshline-link-iv");
        hasher.update(nonce.to_be_bytes());
        let digest = hasher.finalize();
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&digest[..IV_LEN]);
        iv
    }

    /// Encrypts `plaintext`, returning `nonce(8) || ciphertext || tag(32)`.
    /// Allocating a fresh nonce is the only side effect — safe to call
    /// concurrently from multiple tasks, each call gets a distinct,
    /// strictly-increasing nonce via the atomic counter.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let iv = self.derive_iv(nonce);

        let block_size = 16usize;
        let mut buf = vec![0u8; plaintext.len() + block_size];
        let cipher_len = Aes256CbcEnc::new(&self.enc_key.into(), &iv.into())
            .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut buf)
            .expect("buffer sized for worst-case padding")
            .len();
        buf.truncate(cipher_len);

        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("hmac accepts any key len");
        mac.update(&nonce.to_be_bytes());
        mac.update(&buf);
        let tag = mac.finalize().into_bytes();

        let mut out = Vec::with_capacity(NONCE_LEN + buf.len() + TAG_LEN);
        out.extend_from_slice(&nonce.to_be_bytes());
        out.extend_from_slice(&buf);
        out.extend_from_slice(&tag);
        out
    }

    /// Verifies the MAC, then decrypts. Any tampering with the nonce,
    /// ciphertext, or tag is surfaced as `AuthenticationFailed` before any
    /// plaintext is produced (§8 property 7).
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, ProtoError> {
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtoError::Truncated);
        }
        let nonce_bytes = &framed[..NONCE_LEN];
        let tag_start = framed.len() - TAG_LEN;
        let ciphertext = &framed[NONCE_LEN..tag_start];
        let expected_tag = &framed[tag_start..];

        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("hmac accepts any key len");
        mac.update(nonce_bytes);
        mac.update(ciphertext);
        mac.verify_slice(expected_tag).map_err(|_| ProtoError::AuthenticationFailed)?;

        let nonce = u64::from_be_bytes(nonce_bytes.try_into().unwrap());
        let iv = self.derive_iv(nonce);

        let mut buf = ciphertext.to_vec();
        let plain_len = Aes256CbcDec::new(&self.enc_key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| ProtoError::AuthenticationFailed)?
            .len();
        buf.truncate(plain_len);
        Ok(buf)
    }
}

impl Drop for LinkCipher {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.mac_key.zeroize();
    }
}
