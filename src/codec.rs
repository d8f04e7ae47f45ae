//! At-rest authenticated encryption for message content and invite tokens.
//! AES-256-GCM with a fresh random 96-bit nonce prefixed to each ciphertext.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("ciphertext too short")]
    Truncated,
    #[error("decryption failed")]
    Unauthenticated,
}

pub struct ContentCodec {
    cipher: Aes256Gcm,
}

impl ContentCodec {
    /// Build a codec from configured key material. Keys longer than 32 bytes
    /// are compressed through SHA-256 so any validated config key works.
    pub fn new(key_material: &[u8]) -> Self {
        let key: [u8; 32] = Sha256::digest(key_material).into();
        ContentCodec {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        // Encryption only fails on absurd plaintext lengths; frame caps rule
        // those out long before this point.
        let ct = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("AES-GCM encryption failed");
        let mut combined = Vec::with_capacity(NONCE_LEN + ct.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ct);
        combined
    }

    /// Fails closed: any tampered, truncated, or foreign-key ciphertext is an
    /// error. Unauthenticated bytes are never returned.
    pub fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError> {
        if stored.len() <= NONCE_LEN {
            return Err(CodecError::Truncated);
        }
        let nonce = Nonce::from_slice(&stored[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &stored[NONCE_LEN..])
            .map_err(|_| CodecError::Unauthenticated)
    }
}
