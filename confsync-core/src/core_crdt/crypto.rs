//! Payload encryption capability
//!
//! Config payloads are sealed with XChaCha20-Poly1305 under a key derived
//! from the account secret and the variant's encryption domain, so one
//! variant's ciphertext never decrypts as another's.
//!
//! Wire layout: `ciphertext || nonce` (24-byte nonce appended).

use crate::core_config::errors::{SyncError, SyncResult};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XChaCha20 nonce size (192 bits)
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size
pub const KEY_SIZE: usize = 32;

/// Account secret used to derive per-variant payload keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Accepts a 32-byte seed or a 64-byte seed||pubkey secret key
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() != KEY_SIZE && bytes.len() != 2 * KEY_SIZE {
            return Err(SyncError::Crypto(format!(
                "Invalid secret key size: {} (expected {} or {})",
                bytes.len(),
                KEY_SIZE,
                2 * KEY_SIZE
            )));
        }
        let mut seed = [0u8; KEY_SIZE];
        seed.copy_from_slice(&bytes[..KEY_SIZE]);
        Ok(SecretKey(seed))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Encryption capability used by config objects
pub trait Crypto: Send + Sync {
    fn encrypt(&self, key: &SecretKey, domain: &str, plaintext: &[u8]) -> SyncResult<Vec<u8>>;

    fn decrypt(&self, key: &SecretKey, domain: &str, ciphertext: &[u8]) -> SyncResult<Vec<u8>>;
}

/// XChaCha20-Poly1305 with BLAKE3-derived per-domain keys
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaCrypto;

impl XChaChaCrypto {
    fn cipher(key: &SecretKey, domain: &str) -> SyncResult<XChaCha20Poly1305> {
        let mut derived = blake3::derive_key(&format!("confsync {} payload", domain), key.as_bytes());
        let cipher = XChaCha20Poly1305::new_from_slice(&derived)
            .map_err(|e| SyncError::Crypto(format!("Failed to create cipher: {}", e)));
        derived.zeroize();
        cipher
    }
}

impl Crypto for XChaChaCrypto {
    fn encrypt(&self, key: &SecretKey, domain: &str, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        let cipher = Self::cipher(key, domain)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let mut sealed = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: domain.as_bytes() })
            .map_err(|e| SyncError::Crypto(format!("Encryption failed: {}", e)))?;
        sealed.extend_from_slice(&nonce_bytes);
        Ok(sealed)
    }

    fn decrypt(&self, key: &SecretKey, domain: &str, ciphertext: &[u8]) -> SyncResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(SyncError::Crypto("Ciphertext too short".to_string()));
        }
        let (sealed, nonce_bytes) = ciphertext.split_at(ciphertext.len() - NONCE_SIZE);
        let cipher = Self::cipher(key, domain)?;

        cipher
            .decrypt(XNonce::from_slice(nonce_bytes), Payload { msg: sealed, aad: domain.as_bytes() })
            .map_err(|e| SyncError::Crypto(format!("Decryption failed: {}", e)))
    }
}
