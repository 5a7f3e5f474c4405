use std::collections::HashMap;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::models::error::CourierError;
use crate::traits::encryptor::{PackageEncryptor, Sealed};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes; the full 128-bit initial counter block.
pub const NONCE_LEN: usize = 16;

pub const ALGORITHM: &str = "AES-256-CTR";

/// AES-256 in counter mode keyed from the first 256 bits of a secret.
///
/// Confidentiality only: no authentication tag is attached.
#[derive(Clone)]
pub struct CtrEncryptor {
    key: [u8; KEY_LEN],
}

impl CtrEncryptor {
    /// Build from secret material. Longer secrets are truncated to 32 bytes;
    /// shorter ones are rejected rather than padded.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CourierError> {
        if secret.len() < KEY_LEN {
            return Err(CourierError::KeyMaterial(format!(
                "key material is {} bytes, need at least {}",
                secret.len(),
                KEY_LEN
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&secret[..KEY_LEN]);
        Ok(Self { key })
    }

    /// Encrypt under an explicit nonce. Callers must not reuse a nonce.
    pub fn encrypt_with_nonce(&self, plaintext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CourierError> {
        let mut cipher = Aes256Ctr::new_from_slices(&self.key, nonce)
            .map_err(|e| CourierError::EncryptionFailed(format!("invalid key or nonce length: {}", e)))?;
        let mut buf = plaintext.to_vec();
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }

    /// CTR decryption is the same keystream application as encryption.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CourierError> {
        self.encrypt_with_nonce(ciphertext, nonce)
    }

    /// Short fingerprint of the key: first 8 bytes of its SHA-256, hex.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.key);
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl PackageEncryptor for CtrEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CourierError> {
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self.encrypt_with_nonce(plaintext, &nonce)?;
        Ok(Sealed { ciphertext, nonce })
    }

    fn key_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("keyId".to_string(), self.key_id()),
            ("algorithm".to_string(), ALGORITHM.to_string()),
        ])
    }

    fn algorithm(&self) -> &str {
        ALGORITHM
    }

    fn clone_box(&self) -> Box<dyn PackageEncryptor> {
        Box::new(self.clone())
    }
}
