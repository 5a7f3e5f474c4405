use std::collections::HashMap;

use crate::models::error::CourierError;
use crate::models::package::{EncryptionInfo, Package};

/// Ciphertext plus the nonce needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Per-package encryption interface.
///
/// Default implementation is AES-256-CTR (`CtrEncryptor`). A fresh nonce is
/// drawn for every call; implementations must never reuse one under a key.
pub trait PackageEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CourierError>;

    /// Metadata about the encryption key (e.g., key ID).
    fn key_metadata(&self) -> HashMap<String, String>;

    /// Algorithm identifier written to the package (e.g., "AES-256-CTR").
    fn algorithm(&self) -> &str;

    /// Clone this encryptor into a new boxed trait object.
    fn clone_box(&self) -> Box<dyn PackageEncryptor>;
}

impl Clone for Box<dyn PackageEncryptor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Replace the package payload with ciphertext and attach the nonce.
///
/// With no encryptor the package is left untouched.
pub fn seal_package(
    package: &mut Package,
    encryptor: Option<&dyn PackageEncryptor>,
) -> Result<(), CourierError> {
    let Some(encryptor) = encryptor else {
        return Ok(());
    };
    if package.is_encrypted() {
        return Err(CourierError::EncryptionFailed("package is already encrypted".into()));
    }
    let sealed = encryptor.encrypt(&package.audio_pcm)?;
    package.audio_pcm = sealed.ciphertext;
    package.encryption = Some(EncryptionInfo {
        algorithm: encryptor.algorithm().to_string(),
        nonce: sealed.nonce,
    });
    Ok(())
}
