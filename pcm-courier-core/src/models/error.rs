use thiserror::Error;

/// Errors that can occur while chunking and delivering audio.
///
/// Startup failures (credentials, key material, device or file open) are
/// fatal. `Store` failures are transient and handled by the retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CourierError {
    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("failed to open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    #[error("decode failed at data byte offset {offset}: {reason}")]
    Decode { offset: u64, reason: String },

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("key material: {0}")]
    KeyMaterial(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("spool error: {0}")]
    Spool(String),
}

impl CourierError {
    /// Whether a delivery attempt that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
