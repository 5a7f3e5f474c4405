use serde::{Deserialize, Serialize};

use super::audio_models::StreamFormat;
use super::error::CourierError;

/// Cipher identifier and per-package nonce attached to encrypted packages.
///
/// Kept as one optional value so a package is either plaintext or carries
/// both fields, never one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptionInfo {
    #[serde(rename = "encrypted")]
    pub algorithm: String,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

/// The self-describing unit written to the object store.
///
/// Wire format is a JSON object; byte fields are standard base64. Decoding
/// rejects records that carry only one of `encrypted` and `nonce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PackageRecord")]
pub struct Package {
    pub id: String,
    pub description: String,
    #[serde(rename = "sample-width")]
    pub sample_width: u16,
    #[serde(rename = "sample-rate")]
    pub sample_rate: u32,
    #[serde(rename = "channel-count", default = "default_channel_count")]
    pub channel_count: u16,
    #[serde(with = "base64_bytes")]
    pub audio_pcm: Vec<u8>,
    /// Epoch seconds of the first frame.
    pub timestamp: f64,
    #[serde(flatten)]
    pub encryption: Option<EncryptionInfo>,
}

fn default_channel_count() -> u16 {
    1
}

/// Decoding shape of a package, before the encryption fields are paired.
#[derive(Deserialize)]
struct PackageRecord {
    id: String,
    description: String,
    #[serde(rename = "sample-width")]
    sample_width: u16,
    #[serde(rename = "sample-rate")]
    sample_rate: u32,
    #[serde(rename = "channel-count", default = "default_channel_count")]
    channel_count: u16,
    #[serde(with = "base64_bytes")]
    audio_pcm: Vec<u8>,
    timestamp: f64,
    #[serde(default)]
    encrypted: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

impl TryFrom<PackageRecord> for Package {
    type Error = String;

    fn try_from(record: PackageRecord) -> Result<Self, Self::Error> {
        let encryption = match (record.encrypted, record.nonce) {
            (None, None) => None,
            (Some(algorithm), Some(nonce)) => Some(EncryptionInfo {
                algorithm,
                nonce: base64_bytes::decode(&nonce)?,
            }),
            (Some(_), None) => return Err("`encrypted` is set but `nonce` is missing".into()),
            (None, Some(_)) => return Err("`nonce` is set but `encrypted` is missing".into()),
        };
        Ok(Package {
            id: record.id,
            description: record.description,
            sample_width: record.sample_width,
            sample_rate: record.sample_rate,
            channel_count: record.channel_count,
            audio_pcm: record.audio_pcm,
            timestamp: record.timestamp,
            encryption,
        })
    }
}

/// Static per-run metadata stamped onto every package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTemplate {
    pub id: String,
    pub description: String,
    pub format: StreamFormat,
}

impl PackageTemplate {
    pub fn build(&self, audio_pcm: Vec<u8>, timestamp: f64) -> Package {
        Package {
            id: self.id.clone(),
            description: self.description.clone(),
            sample_width: self.format.sample_width,
            sample_rate: self.format.sample_rate,
            channel_count: self.format.channel_count,
            audio_pcm,
            timestamp,
            encryption: None,
        }
    }
}

impl Package {
    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_width, self.sample_rate, self.channel_count)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Frames carried by this package (meaningful for plaintext only; CTR
    /// ciphertext has the same length as the plaintext).
    pub fn frames(&self) -> u64 {
        self.format().frames_in(self.audio_pcm.len())
    }

    pub fn duration_secs(&self) -> f64 {
        self.format().duration_of_frames(self.frames())
    }

    /// Serialize to the transport encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CourierError> {
        serde_json::to_vec(self)
            .map_err(|e| CourierError::Serialization(format!("failed to encode package: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CourierError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CourierError::Serialization(format!("failed to decode package: {}", e)))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode(&encoded).map_err(serde::de::Error::custom)
    }

    pub fn decode(encoded: &str) -> Result<Vec<u8>, String> {
        BASE64.decode(encoded).map_err(|e| format!("invalid base64: {}", e))
    }
}
