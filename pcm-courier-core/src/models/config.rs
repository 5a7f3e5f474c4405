use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CourierError;
use crate::delivery::retry::RetryPolicy;

/// Package size threshold for live capture (4 MiB).
pub const DEFAULT_THRESHOLD_BYTES: usize = 4 * 1024 * 1024;

/// Target on-disk size of one file read (4 MiB).
pub const DEFAULT_TARGET_BYTES: usize = 4 * 1024 * 1024;

/// Object-store storage class for written packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Standard,
    StandardIa,
    Glacier,
    ReducedRedundancy,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::StandardIa => "STANDARD_IA",
            Self::Glacier => "GLACIER",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "STANDARD" => Ok(Self::Standard),
            "STANDARD_IA" => Ok(Self::StandardIa),
            "GLACIER" => Ok(Self::Glacier),
            "REDUCED_REDUNDANCY" => Ok(Self::ReducedRedundancy),
            other => Err(CourierError::ConfigurationFailed(format!(
                "unknown storage class: {}",
                other
            ))),
        }
    }
}

/// Object-store access keys, read once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Parse a two-line credential file: access key, then secret key.
    pub fn from_file(path: &Path) -> Result<Self, CourierError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CourierError::Credentials(format!(
                "the credential file `{}` could not be read ({}); expected access key and secret key on two lines",
                path.display(),
                e
            ))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, CourierError> {
        let mut lines = text.lines().map(str::trim);
        let access_key = lines.next().unwrap_or_default();
        let secret_key = lines.next().unwrap_or_default();
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(CourierError::Credentials(
                "expected access key and secret key on two lines".into(),
            ));
        }
        Ok(Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

/// Configuration for one pipeline run.
///
/// Passed to the coordinator at construction; nothing is read from ambient
/// files after that.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Logical stream identifier stamped on every package.
    pub id: String,

    /// Free-text annotation stamped on every package.
    pub description: String,

    pub bucket: String,

    pub storage_class: StorageClass,

    /// Live capture emits a package once buffered bytes exceed this.
    pub threshold_bytes: usize,

    /// Optional time-based flush for live capture (None = threshold only).
    pub max_buffer_age: Option<Duration>,

    pub retry: RetryPolicy,

    /// Where abandoned packages are kept for redrive (None = not kept).
    pub spool_dir: Option<PathBuf>,

    /// Secret material; the first 32 bytes key the cipher. None disables encryption.
    pub encryption_key: Option<Vec<u8>>,
}

impl PipelineConfig {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("stream id must not be empty".into());
        }
        if self.bucket.trim().is_empty() {
            return Err("bucket must not be empty".into());
        }
        if self.threshold_bytes == 0 {
            return Err("package threshold must be positive".into());
        }
        if let Some(age) = self.max_buffer_age {
            if age.is_zero() {
                return Err("max buffer age must be positive".into());
            }
        }
        self.retry.validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            bucket: "audio248".into(),
            storage_class: StorageClass::Glacier,
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            max_buffer_age: None,
            retry: RetryPolicy::default(),
            spool_dir: Some(PathBuf::from("spool")),
            encryption_key: None,
        }
    }
}

/// Read key material from a binary file.
pub fn read_key_file(path: &Path) -> Result<Vec<u8>, CourierError> {
    fs::read(path).map_err(|e| {
        CourierError::KeyMaterial(format!("failed to read key file `{}`: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_class_parsing() {
        assert_eq!("STANDARD".parse::<StorageClass>().unwrap(), StorageClass::Standard);
        assert_eq!("STANDARD_IA".parse::<StorageClass>().unwrap(), StorageClass::StandardIa);
        assert_eq!("standard-ia".parse::<StorageClass>().unwrap(), StorageClass::StandardIa);
        assert_eq!("GLACIER".parse::<StorageClass>().unwrap(), StorageClass::Glacier);
        assert_eq!(
            "REDUCED_REDUNDANCY".parse::<StorageClass>().unwrap(),
            StorageClass::ReducedRedundancy
        );
        assert!("DEEP_FREEZE".parse::<StorageClass>().is_err());
    }

    #[test]
    fn storage_class_display_matches_wire_name() {
        assert_eq!(StorageClass::StandardIa.to_string(), "STANDARD_IA");
    }

    #[test]
    fn credentials_two_lines() {
        let creds = Credentials::parse("AKIAEXAMPLE\n  s3cr3t \n").unwrap();
        assert_eq!(creds.access_key, "AKIAEXAMPLE");
        assert_eq!(creds.secret_key, "s3cr3t");
    }

    #[test]
    fn credentials_missing_secret_is_fatal() {
        let err = Credentials::parse("AKIAEXAMPLE\n").unwrap_err();
        assert!(matches!(err, CourierError::Credentials(_)));
    }

    #[test]
    fn credentials_missing_file_is_fatal() {
        let path = std::env::temp_dir().join(format!("pcm_courier_missing_{}", uuid::Uuid::new_v4()));
        assert!(matches!(Credentials::from_file(&path), Err(CourierError::Credentials(_))));
    }

    #[test]
    fn debug_redacts_secret() {
        let creds = Credentials::parse("a\nb").unwrap();
        assert!(!format!("{:?}", creds).contains("\"b\""));
    }

    #[test]
    fn validate_rejects_empty_id() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_err());
        assert!(PipelineConfig::new("hgws1", "").validate().is_ok());
    }
}
