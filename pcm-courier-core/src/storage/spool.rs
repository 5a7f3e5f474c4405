use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::config::StorageClass;
use crate::models::error::CourierError;

const PAYLOAD_SUFFIX: &str = ".pkg.json";
const RECORD_SUFFIX: &str = ".spool.json";

/// Sidecar describing one spooled package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRecord {
    /// Storage key the package was (and will again be) written under.
    pub key: String,
    pub bucket: String,
    pub storage_class: StorageClass,
    pub attempts: u32,
    pub last_error: String,
    pub spooled_at: String,
    /// SHA-256 hex digest of the serialized package.
    pub checksum: String,
}

/// Local directory holding packages whose upload was abandoned.
///
/// Each package is two files: `<name>.pkg.json` (the serialized package,
/// exactly as it would have been uploaded) and `<name>.spool.json` (the
/// `SpoolRecord`).
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Open (creating if needed) a spool directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CourierError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| CourierError::Spool(format!("failed to create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a serialized package; returns the payload path.
    pub fn store(&self, record: &SpoolRecord, payload: &[u8]) -> Result<PathBuf, CourierError> {
        let payload_path = self.payload_path(&record.key);
        fs::write(&payload_path, payload)
            .map_err(|e| CourierError::Spool(format!("failed to write {}: {}", payload_path.display(), e)))?;
        self.update(record)?;
        Ok(payload_path)
    }

    /// Build a record for `payload` stamped with the current time.
    pub fn record_for(
        key: &str,
        bucket: &str,
        storage_class: StorageClass,
        attempts: u32,
        last_error: &str,
        payload: &[u8],
    ) -> SpoolRecord {
        SpoolRecord {
            key: key.to_string(),
            bucket: bucket.to_string(),
            storage_class,
            attempts,
            last_error: last_error.to_string(),
            spooled_at: chrono::Utc::now().to_rfc3339(),
            checksum: sha256_hex(payload),
        }
    }

    /// Rewrite the sidecar for an already spooled package.
    pub fn update(&self, record: &SpoolRecord) -> Result<(), CourierError> {
        let record_path = self.record_path(&record.key);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CourierError::Spool(format!("failed to serialize spool record: {}", e)))?;
        fs::write(&record_path, json)
            .map_err(|e| CourierError::Spool(format!("failed to write spool record: {}", e)))
    }

    /// All spooled records, oldest key first.
    pub fn entries(&self) -> Result<Vec<SpoolRecord>, CourierError> {
        let read_dir = fs::read_dir(&self.dir)
            .map_err(|e| CourierError::Spool(format!("failed to list {}: {}", self.dir.display(), e)))?;

        let mut records = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CourierError::Spool(e.to_string()))?;
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }
            let json = fs::read_to_string(&path)
                .map_err(|e| CourierError::Spool(format!("failed to read {}: {}", path.display(), e)))?;
            match serde_json::from_str::<SpoolRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping unreadable spool record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Load the serialized package for `record`, verifying its checksum.
    pub fn load(&self, record: &SpoolRecord) -> Result<Vec<u8>, CourierError> {
        let payload_path = self.payload_path(&record.key);
        let payload = fs::read(&payload_path)
            .map_err(|e| CourierError::Spool(format!("failed to read {}: {}", payload_path.display(), e)))?;
        let checksum = sha256_hex(&payload);
        if checksum != record.checksum {
            return Err(CourierError::Spool(format!(
                "checksum mismatch for {}: expected {}, found {}",
                record.key, record.checksum, checksum
            )));
        }
        Ok(payload)
    }

    pub fn remove(&self, record: &SpoolRecord) -> Result<(), CourierError> {
        for path in [self.payload_path(&record.key), self.record_path(&record.key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CourierError::Spool(format!("failed to remove {}: {}", path.display(), e)));
                }
            }
        }
        Ok(())
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", file_stem_for(key), PAYLOAD_SUFFIX))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", file_stem_for(key), RECORD_SUFFIX))
    }
}

/// Storage keys embed the operator-supplied id; keep only filename-safe characters.
fn file_stem_for(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}
