use std::sync::Arc;
use std::thread;

use crate::delivery::retry::RetryPolicy;
use crate::models::config::StorageClass;
use crate::models::error::CourierError;
use crate::models::package::Package;
use crate::models::state::DeliveryOutcome;
use crate::storage::spool::Spool;
use crate::traits::object_store::ObjectStore;
use crate::traits::pipeline_delegate::PipelineDelegate;

/// Render a package timestamp for use in a storage key.
///
/// Shortest round-trip form that always keeps a decimal point
/// (`1000.0`, `1000.25`).
pub fn format_timestamp(timestamp: f64) -> String {
    format!("{:?}", timestamp)
}

/// `"<timestamp>-<random>-<id>"` with no other separators.
pub fn storage_key_with(timestamp: f64, random: &str, id: &str) -> String {
    format!("{}-{}-{}", format_timestamp(timestamp), random, id)
}

/// Derive a fresh storage key: the random part is a v4 UUID as 32 hex digits.
pub fn storage_key(package: &Package) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    storage_key_with(package.timestamp, &random, &package.id)
}

/// Totals from re-sending spooled packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedriveSummary {
    pub delivered: u64,
    /// Still failing; left in the spool with an updated record.
    pub failed: u64,
    /// Unreadable or corrupted entries left untouched.
    pub skipped: u64,
}

/// Delivers packages to an object store under an explicit retry policy.
///
/// A package's storage key is derived once and reused for every attempt,
/// so retries never create duplicate objects under different keys.
pub struct Uploader<S: ObjectStore> {
    store: S,
    bucket: String,
    storage_class: StorageClass,
    retry: RetryPolicy,
    spool: Option<Spool>,
    delegate: Option<Arc<dyn PipelineDelegate>>,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(store: S, bucket: impl Into<String>, storage_class: StorageClass, retry: RetryPolicy) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            storage_class,
            retry,
            spool: None,
            delegate: None,
        }
    }

    pub fn with_spool(mut self, spool: Spool) -> Self {
        self.spool = Some(spool);
        self
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn PipelineDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn spool(&self) -> Option<&Spool> {
        self.spool.as_ref()
    }

    /// Serialize and deliver one package.
    ///
    /// Returns `Err` only when the package could not be serialized or could
    /// not be spooled after being abandoned.
    pub fn deliver(&self, package: &Package) -> Result<DeliveryOutcome, CourierError> {
        let key = storage_key(package);
        let payload = package.to_bytes()?;
        log::info!(
            "uploading {} ({} bytes, {:.2}s of audio)",
            key,
            payload.len(),
            package.duration_secs()
        );
        self.deliver_payload(&key, &payload)
    }

    /// Deliver an already serialized package under `key`.
    pub fn deliver_payload(&self, key: &str, payload: &[u8]) -> Result<DeliveryOutcome, CourierError> {
        match self.put_with_retry(&self.bucket, self.storage_class, key, payload) {
            Ok(attempts) => {
                log::info!("uploaded {} after {} attempt(s)", key, attempts);
                Ok(DeliveryOutcome::Delivered {
                    key: key.to_string(),
                    attempts,
                })
            }
            Err((attempts, error)) => {
                let spooled = match &self.spool {
                    Some(spool) => {
                        let record = Spool::record_for(
                            key,
                            &self.bucket,
                            self.storage_class,
                            attempts,
                            &error.to_string(),
                            payload,
                        );
                        let path = spool.store(&record, payload)?;
                        log::error!(
                            "abandoned {} after {} attempt(s) ({}); spooled to {}",
                            key,
                            attempts,
                            error,
                            path.display()
                        );
                        Some(path)
                    }
                    None => {
                        log::error!(
                            "abandoned {} after {} attempt(s) ({}); no spool configured, package dropped",
                            key,
                            attempts,
                            error
                        );
                        None
                    }
                };
                Ok(DeliveryOutcome::Abandoned {
                    key: key.to_string(),
                    attempts,
                    spooled,
                })
            }
        }
    }

    /// Re-send every spooled package under its original key and bucket.
    pub fn redrive(&self, spool: &Spool) -> Result<RedriveSummary, CourierError> {
        let mut summary = RedriveSummary::default();
        for mut record in spool.entries()? {
            let payload = match spool.load(&record) {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("skipping spooled {}: {}", record.key, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.put_with_retry(&record.bucket, record.storage_class, &record.key, &payload) {
                Ok(attempts) => {
                    log::info!("redrove {} after {} attempt(s)", record.key, attempts);
                    spool.remove(&record)?;
                    summary.delivered += 1;
                }
                Err((attempts, error)) => {
                    log::warn!("redrive of {} failed again: {}", record.key, error);
                    record.attempts = record.attempts.saturating_add(attempts);
                    record.last_error = error.to_string();
                    spool.update(&record)?;
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Attempt `put` until it succeeds or the retry policy is exhausted.
    ///
    /// Ok carries the number of attempts made; Err carries the attempts and
    /// the last error.
    fn put_with_retry(
        &self,
        bucket: &str,
        storage_class: StorageClass,
        key: &str,
        payload: &[u8],
    ) -> Result<u32, (u32, CourierError)> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            match self.store.put(bucket, key, payload, storage_class) {
                Ok(()) => return Ok(attempts),
                Err(error) => {
                    log::warn!("upload attempt {} for {} failed: {}", attempts, key, error);
                    if let Some(ref delegate) = self.delegate {
                        delegate.on_attempt_failed(key, attempts, &error);
                    }
                    if !error.is_transient() || !self.retry.allows_another(attempts) {
                        return Err((attempts, error));
                    }
                    let delay = self.retry.delay_for(attempts);
                    if !delay.is_zero() {
                        log::debug!("retrying {} in {:?}", key, delay);
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}
