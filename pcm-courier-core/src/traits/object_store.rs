use std::sync::Arc;

use crate::models::config::StorageClass;
use crate::models::error::CourierError;

/// Write-only view of a remote object store.
///
/// Implemented by:
/// - `DirectoryStore` (local directory, for development and tests)
/// - `S3Store` in the command-line crate (SigV4 over HTTPS)
///
/// `CourierError::Store` errors are retried by the uploader under its retry
/// policy; any other error abandons the package at once.
pub trait ObjectStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        payload: &[u8],
        storage_class: StorageClass,
    ) -> Result<(), CourierError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn put(&self, bucket: &str, key: &str, payload: &[u8], storage_class: StorageClass) -> Result<(), CourierError> {
        (**self).put(bucket, key, payload, storage_class)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn put(&self, bucket: &str, key: &str, payload: &[u8], storage_class: StorageClass) -> Result<(), CourierError> {
        (**self).put(bucket, key, payload, storage_class)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put(&self, bucket: &str, key: &str, payload: &[u8], storage_class: StorageClass) -> Result<(), CourierError> {
        (**self).put(bucket, key, payload, storage_class)
    }
}
