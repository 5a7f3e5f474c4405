use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::models::config::StorageClass;
use crate::models::error::CourierError;
use crate::traits::object_store::ObjectStore;

/// Object store backed by a local directory: `<root>/<bucket>/<key>`.
///
/// Objects are written to a temporary name and renamed into place, so a
/// reader never sees a partial object. The storage class is ignored.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

/// Reject names that would leave `root`. These never succeed on retry.
fn check_name(what: &str, name: &str, nested: bool) -> Result<(), CourierError> {
    let mut components = Path::new(name).components();
    let plain = components.clone().next().is_some() && components.all(|c| matches!(c, Component::Normal(_)));
    if !plain || name.contains('\\') || (!nested && name.contains('/')) {
        return Err(CourierError::ConfigurationFailed(format!("refusing {} {:?}", what, name)));
    }
    Ok(())
}

impl ObjectStore for DirectoryStore {
    fn put(&self, bucket: &str, key: &str, payload: &[u8], _storage_class: StorageClass) -> Result<(), CourierError> {
        check_name("bucket", bucket, false)?;
        check_name("key", key, true)?;
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CourierError::Store(format!("failed to create directory: {}", e)))?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        fs::write(&partial, payload).map_err(|e| CourierError::Store(format!("write failed: {}", e)))?;
        fs::rename(&partial, &path).map_err(|e| CourierError::Store(format!("rename failed: {}", e)))?;
        log::debug!("stored {} bytes at {}", payload.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_writes_object_under_bucket() {
        let root = std::env::temp_dir().join(format!("pcm_courier_store_{}", uuid::Uuid::new_v4()));
        let store = DirectoryStore::new(&root);

        store
            .put("audio248", "1000.0-abc-hgws1", b"payload", StorageClass::Glacier)
            .unwrap();

        let written = fs::read(store.object_path("audio248", "1000.0-abc-hgws1")).unwrap();
        assert_eq!(written, b"payload");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn escaping_names_are_permanent_errors() {
        let store = DirectoryStore::new(std::env::temp_dir());
        for (bucket, key) in [
            ("b", "../x"),
            ("b", ""),
            ("b", "/etc/passwd"),
            ("..", "k"),
            ("", "k"),
            ("a/b", "k"),
            ("b", "a\\..\\x"),
        ] {
            let err = store.put(bucket, key, b"", StorageClass::Standard).unwrap_err();
            assert!(matches!(err, CourierError::ConfigurationFailed(_)), "{:?}/{:?}", bucket, key);
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn nested_keys_are_allowed() {
        let root = std::env::temp_dir().join(format!("pcm_courier_store_{}", uuid::Uuid::new_v4()));
        let store = DirectoryStore::new(&root);
        store.put("b", "2024/1000.0-abc-x", b"p", StorageClass::Standard).unwrap();
        assert!(store.object_path("b", "2024/1000.0-abc-x").is_file());
        fs::remove_dir_all(&root).ok();
    }
}
