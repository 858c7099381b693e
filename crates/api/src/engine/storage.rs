//! Filesystem object storage rooted at `STORAGE_DIR`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sheetflow_core::store::{ObjectStorage, StorageError};

/// Stores each object as a file at `root/<key>`.
///
/// Keys are relative, `/`-separated paths; anything that could escape the
/// root is rejected.
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(key, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());

        storage.put("7/abc.pdf", b"%PDF-1.7").await.unwrap();
        assert!(dir.path().join("7/abc.pdf").exists());
        assert_eq!(storage.get("7/abc.pdf").await.unwrap(), b"%PDF-1.7");

        storage.delete("7/abc.pdf").await.unwrap();
        assert_matches!(
            storage.get("7/abc.pdf").await,
            Err(StorageError::NotFound(_))
        );
        storage.delete("7/abc.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());

        for key in ["", "../escape.pdf", "/etc/passwd", "a/../../b", "a\\b", "./x"] {
            assert_matches!(
                storage.put(key, b"x").await,
                Err(StorageError::InvalidKey(_)),
                "{key}"
            );
        }
    }
}
