//! Storage backends for entry trees
//!
//! An entry is persisted either as a live directory of chunk files or as a
//! single write-once archive container. Both sit behind [`StoreBackend`], so
//! the chunked read/write contract is identical for either packaging.

use crate::archive::ArchiveBackend;
use crate::error::{Result, SegvolError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// How an entry is packaged on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// A directory of chunk files; supports concurrent read and write
    Directory,
    /// A single write-once archive file; readable only after being sealed
    Archive,
}

/// Keyed byte store under one entry root.
///
/// Keys are `/`-separated relative paths produced by [`crate::layout`].
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read the value at a key
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Write a key exactly once; rewriting an existing key is an error
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Names of entries directly below a key prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Packaging of this backend
    fn packaging(&self) -> Packaging;
}

/// Live-directory backend; each key is a file below the entry root
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl StoreBackend for FsBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        let full_path = self.full_path(key);
        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SegvolError::NotFound(key.to_string()))
            }
            Err(e) => Err(SegvolError::Io(e)),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(SegvolError::Io)?;
        }
        // create_new enforces the write-once contract.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    SegvolError::AlreadyExists(key.to_string())
                } else {
                    SegvolError::Io(e)
                }
            })?;
        file.write_all(data).await.map_err(SegvolError::Io)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.full_path(key).exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut entries = Vec::new();
        if full_path.is_dir() {
            let mut read_dir = fs::read_dir(&full_path).await.map_err(SegvolError::Io)?;
            while let Some(entry) = read_dir.next_entry().await.map_err(SegvolError::Io)? {
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn packaging(&self) -> Packaging {
        Packaging::Directory
    }
}

/// Directory form of a published entry under a registry root
pub fn entry_dir_path(root: &Path, namespace: &str, key: &str) -> PathBuf {
    root.join(namespace).join(key)
}

/// Archive form of a published entry under a registry root
pub fn entry_archive_path(root: &Path, namespace: &str, key: &str) -> PathBuf {
    root.join(namespace).join(format!("{}.sva", key))
}

/// Resolve a published entry to whichever packaging exists
pub async fn resolve_entry(root: &Path, namespace: &str, key: &str) -> Result<PathBuf> {
    let dir = entry_dir_path(root, namespace, key);
    if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(dir);
    }
    let archive = entry_archive_path(root, namespace, key);
    if fs::metadata(&archive).await.map(|m| m.is_file()).unwrap_or(false) {
        return Ok(archive);
    }
    Err(SegvolError::NotFound(format!("{}/{}", namespace, key)))
}

/// Open a published entry at `path`: a directory opens as a live tree, a
/// regular file as a sealed archive.
pub async fn open_backend(path: impl AsRef<Path>) -> Result<Arc<dyn StoreBackend>> {
    let path = path.as_ref();
    let meta = fs::metadata(path)
        .await
        .map_err(|_| SegvolError::NotFound(path.display().to_string()))?;
    if meta.is_dir() {
        Ok(Arc::new(FsBackend::new(path)))
    } else {
        Ok(Arc::new(ArchiveBackend::open(path).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_backend_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path());

        backend.write("volume/1/0/0/chunk-0-0-0", b"payload").await.unwrap();
        let data = backend.read("volume/1/0/0/chunk-0-0-0").await.unwrap();
        assert_eq!(&data[..], b"payload");

        assert!(backend.exists("volume/1/0/0/chunk-0-0-0").await.unwrap());
        assert!(!backend.exists("volume/2/0/0/chunk-0-0-0").await.unwrap());

        let names = backend.list("volume/1/0/0").await.unwrap();
        assert_eq!(names, vec!["chunk-0-0-0"]);
    }

    #[tokio::test]
    async fn test_fs_backend_write_once() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path());
        backend.write("metadata.json", b"{}").await.unwrap();
        assert!(matches!(
            backend.write("metadata.json", b"{}").await,
            Err(SegvolError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_backend_missing_key_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path());
        assert!(matches!(
            backend.read("volume/1/0/0/chunk-9-9-9").await,
            Err(SegvolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_backend_resolves_directory() {
        let temp_dir = TempDir::new().unwrap();
        let backend = open_backend(temp_dir.path()).await.unwrap();
        assert_eq!(backend.packaging(), Packaging::Directory);
    }

    #[tokio::test]
    async fn test_open_backend_missing_path() {
        assert!(matches!(
            open_backend("/nonexistent/entry").await,
            Err(SegvolError::NotFound(_))
        ));
    }
}
