//! Single-file write-once archive packaging
//!
//! Layout: magic, entry blobs back to back, a bincode index of
//! `(key, offset, len)` records, the index length as a little-endian u64, and
//! the magic again as a trailer. An archive is readable only after
//! [`ArchiveWriter::finish`] has written the trailer and synced the file, so
//! a torn build is detectable (missing trailer) rather than partially
//! readable.

use crate::error::{Result, SegvolError};
use crate::io::{Packaging, StoreBackend};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

/// Magic number framing a sealed archive
pub const ARCHIVE_MAGIC: &[u8; 4] = b"SVA\0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    offset: u64,
    len: u64,
}

/// Sequential writer for a new archive.
///
/// Entries are appended in call order; `finish` seals the file. Dropping the
/// writer without `finish` leaves an unreadable torso behind, which the
/// publish step discards with the rest of the working area.
pub struct ArchiveWriter {
    file: BufWriter<fs::File>,
    offset: u64,
    index: Vec<IndexRecord>,
    seen: BTreeSet<String>,
}

impl ArchiveWriter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())
            .await
            .map_err(SegvolError::Io)?;
        let mut file = BufWriter::new(file);
        file.write_all(ARCHIVE_MAGIC).await.map_err(SegvolError::Io)?;
        Ok(Self {
            file,
            offset: ARCHIVE_MAGIC.len() as u64,
            index: Vec::new(),
            seen: BTreeSet::new(),
        })
    }

    /// Append one entry; keys are write-once
    pub async fn add(&mut self, key: &str, data: &[u8]) -> Result<()> {
        if !self.seen.insert(key.to_string()) {
            return Err(SegvolError::AlreadyExists(key.to_string()));
        }
        self.file.write_all(data).await.map_err(SegvolError::Io)?;
        self.index.push(IndexRecord {
            key: key.to_string(),
            offset: self.offset,
            len: data.len() as u64,
        });
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Write the index and trailer, flush and sync. The archive becomes
    /// readable only after this returns.
    pub async fn finish(mut self) -> Result<()> {
        let index_bytes = bincode::serialize(&self.index)?;
        self.file.write_all(&index_bytes).await.map_err(SegvolError::Io)?;
        self.file
            .write_all(&(index_bytes.len() as u64).to_le_bytes())
            .await
            .map_err(SegvolError::Io)?;
        self.file.write_all(ARCHIVE_MAGIC).await.map_err(SegvolError::Io)?;
        self.file.flush().await.map_err(SegvolError::Io)?;
        self.file.get_ref().sync_all().await.map_err(SegvolError::Io)?;
        Ok(())
    }
}

/// Pack a built entry tree into a fresh archive at `dest`.
///
/// File keys are the `/`-joined paths relative to `src_dir`, added in sorted
/// order so a repacked tree is byte-identical.
pub async fn pack_directory(src_dir: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src_dir = src_dir.as_ref();
    let mut keys = Vec::new();
    let mut pending: Vec<PathBuf> = vec![src_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut read_dir = fs::read_dir(&dir).await.map_err(SegvolError::Io)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(SegvolError::Io)? {
            let path = entry.path();
            if entry.file_type().await.map_err(SegvolError::Io)?.is_dir() {
                pending.push(path);
            } else {
                let rel = path
                    .strip_prefix(src_dir)
                    .map_err(|e| SegvolError::StorageBackend(e.to_string()))?;
                keys.push((rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"), path));
            }
        }
    }
    keys.sort();

    let mut writer = ArchiveWriter::create(dest).await?;
    for (key, path) in keys {
        let data = fs::read(&path).await.map_err(SegvolError::Io)?;
        writer.add(&key, &data).await?;
    }
    writer.finish().await
}

/// Read side of a sealed archive
pub struct ArchiveBackend {
    path: PathBuf,
    index: BTreeMap<String, (u64, u64)>,
}

impl ArchiveBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = fs::File::open(&path).await.map_err(SegvolError::Io)?;
        let total = file.seek(SeekFrom::End(0)).await.map_err(SegvolError::Io)?;

        let trailer_len = (8 + ARCHIVE_MAGIC.len()) as u64;
        if total < ARCHIVE_MAGIC.len() as u64 + trailer_len {
            return Err(SegvolError::InvalidArchive(format!(
                "{}: too short to hold an index",
                path.display()
            )));
        }
        file.seek(SeekFrom::End(-(trailer_len as i64)))
            .await
            .map_err(SegvolError::Io)?;
        let mut trailer = [0u8; 12];
        file.read_exact(&mut trailer).await.map_err(SegvolError::Io)?;
        if &trailer[8..] != ARCHIVE_MAGIC {
            return Err(SegvolError::InvalidArchive(format!(
                "{}: missing trailer magic (archive not sealed?)",
                path.display()
            )));
        }
        let index_len = u64::from_le_bytes(trailer[..8].try_into().map_err(|_| {
            SegvolError::InvalidArchive("trailer length field unreadable".to_string())
        })?);
        if index_len + trailer_len + ARCHIVE_MAGIC.len() as u64 > total {
            return Err(SegvolError::InvalidArchive(format!(
                "{}: index length {} exceeds file size",
                path.display(),
                index_len
            )));
        }

        file.seek(SeekFrom::End(-((index_len + trailer_len) as i64)))
            .await
            .map_err(SegvolError::Io)?;
        let mut index_bytes = vec![0u8; index_len as usize];
        file.read_exact(&mut index_bytes).await.map_err(SegvolError::Io)?;
        let records: Vec<IndexRecord> = bincode::deserialize(&index_bytes)?;

        let index = records
            .into_iter()
            .map(|r| (r.key, (r.offset, r.len)))
            .collect();
        Ok(Self { path, index })
    }
}

#[async_trait]
impl StoreBackend for ArchiveBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        let &(offset, len) = self
            .index
            .get(key)
            .ok_or_else(|| SegvolError::NotFound(key.to_string()))?;
        // One short-lived handle per read keeps concurrent requests
        // independent of each other.
        let mut file = fs::File::open(&self.path).await.map_err(SegvolError::Io)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(SegvolError::Io)?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await.map_err(SegvolError::Io)?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, key: &str, _data: &[u8]) -> Result<()> {
        Err(SegvolError::StorageBackend(format!(
            "archive is sealed; cannot write {}",
            key
        )))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.index.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_slash = format!("{}/", prefix.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .index
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix_slash))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn packaging(&self) -> Packaging {
        Packaging::Archive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_archive_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("entry.sva");

        let mut writer = ArchiveWriter::create(&path).await.unwrap();
        writer.add("metadata.json", b"{\"v\":1}").await.unwrap();
        writer.add("volume/1/0/0/chunk-0-0-0", b"abc").await.unwrap();
        writer.add("volume/1/0/0/chunk-0-0-1", b"defg").await.unwrap();
        writer.finish().await.unwrap();

        let backend = ArchiveBackend::open(&path).await.unwrap();
        assert_eq!(&backend.read("metadata.json").await.unwrap()[..], b"{\"v\":1}");
        assert_eq!(&backend.read("volume/1/0/0/chunk-0-0-1").await.unwrap()[..], b"defg");
        assert!(backend.exists("volume/1/0/0/chunk-0-0-0").await.unwrap());
        assert!(matches!(
            backend.read("volume/2/0/0/chunk-0-0-0").await,
            Err(SegvolError::NotFound(_))
        ));
        assert_eq!(
            backend.list("volume/1/0/0").await.unwrap(),
            vec!["chunk-0-0-0", "chunk-0-0-1"]
        );
    }

    #[tokio::test]
    async fn test_unsealed_archive_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("torso.sva");
        let mut writer = ArchiveWriter::create(&path).await.unwrap();
        writer.add("metadata.json", b"{}").await.unwrap();
        // finish() never runs; the file must not parse as an archive.
        drop(writer);
        assert!(matches!(
            ArchiveBackend::open(&path).await,
            Err(SegvolError::InvalidArchive(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dup.sva");
        let mut writer = ArchiveWriter::create(&path).await.unwrap();
        writer.add("a", b"1").await.unwrap();
        assert!(matches!(
            writer.add("a", b"2").await,
            Err(SegvolError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_pack_directory() {
        let temp_dir = TempDir::new().unwrap();
        let tree = temp_dir.path().join("tree");
        fs::create_dir_all(tree.join("volume/1/0/0")).await.unwrap();
        fs::write(tree.join("metadata.json"), b"{}").await.unwrap();
        fs::write(tree.join("volume/1/0/0/chunk-0-0-0"), b"xyz").await.unwrap();

        let dest = temp_dir.path().join("packed.sva");
        pack_directory(&tree, &dest).await.unwrap();

        let backend = ArchiveBackend::open(&dest).await.unwrap();
        assert_eq!(&backend.read("metadata.json").await.unwrap()[..], b"{}");
        assert_eq!(&backend.read("volume/1/0/0/chunk-0-0-0").await.unwrap()[..], b"xyz");
    }
}
