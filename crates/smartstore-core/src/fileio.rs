//! File API consumed by the store
//!
//! The store only needs whole-file reads and whole-file writes, each in a
//! blocking and an async form. "File not found" is signalled through
//! `std::io::ErrorKind::NotFound`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::platform_durability::{durable_sync, sync_directory};

/// Byte-oriented file access, sync and async.
#[async_trait]
pub trait FileApi: Send + Sync + 'static {
    /// Read the whole file.
    fn read_sync(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the whole file content.
    fn write_sync(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Read the whole file without blocking the caller.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the whole file content without blocking the caller.
    async fn write(&self, path: &Path, data: Vec<u8>) -> io::Result<()>;
}

/// The local filesystem, with crash-durable replacement on write.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFiles;

#[async_trait]
impl FileApi for DiskFiles {
    fn read_sync(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_sync(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        replace_durable(path, data)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, data: Vec<u8>) -> io::Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || replace_durable(&path, &data))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("write task failed: {}", e)))?
    }
}

/// Sibling path used while a new snapshot is being written.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to a staging file, sync it, then rename it over `path`.
///
/// A crash at any point leaves either the old or the new content, never a
/// torn mix.
pub fn replace_durable(path: &Path, data: &[u8]) -> io::Result<()> {
    let staging = staging_path(path);
    let result = (|| {
        let mut file = File::create(&staging)?;
        file.write_all(data)?;
        durable_sync(&file)?;
        drop(file);
        fs::rename(&staging, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => sync_directory(dir),
        _ => sync_directory(Path::new(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staging_path() {
        assert_eq!(staging_path(Path::new("/a/b.store")), PathBuf::from("/a/b.store.tmp"));
        assert_eq!(staging_path(Path::new("b.store")), PathBuf::from("b.store.tmp"));
    }

    #[test]
    fn test_replace_durable_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.store");

        replace_durable(&path, b"first, and longer").unwrap();
        replace_durable(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = DiskFiles.read_sync(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_write_into_missing_dir_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no/such/dir/test.store");
        assert!(DiskFiles.write_sync(&path, b"{}").is_err());
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("async.store");

        DiskFiles.write(&path, b"{\n\n}\n".to_vec()).await.unwrap();
        assert_eq!(DiskFiles.read(&path).await.unwrap(), b"{\n\n}\n");
    }
}
