//! Atomic destination writes.
//!
//! Downloaded chunks go to `<path>.downsync.tmp` next to the destination;
//! the temp file is renamed over the destination only after the last chunk
//! arrives. A failed or abandoned download never leaves a partial file at
//! the destination.

use std::path::{Path, PathBuf};

use downsync_tunnel::DownloadStream;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{io_err, SyncError};

/// Temp-file name used while `path` is being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".downsync.tmp");
    PathBuf::from(name)
}

/// An in-progress write. Dropping it without [`commit`](Self::commit)
/// removes the temp file.
pub struct AtomicFile {
    path: PathBuf,
    tmp: PathBuf,
    file: Option<File>,
    written: u64,
}

impl AtomicFile {
    /// Create parents and open the temp file.
    pub async fn create(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_err(parent, e))?;
            }
        }
        let tmp = temp_path(path);
        let file = File::create(&tmp).await.map_err(|e| io_err(&tmp, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp,
            file: Some(file),
            written: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), SyncError> {
        let Some(file) = self.file.as_mut() else {
            return Err(io_err(&self.tmp, std::io::ErrorKind::BrokenPipe.into()));
        };
        file.write_all(chunk)
            .await
            .map_err(|e| io_err(&self.tmp, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and rename over the destination. Returns the bytes written.
    pub async fn commit(mut self) -> Result<u64, SyncError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| io_err(&self.tmp, e))?;
        }
        tokio::fs::rename(&self.tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        // Renamed away; nothing left for Drop to clean up.
        self.tmp.clear();
        Ok(self.written)
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        self.file.take();
        if !self.tmp.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// Drain `stream` into `destination`, replacing any existing file.
pub async fn write_download(
    destination: &Path,
    mut stream: DownloadStream,
) -> Result<u64, SyncError> {
    let mut out = AtomicFile::create(destination).await?;
    while let Some(chunk) = stream.next().await {
        out.write(&chunk?).await?;
    }
    out.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn commit_creates_parents_and_replaces_file() {
        let dir = TempDir::new().expect("tempdir");
        let dst = dir.path().join("src/pkg/x.go");

        let mut out = AtomicFile::create(&dst).await.expect("create");
        out.write(b"package ").await.expect("write");
        out.write(b"pkg\n").await.expect("write");
        assert!(!dst.exists(), "nothing at destination before commit");
        assert_eq!(out.commit().await.expect("commit"), 12);
        assert_eq!(std::fs::read(&dst).expect("read"), b"package pkg\n");
        assert!(!temp_path(&dst).exists());

        let mut out = AtomicFile::create(&dst).await.expect("create again");
        out.write(b"v2").await.expect("write");
        out.commit().await.expect("commit again");
        assert_eq!(std::fs::read(&dst).expect("read"), b"v2");
    }

    #[tokio::test]
    async fn dropped_write_leaves_destination_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let dst = dir.path().join("main.go");
        std::fs::write(&dst, b"original").expect("seed");

        let mut out = AtomicFile::create(&dst).await.expect("create");
        out.write(b"partial").await.expect("write");
        drop(out);

        assert_eq!(std::fs::read(&dst).expect("read"), b"original");
        assert!(!temp_path(&dst).exists());
    }

    #[test]
    fn temp_path_sits_beside_destination() {
        assert_eq!(
            temp_path(Path::new("src/main.go")),
            PathBuf::from("src/main.go.downsync.tmp")
        );
    }
}
