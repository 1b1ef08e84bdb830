//! Pre-allocated single file destination

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{PieceSink, StorageError, check_bounds};

/// Destination file created at its final size and filled by offset writes.
pub struct FileSink {
    path: PathBuf,
    file: File,
    total_length: u64,
}

impl FileSink {
    /// Creates (or truncates) the file and extends it to `total_length`
    /// zero bytes.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the file could not be created or sized
    pub async fn create(path: impl AsRef<Path>, total_length: u64) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.set_len(total_length).await?;

        tracing::debug!(
            "Created destination {} ({} bytes)",
            path.display(),
            total_length
        );
        Ok(Self {
            path,
            file,
            total_length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered writes and syncs the file to disk.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If flushing or syncing failed
    pub async fn finish(mut self) -> Result<PathBuf, StorageError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.path)
    }
}

#[async_trait]
impl PieceSink for FileSink {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.total_length)?;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_create_preallocates_zeroed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");

        let sink = FileSink::create(&path, 25).await.unwrap();
        assert_eq!(sink.total_length(), 25);
        sink.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 25]);
    }

    #[tokio::test]
    async fn test_out_of_order_writes_land_at_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path, 25).await.unwrap();
        sink.write_at(20, &[3u8; 5]).await.unwrap();
        sink.write_at(0, &[1u8; 10]).await.unwrap();
        sink.write_at(10, &[2u8; 10]).await.unwrap();
        let finished = sink.finish().await.unwrap();
        assert_eq!(finished, path);

        let mut expected = vec![1u8; 10];
        expected.extend_from_slice(&[2u8; 10]);
        expected.extend_from_slice(&[3u8; 5]);
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_write_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::create(dir.path().join("out.bin"), 8).await.unwrap();

        let result = sink.write_at(4, &[0u8; 5]).await;
        assert!(matches!(result, Err(StorageError::OutOfBounds { .. })));
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = FileSink::create(dir.path().join("missing").join("out.bin"), 8).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
