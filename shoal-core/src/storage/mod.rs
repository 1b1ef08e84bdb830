//! Output sink for verified piece data.
//!
//! The swarm coordinator writes each verified piece exactly once at its
//! absolute byte offset. Writes come from a single task, so sinks need no
//! internal locking.

pub mod file_sink;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory_sink;

use async_trait::async_trait;
pub use file_sink::FileSink;
#[cfg(any(test, feature = "test-utils"))]
pub use memory_sink::MemorySink;

/// Offset-addressed destination for downloaded content.
#[async_trait]
pub trait PieceSink: Send {
    /// Writes `data` starting at byte `offset` of the destination.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfBounds` - If the write extends past the end
    /// - `StorageError::Io` - If the underlying write failed
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError>;

    /// Total size of the destination in bytes.
    fn total_length(&self) -> u64;
}

/// Checks that `length` bytes at `offset` fit in a destination of `total` bytes.
pub(crate) fn check_bounds(offset: u64, length: usize, total: u64) -> Result<(), StorageError> {
    let end = offset.checked_add(length as u64);
    match end {
        Some(end) if end <= total => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            length,
            total,
        }),
    }
}

/// Errors that occur while creating or writing the destination.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Write would extend past the pre-allocated length
    #[error("Write of {length} bytes at offset {offset} exceeds destination size {total}")]
    OutOfBounds {
        offset: u64,
        length: usize,
        total: u64,
    },

    /// Destination path cannot be used
    #[error("Invalid destination path: {reason}")]
    InvalidPath { reason: String },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
