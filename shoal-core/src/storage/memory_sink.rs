//! In-memory sink for tests and simulations

use std::collections::HashMap;

use async_trait::async_trait;

use super::{PieceSink, StorageError, check_bounds};

/// Sink backed by a byte vector, recording how often each offset was written.
#[derive(Debug, Clone)]
pub struct MemorySink {
    data: Vec<u8>,
    writes: HashMap<u64, u32>,
}

impl MemorySink {
    pub fn new(total_length: u64) -> Self {
        Self {
            data: vec![0u8; total_length as usize],
            writes: HashMap::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of writes that started at `offset`.
    pub fn writes_at(&self, offset: u64) -> u32 {
        self.writes.get(&offset).copied().unwrap_or(0)
    }

    /// Total number of writes received.
    pub fn write_count(&self) -> u32 {
        self.writes.values().sum()
    }
}

#[async_trait]
impl PieceSink for MemorySink {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.data.len() as u64)?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        *self.writes.entry(offset).or_default() += 1;
        Ok(())
    }

    fn total_length(&self) -> u64 {
        self.data.len() as u64
    }
}
