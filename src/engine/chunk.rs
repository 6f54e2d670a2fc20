//! Fixed-capacity batching buffer between the ring and the sink.

use crate::error::{AppResult, IngestError};
use crate::validation;

/// One reusable chunk of drained samples.
///
/// Samples are stored at `linear_index & (capacity - 1)`, so chunk positions are
/// independent of ring positions. The chunk is full exactly when the slot just written is
/// the last one, and it is cleared right after the engine hands it to the sink.
#[derive(Debug, Clone)]
pub struct Chunk {
    buffer: Box<[u32]>,
    mask: u32,
    fill: u32,
}

impl Chunk {
    /// Allocate a chunk. `capacity` must be a power of two.
    pub fn new(capacity: u32) -> AppResult<Self> {
        validation::is_power_of_two(capacity).map_err(|e| {
            IngestError::Configuration(format!("chunk capacity {capacity}: {e}"))
        })?;
        Ok(Self {
            buffer: vec![0; capacity as usize].into_boxed_slice(),
            mask: capacity - 1,
            fill: 0,
        })
    }

    /// Samples per full chunk.
    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Samples currently held.
    pub fn fill_count(&self) -> u32 {
        self.fill
    }

    /// No samples held.
    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Ready to flush.
    pub fn is_full(&self) -> bool {
        self.fill == self.capacity()
    }

    /// Store the sample drained at `linear_index`.
    #[inline]
    pub fn store(&mut self, linear_index: u32, sample: u32) {
        let slot = linear_index & self.mask;
        self.buffer[slot as usize] = sample;
        self.fill = slot + 1;
    }

    /// The filled prefix of the chunk.
    pub fn samples(&self) -> &[u32] {
        &self.buffer[..self.fill as usize]
    }

    /// Drop the held samples, keeping the allocation.
    pub fn clear(&mut self) {
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_and_wraps_at_capacity() {
        let mut chunk = Chunk::new(4).unwrap();
        assert!(chunk.is_empty());
        for i in 0..4u32 {
            chunk.store(i, i * 10);
        }
        assert!(chunk.is_full());
        assert_eq!(chunk.samples(), &[0, 10, 20, 30]);

        chunk.clear();
        assert!(chunk.is_empty());
        chunk.store(4, 40);
        assert_eq!(chunk.fill_count(), 1);
        assert_eq!(chunk.samples(), &[40]);
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(Chunk::new(0).is_err());
        assert!(Chunk::new(100).is_err());
        assert_eq!(Chunk::new(256).unwrap().capacity(), 256);
    }
}
