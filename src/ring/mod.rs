//! Read-only views over a producer's circular sample region.
//!
//! A ring source is two pieces of producer-owned memory: a power-of-two sized region of
//! 32-bit samples that the producer fills with wraparound, and a separate word that the
//! producer increments once per committed block. The consumer never writes to either.
//!
//! ```text
//!   linear index:  0 1 2 ... cap-1 | cap cap+1 ...
//!   ring slot:     0 1 2 ... cap-1 |  0    1  ...      slot = index & (cap - 1)
//! ```
//!
//! Sources never fail. If the producer overwrites a slot before the consumer reads it the
//! source simply returns the newer value; detecting that is the ingestion engine's job.

pub mod mapped;
pub mod shared;

pub use mapped::MappedRing;
pub use shared::SharedRing;

use crate::error::{AppResult, IngestError};
use crate::validation;
use serde::{Deserialize, Serialize};

/// Capacity of the observed co-processor data RAM, in 32-bit words (`(0x3FFF >> 2) + 1`).
pub const DEFAULT_RING_CAPACITY: u32 = (0x3FFF >> 2) + 1;

/// Size and wraparound mask of a ring region.
///
/// The only way to build one is through [`RingGeometry::new`] or
/// [`RingGeometry::from_mask`], both of which reject capacities that are not a power of
/// two, so `mask == capacity - 1` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RingGeometry {
    capacity: u32,
    mask: u32,
}

impl RingGeometry {
    /// Geometry for a ring of `capacity` samples.
    pub fn new(capacity: u32) -> AppResult<Self> {
        validation::is_power_of_two(capacity).map_err(|e| {
            IngestError::Configuration(format!("ring capacity {capacity}: {e}"))
        })?;
        Ok(Self {
            capacity,
            mask: capacity - 1,
        })
    }

    /// Geometry from a hardware style index mask such as `0x3FFF >> 2`.
    pub fn from_mask(mask: u32) -> AppResult<Self> {
        let capacity = mask.checked_add(1).ok_or_else(|| {
            IngestError::Configuration(format!("ring mask 0x{mask:X} overflows capacity"))
        })?;
        Self::new(capacity)
    }

    /// Number of sample slots.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// `capacity - 1`.
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Ring slot holding the sample with the given linear index.
    #[inline]
    pub const fn slot(&self, linear_index: u32) -> usize {
        (linear_index & self.mask) as usize
    }

    /// How many whole blocks of `block_size` samples fit in the ring.
    pub const fn blocks(&self, block_size: u32) -> u32 {
        if block_size == 0 {
            0
        } else {
            self.capacity / block_size
        }
    }
}

impl TryFrom<u32> for RingGeometry {
    type Error = IngestError;

    fn try_from(capacity: u32) -> Result<Self, Self::Error> {
        Self::new(capacity)
    }
}

impl From<RingGeometry> for u32 {
    fn from(geometry: RingGeometry) -> Self {
        geometry.capacity
    }
}

impl Default for RingGeometry {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            mask: DEFAULT_RING_CAPACITY - 1,
        }
    }
}

/// Producer memory as seen by the consumer.
pub trait RingSource {
    /// Size and mask of the sample region.
    fn geometry(&self) -> RingGeometry;

    /// Sample stored for `linear_index`, i.e. the slot `linear_index & mask`.
    fn read_sample(&self, linear_index: u32) -> u32;

    /// Blocks the producer has committed so far.
    ///
    /// Every call must re-read producer memory; implementations may not cache the value.
    fn available_blocks(&self) -> u32;
}

impl<R: RingSource + ?Sized> RingSource for &R {
    fn geometry(&self) -> RingGeometry {
        (**self).geometry()
    }

    #[inline]
    fn read_sample(&self, linear_index: u32) -> u32 {
        (**self).read_sample(linear_index)
    }

    #[inline]
    fn available_blocks(&self) -> u32 {
        (**self).available_blocks()
    }
}

impl<R: RingSource + ?Sized> RingSource for Box<R> {
    fn geometry(&self) -> RingGeometry {
        (**self).geometry()
    }

    #[inline]
    fn read_sample(&self, linear_index: u32) -> u32 {
        (**self).read_sample(linear_index)
    }

    #[inline]
    fn available_blocks(&self) -> u32 {
        (**self).available_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_mask_matches_default_geometry() {
        let geometry = RingGeometry::from_mask(0x3FFF >> 2).unwrap();
        assert_eq!(geometry, RingGeometry::default());
        assert_eq!(geometry.capacity(), 4096);
        assert_eq!(geometry.mask(), 0xFFF);
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(RingGeometry::new(0).is_err());
        assert!(RingGeometry::new(3000).is_err());
        assert!(RingGeometry::from_mask(0x3FFF >> 3).is_ok());
        assert!(RingGeometry::from_mask(u32::MAX).is_err());
    }

    #[test]
    fn slot_wraps_with_mask() {
        let geometry = RingGeometry::new(16).unwrap();
        assert_eq!(geometry.slot(0), 0);
        assert_eq!(geometry.slot(15), 15);
        assert_eq!(geometry.slot(16), 0);
        assert_eq!(geometry.slot(35), 3);
        assert_eq!(geometry.slot(u32::MAX), 15);
        assert_eq!(geometry.blocks(4), 4);
        assert_eq!(geometry.blocks(0), 0);
    }
}
