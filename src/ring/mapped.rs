#![allow(unsafe_code)]
//! Volatile view over a memory-mapped producer region.
//!
//! The co-processor writes samples and the block counter directly into RAM that the host
//! sees through a mapping. The compiler knows nothing about that writer, so every access
//! goes through `ptr::read_volatile`; an ordinary load could legally be hoisted out of the
//! polling loop and the consumer would spin on a stale counter forever.
//!
//! # Memory Layout
//! ```text
//! base ──► [slot 0][slot 1] ... [slot cap-1]     little-endian u32, written by producer
//! counter ─► [blocks committed]                  little-endian u32, written by producer
//! ```

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};

use super::{RingGeometry, RingSource};

/// Non-owning view of a mapped sample region and its block counter.
///
/// # Safety
/// The view holds raw pointers into a mapping it does not own. Whoever constructs it
/// (normally [`crate::link::LinkHandle`]) must keep the mapping alive for as long as the
/// view exists.
pub struct MappedRing {
    /// First sample slot
    /// SAFETY: valid for `geometry.capacity()` reads for the lifetime of the view
    base: NonNull<u32>,

    /// Producer-maintained block counter
    /// SAFETY: valid for reads for the lifetime of the view
    counter: NonNull<u32>,

    geometry: RingGeometry,
}

impl fmt::Debug for MappedRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRing")
            .field("capacity", &self.geometry.capacity())
            .field("mask", &format_args!("0x{:X}", self.geometry.mask()))
            .field("base", &format!("{:p}", self.base))
            .field("counter", &format!("{:p}", self.counter))
            .finish()
    }
}

impl MappedRing {
    /// Build a view from raw pointers into a mapping.
    ///
    /// # Safety
    /// - `base` must be valid for volatile reads of `geometry.capacity()` consecutive,
    ///   4-byte aligned `u32` words.
    /// - `counter` must be valid for volatile reads of one aligned `u32`.
    /// - Both must stay valid until the view is dropped.
    pub unsafe fn from_raw_parts(
        base: NonNull<u32>,
        counter: NonNull<u32>,
        geometry: RingGeometry,
    ) -> Self {
        Self {
            base,
            counter,
            geometry,
        }
    }
}

impl RingSource for MappedRing {
    fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    #[inline]
    fn read_sample(&self, linear_index: u32) -> u32 {
        let slot = self.geometry.slot(linear_index);
        // SAFETY: slot < capacity by construction of the mask, and the constructor contract
        // guarantees capacity readable words at base.
        let raw = unsafe { ptr::read_volatile(self.base.as_ptr().add(slot)) };
        u32::from_le(raw)
    }

    #[inline]
    fn available_blocks(&self) -> u32 {
        // SAFETY: counter is valid for reads per the constructor contract.
        let raw = unsafe { ptr::read_volatile(self.counter.as_ptr()) };
        // Sample reads issued after observing the counter must not be satisfied earlier.
        fence(Ordering::Acquire);
        u32::from_le(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_wrap_and_counter_is_reread() {
        let geometry = RingGeometry::new(8).unwrap();
        let mut region: Vec<u32> = (0..8u32).map(|v| (v + 100).to_le()).collect();
        let mut counter: u32 = 0;

        let ring = unsafe {
            MappedRing::from_raw_parts(
                NonNull::new(region.as_mut_ptr()).unwrap(),
                NonNull::new(&mut counter as *mut u32).unwrap(),
                geometry,
            )
        };

        assert_eq!(ring.read_sample(3), 103);
        assert_eq!(ring.read_sample(11), 103);
        assert_eq!(ring.available_blocks(), 0);
        assert_eq!(ring.available_blocks(), 0);

        unsafe { ptr::write_volatile(&mut counter as *mut u32, 5u32.to_le()) };
        assert_eq!(ring.available_blocks(), 5);
        assert!(format!("{:?}", ring).contains("0x7"));
    }
}
