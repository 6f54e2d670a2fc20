//! In-process ring shared between a producer thread and the consumer.
//!
//! Slots and the counter are atomics so that a software producer running on another
//! thread is sound under the Rust memory model. The producer stores samples with
//! `Relaxed` and publishes the counter with `Release`; the consumer loads the counter with
//! `Acquire`, which makes every sample of a published block visible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{RingGeometry, RingSource};

#[derive(Debug)]
struct SharedRegion {
    slots: Box<[AtomicU32]>,
    counter: AtomicU32,
    geometry: RingGeometry,
}

/// Cheaply clonable handle to a shared sample region.
///
/// Clones observe the same memory, so one clone can be handed to a producer thread while
/// the other is read by the ingestion engine.
#[derive(Debug, Clone)]
pub struct SharedRing {
    region: Arc<SharedRegion>,
}

impl SharedRing {
    /// Zero-filled region with the counter at 0.
    pub fn new(geometry: RingGeometry) -> Self {
        let slots = (0..geometry.capacity())
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            region: Arc::new(SharedRegion {
                slots,
                counter: AtomicU32::new(0),
                geometry,
            }),
        }
    }

    /// Producer side: store `value` for `linear_index`.
    #[inline]
    pub fn write_sample(&self, linear_index: u32, value: u32) {
        let slot = self.region.geometry.slot(linear_index);
        self.region.slots[slot].store(value, Ordering::Relaxed);
    }

    /// Producer side: commit `blocks` more blocks. Returns the new counter value.
    pub fn publish_blocks(&self, blocks: u32) -> u32 {
        self.region
            .counter
            .fetch_add(blocks, Ordering::Release)
            .wrapping_add(blocks)
    }
}

impl RingSource for SharedRing {
    fn geometry(&self) -> RingGeometry {
        self.region.geometry
    }

    #[inline]
    fn read_sample(&self, linear_index: u32) -> u32 {
        let slot = self.region.geometry.slot(linear_index);
        self.region.slots[slot].load(Ordering::Relaxed)
    }

    #[inline]
    fn available_blocks(&self) -> u32 {
        self.region.counter.load(Ordering::Acquire)
    }
}
