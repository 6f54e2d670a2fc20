#![allow(unsafe_code)]
//! Producer link lifecycle.
//!
//! Bringing the co-processor up (driver init, program load, priority elevation) and
//! shutting it down again is modeled as a scoped handle: [`Link::acquire`] returns a
//! handle that is also the [`RingSource`] the engine reads from, and the producer is
//! stopped either by [`ProducerHandle::release`] or, as a fallback, when the handle is
//! dropped. Every exit path of a run therefore stops the producer.
//!
//! # Device Layout
//!
//! [`MmapLink`] maps a device node or plain file that exposes the co-processor memory:
//!
//! ```text
//! ring_offset ────► [capacity x u32 samples]           written by the producer
//! control_offset ─► [counter][block_size][period_ms][run]
//!                     word 0    word 1      word 2   word 3
//! ```
//!
//! All words are little-endian. The consumer only ever writes the control block, and only
//! while acquiring and releasing.

use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppResult, IngestError};
use crate::ring::{MappedRing, RingGeometry, RingSource};

/// Byte offset of the co-processor's second data RAM, which carries the control block.
pub const DEFAULT_CONTROL_OFFSET: u64 = 0x10000;

const WORD: u64 = 4;
const CONTROL_WORDS: u64 = 4;

const CTRL_COUNTER: usize = 0;
const CTRL_BLOCK_SIZE: usize = 1;
const CTRL_PERIOD_MS: usize = 2;
const CTRL_RUN: usize = 3;

/// Parameters handed to the producer when the link is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerParams {
    /// Milliseconds between committed blocks.
    pub period_ms: u32,
    /// Samples per committed block.
    pub block_size: u32,
}

impl ProducerParams {
    /// Parameters for a producer committing `block_size` samples every `period_ms`.
    pub fn new(period_ms: u32, block_size: u32) -> Self {
        Self {
            period_ms,
            block_size,
        }
    }

    /// Requested sample rate in Hz (`block_size / period_ms` kHz). Zero for a zero period.
    pub fn requested_rate_hz(&self) -> f64 {
        if self.period_ms == 0 {
            0.0
        } else {
            f64::from(self.block_size) * 1000.0 / f64::from(self.period_ms)
        }
    }

    /// Samples the producer emits over `duration` at the requested rate.
    pub fn samples_for(&self, duration: std::time::Duration) -> u64 {
        (self.requested_rate_hz() * duration.as_secs_f64()) as u64
    }
}

/// A live producer. Reading it is reading the ring.
pub trait ProducerHandle: RingSource {
    /// Stop the producer and give up the link.
    fn release(self) -> AppResult<()>;
}

/// Something that can bring a producer up.
pub trait Link {
    /// Handle returned by a successful acquire.
    type Handle: ProducerHandle;

    /// Start the producer with `params` and return a handle to its ring.
    fn acquire(&self, params: &ProducerParams) -> AppResult<Self::Handle>;

    /// Human-readable name of the link target, used in logs and reports.
    fn describe(&self) -> String;
}

/// Placement of the sample region and control block inside the mapped device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLayout {
    /// Size of the sample region.
    pub geometry: RingGeometry,
    /// Byte offset of slot 0.
    pub ring_offset: u64,
    /// Byte offset of the counter word.
    pub control_offset: u64,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            geometry: RingGeometry::default(),
            ring_offset: 0,
            control_offset: DEFAULT_CONTROL_OFFSET,
        }
    }
}

impl DeviceLayout {
    /// Size of the sample region in bytes.
    pub fn ring_bytes(&self) -> u64 {
        u64::from(self.geometry.capacity()) * WORD
    }

    fn sample_region(&self) -> AppResult<Range<u64>> {
        let end = self.ring_offset.checked_add(self.ring_bytes()).ok_or_else(|| {
            IngestError::Configuration(format!(
                "ring_offset 0x{:X} puts the sample region past the end of the address space",
                self.ring_offset
            ))
        })?;
        Ok(self.ring_offset..end)
    }

    fn control_region(&self) -> AppResult<Range<u64>> {
        let end = self
            .control_offset
            .checked_add(CONTROL_WORDS * WORD)
            .ok_or_else(|| {
                IngestError::Configuration(format!(
                    "control_offset 0x{:X} puts the control block past the end of the address space",
                    self.control_offset
                ))
            })?;
        Ok(self.control_offset..end)
    }

    /// Bytes that must be mapped to cover both regions.
    pub fn mapped_len(&self) -> AppResult<u64> {
        Ok(self.sample_region()?.end.max(self.control_region()?.end))
    }

    /// Reject unaligned, overlapping or unmappable layouts.
    pub fn validate(&self) -> AppResult<()> {
        if self.ring_offset % WORD != 0 || self.control_offset % WORD != 0 {
            return Err(IngestError::Configuration(format!(
                "ring_offset 0x{:X} and control_offset 0x{:X} must be 4-byte aligned",
                self.ring_offset, self.control_offset
            )));
        }
        let ring = self.sample_region()?;
        let control = self.control_region()?;
        if ring.start < control.end && control.start < ring.end {
            return Err(IngestError::Configuration(format!(
                "control block at 0x{:X} overlaps the sample region 0x{:X}..0x{:X}",
                self.control_offset, ring.start, ring.end
            )));
        }
        if usize::try_from(ring.end.max(control.end)).is_err() {
            return Err(IngestError::Configuration(
                "device layout does not fit in the address space".into(),
            ));
        }
        Ok(())
    }
}

/// Link to a memory-mapped co-processor.
#[derive(Debug, Clone)]
pub struct MmapLink {
    path: PathBuf,
    layout: DeviceLayout,
}

impl MmapLink {
    /// Link to the device at `path`. Nothing is opened until [`Link::acquire`].
    pub fn new(path: impl Into<PathBuf>, layout: DeviceLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Region placement.
    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    /// Create a zero-filled backing file large enough for `layout`.
    ///
    /// Used to stand in for device memory when no co-processor is present.
    pub fn create_backing_file(path: impl AsRef<Path>, layout: &DeviceLayout) -> AppResult<()> {
        layout.validate()?;
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| IngestError::link(path.display().to_string(), e))?;
        file.set_len(layout.mapped_len()?)
            .map_err(|e| IngestError::link(path.display().to_string(), e))?;
        Ok(())
    }
}

impl Link for MmapLink {
    type Handle = LinkHandle;

    fn acquire(&self, params: &ProducerParams) -> AppResult<LinkHandle> {
        self.layout.validate()?;
        let device = self.path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| IngestError::link(&device, e))?;

        let required = self.layout.mapped_len()?;
        let metadata = file.metadata().map_err(|e| IngestError::link(&device, e))?;
        if metadata.is_file() && metadata.len() < required {
            return Err(IngestError::link(
                &device,
                format!(
                    "device is {} bytes, layout needs {}",
                    metadata.len(),
                    required
                ),
            ));
        }

        // SAFETY: the mapping is shared with the producer, which is expected to write it
        // concurrently. All access to it goes through volatile reads and writes.
        let mut mmap = unsafe {
            MmapOptions::new()
                .len(required as usize)
                .map_mut(&file)
                .map_err(|e| IngestError::link(&device, e))?
        };

        let base_ptr = mmap.as_mut_ptr();
        if base_ptr.align_offset(std::mem::align_of::<u32>()) != 0 {
            return Err(IngestError::link(&device, "mapping is not word aligned"));
        }
        // SAFETY: both offsets were validated to lie inside the mapped length and to be
        // word aligned relative to a word aligned base.
        let (ring_ptr, control_ptr) = unsafe {
            (
                base_ptr.add(self.layout.ring_offset as usize) as *mut u32,
                base_ptr.add(self.layout.control_offset as usize) as *mut u32,
            )
        };
        let (Some(ring_base), Some(control)) = (NonNull::new(ring_ptr), NonNull::new(control_ptr))
        else {
            return Err(IngestError::link(&device, "mapping returned a null pointer"));
        };

        // SAFETY: the mapping is owned by the handle together with the view and outlives it.
        let ring = unsafe { MappedRing::from_raw_parts(ring_base, control, self.layout.geometry) };

        let handle = LinkHandle {
            ring,
            control,
            mmap,
            path: self.path.clone(),
            released: false,
        };
        handle.write_control(CTRL_COUNTER, 0);
        handle.write_control(CTRL_BLOCK_SIZE, params.block_size);
        handle.write_control(CTRL_PERIOD_MS, params.period_ms);
        handle.write_control(CTRL_RUN, 1);
        handle
            .mmap
            .flush()
            .map_err(|e| IngestError::link(&device, e))?;

        info!(
            device = %device,
            block_size = params.block_size,
            period_ms = params.period_ms,
            capacity = self.layout.geometry.capacity(),
            "producer link acquired"
        );
        Ok(handle)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Owns the device mapping for the duration of a run.
pub struct LinkHandle {
    ring: MappedRing,
    control: NonNull<u32>,
    mmap: MmapMut,
    path: PathBuf,
    released: bool,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("path", &self.path)
            .field("ring", &self.ring)
            .field("mapped_len", &self.mmap.len())
            .field("released", &self.released)
            .finish()
    }
}

impl LinkHandle {
    fn write_control(&self, word: usize, value: u32) {
        // SAFETY: `word` is one of the four control words inside the mapping.
        unsafe { ptr::write_volatile(self.control.as_ptr().add(word), value.to_le()) };
    }

    /// Current value of a control word, mostly for diagnostics.
    pub fn read_control(&self, word: usize) -> Option<u32> {
        if word >= CONTROL_WORDS as usize {
            return None;
        }
        // SAFETY: bounds checked above.
        Some(u32::from_le(unsafe {
            ptr::read_volatile(self.control.as_ptr().add(word))
        }))
    }

    /// Whether the run word is set.
    pub fn is_running(&self) -> bool {
        self.read_control(CTRL_RUN) == Some(1)
    }

    fn stop(&mut self) -> std::io::Result<()> {
        self.write_control(CTRL_RUN, 0);
        self.released = true;
        self.mmap.flush()
    }
}

impl RingSource for LinkHandle {
    fn geometry(&self) -> RingGeometry {
        self.ring.geometry()
    }

    #[inline]
    fn read_sample(&self, linear_index: u32) -> u32 {
        self.ring.read_sample(linear_index)
    }

    #[inline]
    fn available_blocks(&self) -> u32 {
        self.ring.available_blocks()
    }
}

impl ProducerHandle for LinkHandle {
    fn release(mut self) -> AppResult<()> {
        let path = self.path.display().to_string();
        self.stop().map_err(|e| IngestError::link(path, e))?;
        info!(device = %self.path.display(), "producer link released");
        Ok(())
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(device = %self.path.display(), "releasing producer link on drop");
        if let Err(e) = self.stop() {
            warn!(device = %self.path.display(), error = %e, "failed to stop producer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_layout() -> DeviceLayout {
        DeviceLayout {
            geometry: RingGeometry::new(16).unwrap(),
            ring_offset: 0,
            control_offset: 0x100,
        }
    }

    #[test]
    fn layout_validation() {
        assert!(DeviceLayout::default().validate().is_ok());
        assert_eq!(DeviceLayout::default().mapped_len().unwrap(), 0x10000 + 16);

        let overlapping = DeviceLayout {
            control_offset: 0x20,
            ..small_layout()
        };
        assert!(overlapping.validate().is_err());

        let unaligned = DeviceLayout {
            control_offset: 0x101,
            ..small_layout()
        };
        assert!(unaligned.validate().is_err());
    }

    #[test]
    fn offsets_near_the_top_of_u64_are_rejected() {
        let ring_past_end = DeviceLayout {
            ring_offset: u64::MAX - 3,
            ..small_layout()
        };
        let err = ring_past_end.validate().unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(ring_past_end.mapped_len().is_err());

        let control_past_end = DeviceLayout {
            control_offset: u64::MAX - 3,
            ..small_layout()
        };
        let err = control_past_end.validate().unwrap_err();
        assert!(err.to_string().contains("control_offset"));
    }

    #[test]
    fn requested_rate() {
        let params = ProducerParams::new(1, 256);
        assert!((params.requested_rate_hz() - 256_000.0).abs() < f64::EPSILON);
        assert_eq!(params.samples_for(std::time::Duration::from_secs(60)), 15_360_000);
        assert_eq!(ProducerParams::new(0, 256).requested_rate_hz(), 0.0);
    }

    #[test]
    fn acquire_fails_for_missing_device() {
        let link = MmapLink::new("/nonexistent/ring-device", small_layout());
        let err = link.acquire(&ProducerParams::new(1, 4)).unwrap_err();
        assert_eq!(err.kind(), "LinkAcquisitionError");
        assert!(err.to_string().contains("/nonexistent/ring-device"));
    }

    #[test]
    fn acquire_rejects_short_backing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, [0u8; 8]).unwrap();
        let err = MmapLink::new(&path, small_layout())
            .acquire(&ProducerParams::new(1, 4))
            .unwrap_err();
        assert!(err.to_string().contains("layout needs"));
    }

    #[test]
    fn drop_stops_producer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device");
        let layout = small_layout();
        MmapLink::create_backing_file(&path, &layout).unwrap();

        {
            let handle = MmapLink::new(&path, layout)
                .acquire(&ProducerParams::new(2, 4))
                .unwrap();
            assert!(handle.is_running());
            assert_eq!(handle.read_control(1), Some(4));
            assert_eq!(handle.read_control(2), Some(2));
            assert_eq!(handle.read_control(4), None);
        }

        let bytes = std::fs::read(&path).unwrap();
        let run = &bytes[0x100 + 12..0x100 + 16];
        assert_eq!(run, &[0, 0, 0, 0]);
    }
}
