//! Software producers.
//!
//! [`StepProducer`] is deterministic and single threaded: blocks appear only when a test
//! asks for them, or on a scripted per-poll schedule. [`ThreadedProducer`] runs on its own
//! thread at a fixed cadence and is what the `simulate` command and [`SimLink`] use.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{AppResult, IngestError};
use crate::link::{Link, ProducerHandle, ProducerParams};
use crate::ring::{RingGeometry, RingSource, SharedRing};

/// Scripted producer that writes `start_value + linear_index` into each slot.
///
/// Every call to [`RingSource::available_blocks`] first applies the next entry of the
/// schedule, so "the producer advanced N blocks between two polls" can be expressed
/// directly.
#[derive(Debug)]
pub struct StepProducer {
    geometry: RingGeometry,
    block_size: u32,
    start_value: u32,
    slots: RefCell<Vec<u32>>,
    written: Cell<u32>,
    counter: Cell<u32>,
    schedule: RefCell<VecDeque<u32>>,
    every_poll: Cell<u32>,
}

impl StepProducer {
    /// Producer with nothing committed and no schedule.
    pub fn new(geometry: RingGeometry, block_size: u32) -> Self {
        Self {
            geometry,
            block_size,
            start_value: 0,
            slots: RefCell::new(vec![0; geometry.capacity() as usize]),
            written: Cell::new(0),
            counter: Cell::new(0),
            schedule: RefCell::new(VecDeque::new()),
            every_poll: Cell::new(0),
        }
    }

    /// Value of the first sample.
    pub fn starting_at(mut self, start_value: u32) -> Self {
        self.start_value = start_value;
        self
    }

    /// Blocks to produce on successive polls, before falling back to [`Self::every_poll`].
    pub fn with_schedule(self, schedule: impl IntoIterator<Item = u32>) -> Self {
        self.schedule.borrow_mut().extend(schedule);
        self
    }

    /// Blocks to produce on every poll once the schedule is exhausted.
    pub fn every_poll(self, blocks: u32) -> Self {
        self.every_poll.set(blocks);
        self
    }

    /// Write and commit `blocks` more blocks.
    pub fn produce(&self, blocks: u32) {
        let mut slots = self.slots.borrow_mut();
        for _ in 0..blocks {
            for _ in 0..self.block_size {
                let index = self.written.get();
                slots[self.geometry.slot(index)] = self.start_value.wrapping_add(index);
                self.written.set(index.wrapping_add(1));
            }
            self.counter.set(self.counter.get().wrapping_add(1));
        }
    }

    /// Overwrite the slot for `linear_index` without committing anything.
    pub fn overwrite(&self, linear_index: u32, value: u32) {
        self.slots.borrow_mut()[self.geometry.slot(linear_index)] = value;
    }

    /// Blocks committed so far.
    pub fn produced_blocks(&self) -> u32 {
        self.counter.get()
    }
}

impl RingSource for StepProducer {
    fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    fn read_sample(&self, linear_index: u32) -> u32 {
        self.slots.borrow()[self.geometry.slot(linear_index)]
    }

    fn available_blocks(&self) -> u32 {
        let next = self.schedule.borrow_mut().pop_front();
        let step = next.unwrap_or_else(|| self.every_poll.get());
        if step > 0 {
            self.produce(step);
        }
        self.counter.get()
    }
}

/// Cadence and contents of a [`ThreadedProducer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProducerProfile {
    /// Samples per block.
    pub block_size: u32,
    /// Time between blocks.
    pub period: Duration,
    /// Value of the first sample.
    pub start_value: u32,
    /// Stop producing after this many blocks, leaving the counter where it is.
    pub max_blocks: Option<u32>,
}

impl ProducerProfile {
    /// Unbounded profile at the cadence of `params`, starting at 0.
    pub fn from_params(params: &ProducerParams) -> Self {
        Self {
            block_size: params.block_size,
            period: Duration::from_millis(params.period_ms.into()),
            start_value: 0,
            max_blocks: None,
        }
    }
}

/// Producer thread writing into a [`SharedRing`] at a fixed cadence.
///
/// The thread is stopped and joined on drop.
#[derive(Debug)]
pub struct ThreadedProducer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u32>>,
}

impl ThreadedProducer {
    /// Start writing `profile` into `ring` on a named thread.
    pub fn spawn(ring: SharedRing, profile: ProducerProfile) -> AppResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ring-producer".into())
            .spawn(move || produce_loop(&ring, profile, &thread_stop))
            .map_err(|e| IngestError::link("simulated producer", e))?;
        debug!(
            block_size = profile.block_size,
            period = ?profile.period,
            "simulated producer started"
        );
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and return how many blocks it committed.
    pub fn stop(&mut self) -> Option<u32> {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(blocks) => Some(blocks),
            Err(_) => {
                warn!("simulated producer thread panicked");
                None
            }
        }
    }
}

impl Drop for ThreadedProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn produce_loop(ring: &SharedRing, profile: ProducerProfile, stop: &AtomicBool) -> u32 {
    let mut next_index: u32 = 0;
    let mut blocks: u32 = 0;
    let mut deadline = Instant::now();

    while !stop.load(Ordering::Acquire) {
        if profile.max_blocks.is_some_and(|max| blocks >= max) {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        for _ in 0..profile.block_size {
            ring.write_sample(next_index, profile.start_value.wrapping_add(next_index));
            next_index = next_index.wrapping_add(1);
        }
        ring.publish_blocks(1);
        blocks = blocks.wrapping_add(1);

        deadline += profile.period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else if profile.period.is_zero() {
            thread::yield_now();
        }
    }
    blocks
}

/// Link that brings up a [`ThreadedProducer`] instead of hardware.
#[derive(Debug, Clone)]
pub struct SimLink {
    geometry: RingGeometry,
    start_value: u32,
    max_blocks: Option<u32>,
    period_override: Option<Duration>,
}

impl SimLink {
    /// Unbounded producer at the acquired period.
    pub fn new(geometry: RingGeometry) -> Self {
        Self {
            geometry,
            start_value: 0,
            max_blocks: None,
            period_override: None,
        }
    }

    /// First sample value of the simulated stream.
    pub fn starting_at(mut self, start_value: u32) -> Self {
        self.start_value = start_value;
        self
    }

    /// Let the producer go quiet after `max_blocks` blocks.
    pub fn stalling_after(mut self, max_blocks: u32) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    /// Produce at `period` instead of the requested period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_override = Some(period);
        self
    }
}

impl Link for SimLink {
    type Handle = SimHandle;

    fn acquire(&self, params: &ProducerParams) -> AppResult<SimHandle> {
        if params.block_size == 0 || params.block_size > self.geometry.capacity() {
            return Err(IngestError::link(
                self.describe(),
                format!(
                    "block size {} does not fit a ring of {}",
                    params.block_size,
                    self.geometry.capacity()
                ),
            ));
        }
        let ring = SharedRing::new(self.geometry);
        let mut profile = ProducerProfile::from_params(params);
        profile.start_value = self.start_value;
        profile.max_blocks = self.max_blocks;
        if let Some(period) = self.period_override {
            profile.period = period;
        }
        let producer = ThreadedProducer::spawn(ring.clone(), profile)?;
        info!(
            block_size = params.block_size,
            period = ?profile.period,
            capacity = self.geometry.capacity(),
            "simulated producer link acquired"
        );
        Ok(SimHandle { ring, producer })
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

/// Handle to a running simulated producer.
#[derive(Debug)]
pub struct SimHandle {
    ring: SharedRing,
    producer: ThreadedProducer,
}

impl RingSource for SimHandle {
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

impl ProducerHandle for SimHandle {
    fn release(mut self) -> AppResult<()> {
        let blocks = self.producer.stop();
        info!(blocks_produced = ?blocks, "simulated producer link released");
        Ok(())
    }
}
