//! Ingestion engine: polls the producer counter, drains blocks in sequence order, checks
//! continuity and flushes full chunks to a sink.
//!
//! # State Machine
//!
//! ```text
//!  WaitingFirstSample ──(slot 0 != 0)──► Running ──(target reached)──► TerminatedOk
//!   (first_observed only)                  │  ▲
//!                                          │  └── drain one block per available block
//!                                          ├──(continuity failed)──► TerminatedOverrun
//!                                          ├──(stop flag)──────────► TerminatedCancelled
//!                                          └──(stall timeout)──────► TerminatedStalled
//! ```
//!
//! # Drain Step
//!
//! While `available_blocks() > blocks_read`, exactly `block_size` samples are drained. For
//! each one the ring slot is `expected_index & ring_mask`, the chunk slot is
//! `expected_index & chunk_mask`, and `expected_index` advances by one. The counter is
//! re-read before every block.
//!
//! Chunk capacity is a power of two and a multiple of the block size, so a chunk can only
//! become full on the last sample of a block. The flush is issued after that block passed
//! its continuity check, which keeps a torn block out of storage.
//!
//! # Continuity
//!
//! After each block the last sample read must equal `baseline + expected_index - 1`. A
//! mismatch means the producer lapped the consumer and overwrote slots that had not been
//! drained yet. The run ends there; lost samples cannot be recovered from the ring.

pub mod backoff;
pub mod chunk;
pub mod cursor;

pub use backoff::{Backoff, PollBackoff};
pub use chunk::Chunk;
pub use cursor::SequenceCursor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, trace, warn};

use crate::data::sink::Sink;
use crate::error::{AppResult, IngestError};
use crate::ring::{RingGeometry, RingSource};
use crate::validation;

/// How the sequence baseline is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstSampleMode {
    /// The stream starts at value 0; slot 0 is drained immediately.
    #[default]
    Zero,
    /// Wait until slot 0 holds a nonzero value and use it as the baseline.
    FirstObserved,
}

/// Granularity of the continuity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityCheck {
    /// Check the last sample of every block.
    #[default]
    BlockTail,
    /// Check every sample as it is drained.
    EverySample,
}

/// Parameters of one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Samples the producer commits per counter increment.
    pub block_size: u32,
    /// Samples per flushed chunk.
    pub chunk_capacity: u32,
    /// Stop once this many samples have been drained.
    pub target_samples: u32,
    /// Baseline of the stream.
    pub first_sample: FirstSampleMode,
    /// Which samples are checked against the cursor.
    pub continuity: ContinuityCheck,
    /// Wait policy between empty polls.
    pub backoff: PollBackoff,
    /// End the run when no block arrives for this long.
    pub stall_timeout: Option<Duration>,
    /// Hand a partially filled last chunk to the sink when the run completes.
    pub flush_partial: bool,
}

impl EngineConfig {
    /// Defaults: zero baseline, block-tail checks, adaptive backoff, no stall timeout.
    pub fn new(block_size: u32, chunk_capacity: u32, target_samples: u32) -> Self {
        Self {
            block_size,
            chunk_capacity,
            target_samples,
            first_sample: FirstSampleMode::default(),
            continuity: ContinuityCheck::default(),
            backoff: PollBackoff::default(),
            stall_timeout: None,
            flush_partial: false,
        }
    }

    /// Set the first-sample mode.
    pub fn with_first_sample(mut self, mode: FirstSampleMode) -> Self {
        self.first_sample = mode;
        self
    }

    /// Set the continuity check granularity.
    pub fn with_continuity(mut self, check: ContinuityCheck) -> Self {
        self.continuity = check;
        self
    }

    /// Set the idle backoff.
    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// End the run as stalled after `timeout` without progress.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Flush a trailing partial chunk on completion.
    pub fn with_flush_partial(mut self, enabled: bool) -> Self {
        self.flush_partial = enabled;
        self
    }

    /// Check the configuration invariants against a ring geometry.
    pub fn validate(&self, geometry: RingGeometry) -> AppResult<()> {
        let invalid = |field: &str, e: &str| IngestError::Configuration(format!("{field}: {e}"));

        validation::is_nonzero(self.block_size.into()).map_err(|e| invalid("block_size", e))?;
        if self.block_size > geometry.capacity() {
            return Err(IngestError::Configuration(format!(
                "block_size {} exceeds ring capacity {}",
                self.block_size,
                geometry.capacity()
            )));
        }
        validation::is_power_of_two(self.chunk_capacity)
            .map_err(|e| invalid("chunk_capacity", e))?;
        validation::is_multiple_of(self.chunk_capacity, self.block_size).map_err(|e| {
            IngestError::Configuration(format!(
                "chunk_capacity {} vs block_size {}: {e}",
                self.chunk_capacity, self.block_size
            ))
        })?;
        validation::is_nonzero(self.target_samples.into())
            .map_err(|e| invalid("target_samples", e))?;
        if self.target_samples.checked_add(self.block_size - 1).is_none() {
            return Err(IngestError::Configuration(format!(
                "target_samples {} cannot be reached within the u32 sequence space",
                self.target_samples
            )));
        }
        self.backoff.validate()?;
        if self.stall_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("stall_timeout", "Value must be greater than 0"));
        }
        Ok(())
    }
}

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Slot 0 still holds zero.
    WaitingFirstSample,
    /// Draining blocks.
    Running,
    /// Target reached.
    TerminatedOk,
    /// Continuity check failed.
    TerminatedOverrun,
    /// Stop flag raised.
    TerminatedCancelled,
    /// Stall timeout expired.
    TerminatedStalled,
}

impl EngineState {
    /// No further polls will make progress.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineState::WaitingFirstSample | EngineState::Running)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Target reached with continuity intact.
    Completed,
    /// The continuity check failed.
    Overrun {
        /// Sample value the cursor expected.
        expected: u32,
        /// Sample value found in the ring.
        observed: u32,
    },
    /// The stop flag was raised.
    Cancelled,
    /// No block arrived within the stall timeout.
    Stalled {
        /// Time since the last progress.
        idle_ms: u64,
    },
}

impl Termination {
    /// Terminal engine state for this outcome.
    pub fn state(&self) -> EngineState {
        match self {
            Termination::Completed => EngineState::TerminatedOk,
            Termination::Overrun { .. } => EngineState::TerminatedOverrun,
            Termination::Cancelled => EngineState::TerminatedCancelled,
            Termination::Stalled { .. } => EngineState::TerminatedStalled,
        }
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing new from the producer.
    Idle,
    /// The first nonzero sample was seen and the stream baseline fixed.
    Started {
        /// First sample value.
        baseline: u32,
    },
    /// One block was drained.
    Drained {
        /// Total blocks drained so far.
        blocks_read: u32,
    },
    /// The run is over.
    Terminated(Termination),
}

/// Summary of one run. Produced once when the loop ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Blocks drained.
    pub blocks_read: u32,
    /// Samples the consumer drained (`expected_index`).
    pub samples_expected: u32,
    /// Stream position implied by the last sample actually read.
    pub samples_observed: u32,
    /// Wall time from the first poll to the end of the loop.
    pub elapsed_seconds: f64,
    /// Completed with continuity intact.
    pub pass: bool,
    /// How the run ended.
    pub termination: Termination,
    /// Chunks handed to the sink.
    pub chunks_flushed: u64,
    /// First sample value of the stream.
    pub baseline: u32,
}

impl RunResult {
    /// Samples observed per second of wall-clock time.
    pub fn achieved_rate_hz(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            f64::from(self.samples_observed) / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// The failure carried by this result, if the run did not pass.
    pub fn error(&self) -> Option<IngestError> {
        match &self.termination {
            Termination::Overrun { expected, observed } => Some(IngestError::Overrun {
                expected: *expected,
                observed: *observed,
                blocks_read: self.blocks_read,
            }),
            _ => None,
        }
    }
}

/// Single-threaded consumer of one ring source.
pub struct IngestionEngine<R: RingSource, S: Sink> {
    source: R,
    sink: S,
    config: EngineConfig,
    cursor: SequenceCursor,
    chunk: Chunk,
    blocks_read: u32,
    chunks_flushed: u64,
    state: EngineState,
    termination: Option<Termination>,
    stop: Option<Arc<AtomicBool>>,
}

impl<R: RingSource, S: Sink> std::fmt::Debug for IngestionEngine<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionEngine")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("blocks_read", &self.blocks_read)
            .field("chunk_fill", &self.chunk.fill_count())
            .field("chunks_flushed", &self.chunks_flushed)
            .finish()
    }
}

impl<R: RingSource, S: Sink> IngestionEngine<R, S> {
    /// Validate `config` against the source geometry and build an engine.
    pub fn new(source: R, sink: S, config: EngineConfig) -> AppResult<Self> {
        config.validate(source.geometry())?;
        let chunk = Chunk::new(config.chunk_capacity)?;
        let state = match config.first_sample {
            FirstSampleMode::Zero => EngineState::Running,
            FirstSampleMode::FirstObserved => EngineState::WaitingFirstSample,
        };
        Ok(Self {
            source,
            sink,
            config,
            cursor: SequenceCursor::new(),
            chunk,
            blocks_read: 0,
            chunks_flushed: 0,
            state,
            termination: None,
            stop: None,
        })
    }

    /// End the run with [`Termination::Cancelled`] once `stop` is raised.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run parameters.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sequence position.
    pub fn cursor(&self) -> &SequenceCursor {
        &self.cursor
    }

    /// Blocks drained so far.
    pub fn blocks_read(&self) -> u32 {
        self.blocks_read
    }

    /// Chunks handed to the sink so far.
    pub fn chunks_flushed(&self) -> u64 {
        self.chunks_flushed
    }

    /// Ring being drained.
    pub fn source(&self) -> &R {
        &self.source
    }

    /// Chunk destination.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give back the source and sink.
    pub fn into_parts(self) -> (R, S) {
        (self.source, self.sink)
    }

    /// Perform one poll of the producer and, if a block is available, drain it.
    pub fn poll(&mut self) -> AppResult<PollOutcome> {
        match self.state {
            EngineState::WaitingFirstSample => {
                let first = self.source.read_sample(0);
                if first == 0 {
                    return Ok(PollOutcome::Idle);
                }
                self.cursor = SequenceCursor::with_baseline(first);
                self.state = EngineState::Running;
                info!(baseline = first, "first sample observed");
                Ok(PollOutcome::Started { baseline: first })
            }
            EngineState::Running => {
                if self.source.available_blocks() <= self.blocks_read {
                    return Ok(PollOutcome::Idle);
                }
                match self.drain_block()? {
                    Some(termination) => {
                        self.terminate(termination.clone());
                        Ok(PollOutcome::Terminated(termination))
                    }
                    None => Ok(PollOutcome::Drained {
                        blocks_read: self.blocks_read,
                    }),
                }
            }
            _ => Ok(PollOutcome::Terminated(
                self.termination.clone().unwrap_or(Termination::Cancelled),
            )),
        }
    }

    /// Poll until the run terminates, then finish the sink and summarize.
    pub fn run(&mut self) -> AppResult<RunResult> {
        let span = info_span!(
            "ingest",
            block_size = self.config.block_size,
            chunk_capacity = self.config.chunk_capacity,
            target_samples = self.config.target_samples,
        );
        let _enter = span.enter();

        let started = Instant::now();
        let mut last_progress = started;
        let mut backoff = Backoff::new(self.config.backoff);
        info!(
            ring_capacity = self.source.geometry().capacity(),
            first_sample = ?self.config.first_sample,
            "ingestion started"
        );

        let termination = loop {
            if self.stop.as_ref().is_some_and(|s| s.load(Ordering::Acquire)) {
                warn!(blocks_read = self.blocks_read, "stop requested");
                break self.terminate(Termination::Cancelled);
            }

            match self.poll() {
                Ok(PollOutcome::Idle) => {
                    if let Some(timeout) = self.config.stall_timeout {
                        let idle = last_progress.elapsed();
                        if idle >= timeout {
                            let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
                            warn!(idle_ms, blocks_read = self.blocks_read, "producer stalled");
                            break self.terminate(Termination::Stalled { idle_ms });
                        }
                    }
                    backoff.idle();
                }
                Ok(PollOutcome::Started { .. }) | Ok(PollOutcome::Drained { .. }) => {
                    backoff.reset();
                    last_progress = Instant::now();
                }
                Ok(PollOutcome::Terminated(termination)) => break termination,
                Err(err) => return Err(self.abort(err)),
            }
        };
        let elapsed_seconds = started.elapsed().as_secs_f64();

        if termination == Termination::Completed
            && self.config.flush_partial
            && !self.chunk.is_empty()
        {
            if let Err(err) = self.flush() {
                return Err(self.abort(err));
            }
        }
        self.sink.finish()?;

        let result = RunResult {
            blocks_read: self.blocks_read,
            samples_expected: self.cursor.expected_index(),
            samples_observed: self.cursor.samples_observed(),
            elapsed_seconds,
            pass: termination == Termination::Completed,
            termination,
            chunks_flushed: self.chunks_flushed,
            baseline: self.cursor.baseline(),
        };

        if result.pass {
            info!(
                blocks_read = result.blocks_read,
                samples = result.samples_observed,
                chunks = result.chunks_flushed,
                idle_polls = backoff.idle_polls(),
                elapsed_s = result.elapsed_seconds,
                "ingestion completed"
            );
        } else {
            error!(
                termination = ?result.termination,
                blocks_read = result.blocks_read,
                samples_expected = result.samples_expected,
                samples_observed = result.samples_observed,
                "ingestion failed"
            );
        }
        Ok(result)
    }

    fn terminate(&mut self, termination: Termination) -> Termination {
        self.state = termination.state();
        self.termination = Some(termination.clone());
        termination
    }

    fn drain_block(&mut self) -> AppResult<Option<Termination>> {
        let check_each = self.config.continuity == ContinuityCheck::EverySample;
        let mut mismatch = None;

        for _ in 0..self.config.block_size {
            let index = self.cursor.expected_index();
            let sample = self.source.read_sample(index);
            self.chunk.store(index, sample);
            self.cursor.record(sample);
            if check_each && mismatch.is_none() && !self.cursor.is_continuous() {
                mismatch = Some((self.cursor.expected_value(index), sample));
            }
        }
        self.blocks_read = self.blocks_read.wrapping_add(1);
        trace!(
            block = self.blocks_read,
            expected_index = self.cursor.expected_index(),
            "block drained"
        );

        if mismatch.is_none() && !self.cursor.is_continuous() {
            mismatch = self
                .cursor
                .last_observed()
                .map(|observed| (self.cursor.expected_last(), observed));
        }
        if let Some((expected, observed)) = mismatch {
            error!(
                expected,
                observed,
                blocks_read = self.blocks_read,
                "continuity check failed, producer overran the ring"
            );
            return Ok(Some(Termination::Overrun { expected, observed }));
        }

        if self.chunk.is_full() {
            self.flush()?;
        }

        if self.cursor.expected_index() >= self.config.target_samples {
            return Ok(Some(Termination::Completed));
        }
        Ok(None)
    }

    /// Log a fatal error and close the sink so chunks already written stay readable.
    fn abort(&mut self, err: IngestError) -> IngestError {
        error!(error = %err, blocks_read = self.blocks_read, "ingestion aborted");
        if let Err(finish_err) = self.sink.finish() {
            warn!(error = %finish_err, "sink finish failed after abort");
        }
        err
    }

    fn flush(&mut self) -> AppResult<()> {
        self.sink.append(self.chunk.samples())?;
        self.chunks_flushed += 1;
        debug!(
            chunk = self.chunks_flushed,
            samples = self.chunk.fill_count(),
            "chunk flushed"
        );
        self.chunk.clear();
        Ok(())
    }
}
