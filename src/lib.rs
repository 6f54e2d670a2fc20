//! # ring_ingest
//!
//! Host-side consumer for a fixed-rate telemetry stream that a real-time co-processor
//! writes into a shared circular buffer. The co-processor fills a power-of-two ring of
//! 32-bit samples and bumps a block counter; this crate polls the counter, drains new
//! samples in order, verifies that the sequence is unbroken, batches samples into chunks,
//! persists them, and reports achieved versus requested throughput.
//!
//! ## Crate Structure
//!
//! - **`ring`**: Read-only views over producer memory (`RingSource`), both memory-mapped
//!   hardware and an in-process atomic ring.
//! - **`engine`**: The polling state machine, sequence cursor, chunk buffer and idle
//!   backoff.
//! - **`data`**: Chunk sinks (raw binary, CSV, memory, null).
//! - **`link`**: Producer lifecycle (`Link`/`ProducerHandle`) and the memory-mapped device
//!   link.
//! - **`sim`**: Software producers for tests and the `simulate` command.
//! - **`config`**: Figment-based settings from TOML and `RING_INGEST_` environment
//!   variables.
//! - **`report`**: Run reports and the JSON lines results log.
//! - **`acquisition`**: Ties the above together for one run.
//! - **`error`**: The crate-wide `IngestError`.
//! - **`tracing_init`**: Subscriber setup.
//! - **`validation`**: Small helpers used by configuration checks.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod link;
pub mod report;
pub mod ring;
pub mod sim;
pub mod tracing_init;
pub mod validation;

pub use acquisition::run_acquisition;
pub use engine::{EngineConfig, IngestionEngine, RunResult, Termination};
pub use error::{AppResult, IngestError};
pub use link::{Link, ProducerHandle, ProducerParams};
pub use report::RunReport;
pub use ring::{RingGeometry, RingSource};
