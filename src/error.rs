//! Custom error types for the ingestion pipeline.
//!
//! This module defines the primary error type, `IngestError`, used across the crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! everything that can end a run, from configuration problems to a consumer that fell
//! behind its producer.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Semantic errors in the run configuration (zero block size,
//!   capacities that are not powers of two, a zero target). Rejected before the polling
//!   loop starts.
//! - **`ConfigLoad`**: Wraps `figment` errors raised while reading the TOML file or the
//!   environment overrides.
//! - **`LinkAcquisition`**: The producer link (device mapping, control block) could not be
//!   brought up. Nothing has been sampled yet.
//! - **`Overrun`**: The continuity check failed: the producer overwrote ring slots before
//!   the consumer drained them.
//! - **`SinkWrite`**: Persisting a chunk failed. Chunks flushed before the failure remain
//!   valid on disk.
//! - **`Io`** / **`Serialization`**: Ambient failures (results log, report rendering).
//! - **`FeatureNotEnabled`**: A storage format was requested that was not compiled in.
//!
//! None of these are retried. A torn or skipped sample cannot be reconstructed from a ring
//! whose old contents have already been overwritten, so every kind surfaces in the final
//! run report as a failure with a human-readable diagnostic.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, IngestError>;

/// Everything that can end a run.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Settings failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The TOML file or an environment override could not be parsed.
    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] figment::Error),

    /// The producer could not be brought up.
    #[error("Failed to acquire producer link '{path}': {message}")]
    LinkAcquisition {
        /// Device path or link name.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// The producer overwrote samples before they were drained.
    #[error(
        "Overrun after {blocks_read} blocks: expected sample {expected}, observed {observed}"
    )]
    Overrun {
        /// Sample value the cursor expected.
        expected: u32,
        /// Sample value found in the ring.
        observed: u32,
        /// Blocks drained when the check failed.
        blocks_read: u32,
    },

    /// A chunk could not be persisted.
    #[error("Sink write error: {0}")]
    SinkWrite(std::io::Error),

    /// Filesystem failure outside the sink, e.g. the results log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A report could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage format was requested that this build does not include.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl IngestError {
    /// Short, stable name of the error kind, used in run reports and the results log.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Configuration(_) | IngestError::ConfigLoad(_) => "ConfigurationError",
            IngestError::LinkAcquisition { .. } => "LinkAcquisitionError",
            IngestError::Overrun { .. } => "OverrunError",
            IngestError::SinkWrite(_) => "SinkWriteError",
            IngestError::Io(_) => "IoError",
            IngestError::Serialization(_) => "SerializationError",
            IngestError::FeatureNotEnabled(_) => "FeatureNotEnabled",
        }
    }

    pub(crate) fn link(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        IngestError::LinkAcquisition {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrun_message_names_both_samples() {
        let err = IngestError::Overrun {
            expected: 511,
            observed: 4607,
            blocks_read: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected sample 511"));
        assert!(msg.contains("observed 4607"));
        assert_eq!(err.kind(), "OverrunError");
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open_missing() -> AppResult<()> {
            std::fs::File::open("/definitely/not/here/ring")?;
            Ok(())
        }
        match open_missing() {
            Err(IngestError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn sink_errors_are_distinct_from_plain_io() {
        let err = IngestError::SinkWrite(std::io::Error::other("disk full"));
        assert_eq!(err.kind(), "SinkWriteError");
        assert!(err.to_string().contains("disk full"));
    }
}
