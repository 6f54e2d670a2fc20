//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. `config/ring_ingest.toml` (or the file given with `--config`)
//! 2. Environment variables prefixed with `RING_INGEST_`, nested with `__`
//!
//! Every field has a default, so an empty or missing file yields a runnable hardware
//! configuration (1 ms period, 256-sample blocks, 4096-word ring, one minute).
//!
//! # Example
//! ```no_run
//! use ring_ingest::config::Settings;
//!
//! // RING_INGEST_RUN__TARGET_SAMPLES=2560 overrides [run] target_samples
//! let settings = Settings::load()?;
//! settings.validate()?;
//! let engine = settings.engine_config()?;
//! println!("draining {} samples", engine.target_samples);
//! # Ok::<(), ring_ingest::error::IngestError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::engine::{ContinuityCheck, EngineConfig, FirstSampleMode, PollBackoff};
use crate::error::{AppResult, IngestError};
use crate::link::{DeviceLayout, ProducerParams, DEFAULT_CONTROL_OFFSET};
use crate::ring::RingGeometry;
use crate::validation;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/ring_ingest.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RING_INGEST_";

/// Longest producer period accepted, one block per minute.
pub const MAX_PERIOD_MS: u32 = 60_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[producer]`
    pub producer: ProducerSettings,
    /// `[ring]`
    pub ring: RingSettings,
    /// `[run]`
    pub run: RunSettings,
    /// `[storage]`
    pub storage: StorageSettings,
    /// `[logging]`
    pub logging: LoggingSettings,
}

/// Parameters written to the co-processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Milliseconds between committed blocks
    pub period_ms: u32,
    /// Samples per block
    pub block_size: u32,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            period_ms: 1,
            block_size: 256,
        }
    }
}

/// Location and shape of the shared sample region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    /// Device node or file exposing co-processor memory
    pub device: PathBuf,
    /// Ring size in 32-bit words (power of two)
    pub capacity: RingGeometry,
    /// Byte offset of slot 0 inside the device
    pub ring_offset: u64,
    /// Byte offset of the control block inside the device
    pub control_offset: u64,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/uio0"),
            capacity: RingGeometry::default(),
            ring_offset: 0,
            control_offset: DEFAULT_CONTROL_OFFSET,
        }
    }
}

/// How long to run and how to drain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Explicit sample target. Takes precedence over `duration`.
    pub target_samples: Option<u32>,
    /// Run time, converted to samples at the requested rate
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
    /// Samples per flushed chunk (power of two, multiple of block_size)
    pub chunk_capacity: u32,
    /// Where the stream is expected to start
    pub first_sample: FirstSampleMode,
    /// Block tail or every sample
    pub continuity: ContinuityCheck,
    /// Wait policy between empty polls
    pub backoff: PollBackoff,
    /// Give up after this long without a new block
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Option<Duration>,
    /// Persist a partially filled final chunk on a passing run
    pub flush_partial: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            target_samples: None,
            duration: Some(Duration::from_secs(60)),
            chunk_capacity: 4096,
            first_sample: FirstSampleMode::Zero,
            continuity: ContinuityCheck::BlockTail,
            backoff: PollBackoff::default(),
            stall_timeout: Some(Duration::from_secs(5)),
            flush_partial: false,
        }
    }
}

/// On-disk sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// Flat little-endian u32 words
    #[default]
    Raw,
    /// `index,value` rows (feature `storage_csv`)
    Csv,
}

/// Persistence of drained samples and run results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Write drained chunks to `path`
    pub enabled: bool,
    /// Sample file
    pub path: PathBuf,
    /// Raw or CSV
    pub format: StorageFormat,
    /// Append one JSON line per run here
    pub results_log: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("data/samples.bin"),
            format: StorageFormat::Raw,
            results_log: None,
        }
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Subscriber output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, human-readable
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack behind [`Settings::load_from`], for callers that merge more.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |field: &str, e: &str| IngestError::Configuration(format!("{field}: {e}"));

        validation::is_in_range(self.producer.period_ms, 1..=MAX_PERIOD_MS)
            .map_err(|e| invalid("producer.period_ms", e))?;
        validation::is_nonzero(self.producer.block_size.into())
            .map_err(|e| invalid("producer.block_size", e))?;
        validation::is_valid_path(&self.ring.device.to_string_lossy())
            .map_err(|e| invalid("ring.device", e))?;
        self.device_layout().validate()?;

        if self.run.target_samples.is_none() && self.run.duration.is_none() {
            return Err(IngestError::Configuration(
                "run: one of target_samples or duration must be set".into(),
            ));
        }

        if self.storage.enabled {
            validation::is_valid_path(&self.storage.path.to_string_lossy())
                .map_err(|e| invalid("storage.path", e))?;
            #[cfg(not(feature = "storage_csv"))]
            {
                if self.storage.format == StorageFormat::Csv {
                    return Err(IngestError::FeatureNotEnabled("storage_csv".to_string()));
                }
            }
        }
        if let Some(log) = &self.storage.results_log {
            validation::is_valid_path(&log.to_string_lossy())
                .map_err(|e| invalid("storage.results_log", e))?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(IngestError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        self.engine_config()?.validate(self.ring.capacity)
    }

    /// Parameters written to the co-processor on acquire.
    pub fn producer_params(&self) -> ProducerParams {
        ProducerParams::new(self.producer.period_ms, self.producer.block_size)
    }

    /// Memory layout of `[ring]`.
    pub fn device_layout(&self) -> DeviceLayout {
        DeviceLayout {
            geometry: self.ring.capacity,
            ring_offset: self.ring.ring_offset,
            control_offset: self.ring.control_offset,
        }
    }

    /// Number of samples the run drains before it completes.
    pub fn resolved_target(&self) -> AppResult<u32> {
        if let Some(target) = self.run.target_samples {
            return Ok(target);
        }
        let duration = self.run.duration.ok_or_else(|| {
            IngestError::Configuration("run: one of target_samples or duration must be set".into())
        })?;
        let samples = self.producer_params().samples_for(duration);
        if samples == 0 {
            return Err(IngestError::Configuration(format!(
                "run.duration {:?} yields no samples at {} Hz",
                duration,
                self.producer_params().requested_rate_hz()
            )));
        }
        u32::try_from(samples).map_err(|_| {
            IngestError::Configuration(format!(
                "run.duration {duration:?} yields {samples} samples, beyond the u32 sequence space"
            ))
        })
    }

    /// Engine parameters derived from `[producer]` and `[run]`.
    pub fn engine_config(&self) -> AppResult<EngineConfig> {
        let mut config = EngineConfig::new(
            self.producer.block_size,
            self.run.chunk_capacity,
            self.resolved_target()?,
        )
        .with_first_sample(self.run.first_sample)
        .with_continuity(self.run.continuity)
        .with_backoff(self.run.backoff)
        .with_flush_partial(self.run.flush_partial);
        if let Some(timeout) = self.run.stall_timeout {
            config = config.with_stall_timeout(timeout);
        }
        Ok(config)
    }

    /// Resolved configuration rendered as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| IngestError::Configuration(format!("cannot render settings: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        // 256 samples per ms for one minute
        assert_eq!(settings.resolved_target().unwrap(), 15_360_000);
        assert_eq!(settings.ring.capacity.capacity(), 4096);
    }

    #[test]
    fn loads_file_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ring.toml",
                r#"
                [producer]
                period_ms = 10
                block_size = 256

                [run]
                duration = "2s"
                chunk_capacity = 512
                first_sample = "first_observed"
                stall_timeout = "250ms"

                [run.backoff]
                mode = "sleep"
                interval = "100us"

                [storage]
                enabled = true
                format = "csv"
                "#,
            )?;
            jail.set_env("RING_INGEST_RUN__TARGET_SAMPLES", "2560");
            jail.set_env("RING_INGEST_LOGGING__LEVEL", "debug");

            let settings = Settings::load_from("ring.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.producer.period_ms, 10);
            assert_eq!(settings.run.target_samples, Some(2560));
            assert_eq!(settings.run.duration, Some(Duration::from_secs(2)));
            assert_eq!(settings.run.first_sample, FirstSampleMode::FirstObserved);
            assert_eq!(settings.run.stall_timeout, Some(Duration::from_millis(250)));
            assert_eq!(
                settings.run.backoff,
                PollBackoff::Sleep {
                    interval: Duration::from_micros(100)
                }
            );
            assert_eq!(settings.storage.format, StorageFormat::Csv);
            assert_eq!(settings.logging.level, "debug");
            assert_eq!(settings.resolved_target().map_err(|e| e.to_string())?, 2560);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_non_power_of_two_capacity_in_file() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[ring]\ncapacity = 3000\n")?;
            assert!(Settings::load_from("bad.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn duration_target_uses_requested_rate() {
        let mut settings = Settings::default();
        settings.producer.period_ms = 10;
        settings.run.duration = Some(Duration::from_secs(12 * 60));
        // 25.6 kHz for twelve minutes
        assert_eq!(settings.resolved_target().unwrap(), 18_432_000);

        settings.run.duration = Some(Duration::from_micros(1));
        assert!(settings.resolved_target().is_err());

        settings.run.duration = Some(Duration::from_secs(365 * 24 * 3600));
        assert!(settings.resolved_target().is_err());
    }

    #[test]
    fn validation_failures() {
        let mut settings = Settings::default();
        settings.producer.period_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.run.chunk_capacity = 384;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.logging.level = "verbose".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.run.target_samples = None;
        settings.run.duration = None;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ring.control_offset = 0x100;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.producer.period_ms = MAX_PERIOD_MS + 1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ring.ring_offset = u64::MAX - 3;
        let err = settings.validate().unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");

        let mut settings = Settings::default();
        settings.ring.control_offset = u64::MAX - 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn renders_toml_that_loads_back() {
        let mut settings = Settings::default();
        settings.run.target_samples = Some(1024);
        settings.storage.results_log = Some(PathBuf::from("data/results.jsonl"));
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[run.backoff]"));
        assert!(text.contains("mode = \"adaptive\""));

        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
