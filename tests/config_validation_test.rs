//! Configuration loading and validation through the public API.

use std::path::PathBuf;
use std::time::Duration;

use ring_ingest::config::{LogFormat, Settings, StorageFormat};
use ring_ingest::engine::{ContinuityCheck, FirstSampleMode, PollBackoff};
use ring_ingest::validation;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/ring_ingest.toml")
}

#[test]
fn test_shipped_config_is_valid() {
    let settings = Settings::load_from(shipped_config()).unwrap();
    assert!(settings.validate().is_ok());

    assert_eq!(settings.producer.period_ms, 10);
    assert_eq!(settings.ring.capacity.capacity(), 4096);
    assert_eq!(settings.ring.control_offset, 0x10000);
    assert_eq!(settings.run.first_sample, FirstSampleMode::Zero);
    assert_eq!(settings.run.continuity, ContinuityCheck::BlockTail);
    assert_eq!(
        settings.run.backoff,
        PollBackoff::Adaptive {
            min: Duration::from_micros(10),
            max: Duration::from_millis(1),
        }
    );
    assert_eq!(settings.storage.format, StorageFormat::Raw);
    assert_eq!(settings.logging.format, LogFormat::Pretty);

    // 25.6 kHz for twelve minutes, as in `host 10 256 12 1`
    assert_eq!(settings.resolved_target().unwrap(), 18_432_000);
}

#[test]
fn test_engine_config_mirrors_run_section() {
    let mut settings = Settings::default();
    settings.run.target_samples = Some(2560);
    settings.run.chunk_capacity = 256;
    settings.run.flush_partial = true;
    settings.run.continuity = ContinuityCheck::EverySample;

    let engine = settings.engine_config().unwrap();
    assert_eq!(engine.block_size, 256);
    assert_eq!(engine.chunk_capacity, 256);
    assert_eq!(engine.target_samples, 2560);
    assert!(engine.flush_partial);
    assert_eq!(engine.continuity, ContinuityCheck::EverySample);
    assert_eq!(engine.stall_timeout, Some(Duration::from_secs(5)));
}

#[test]
fn test_block_larger_than_ring_rejected() {
    let mut settings = Settings::default();
    settings.producer.block_size = 8192;
    settings.run.chunk_capacity = 8192;
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("exceeds ring capacity"));
}

#[test]
fn test_chunk_must_be_multiple_of_block() {
    let mut settings = Settings::default();
    settings.producer.block_size = 512;
    settings.run.chunk_capacity = 256;
    let err = settings.validate().unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    assert!(err.to_string().contains("chunk_capacity 256 vs block_size 512"));
}

#[test]
fn test_zero_target_rejected() {
    let mut settings = Settings::default();
    settings.run.target_samples = Some(0);
    assert!(settings.validate().is_err());
}

#[test]
fn test_target_near_u32_max_rejected() {
    let mut settings = Settings::default();
    settings.run.target_samples = Some(u32::MAX - 10);
    assert!(settings.validate().is_err());
}

#[test]
fn test_inverted_adaptive_backoff_rejected() {
    let mut settings = Settings::default();
    settings.run.backoff = PollBackoff::Adaptive {
        min: Duration::from_millis(5),
        max: Duration::from_millis(1),
    };
    assert!(settings.validate().is_err());
}

#[test]
fn test_empty_device_path_rejected() {
    let mut settings = Settings::default();
    settings.ring.device = PathBuf::new();
    assert!(settings.validate().is_err());
}

#[test]
fn test_validation_helpers() {
    assert!(validation::is_power_of_two(4096).is_ok());
    assert!(validation::is_power_of_two(4095).is_err());
    assert!(validation::is_multiple_of(4096, 256).is_ok());
    assert!(validation::is_multiple_of(256, 0).is_err());
    assert!(validation::is_in_range(5u32, 1..=10).is_ok());
    assert!(validation::is_in_range(11u32, 1..=10).is_err());
}
