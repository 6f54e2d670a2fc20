//! One complete acquisition: bring the producer up, drain until the run ends, bring the
//! producer down, report.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::{Settings, StorageFormat};
use crate::data::{CsvSink, FileSink, NullSink, Sink};
use crate::engine::{IngestionEngine, RunResult};
use crate::error::AppResult;
use crate::link::{Link, ProducerHandle};
use crate::report::{ResultsLog, RunReport};

/// Open the sink selected by `[storage]`.
pub fn open_sink(settings: &Settings) -> AppResult<Box<dyn Sink>> {
    if !settings.storage.enabled {
        return Ok(Box::new(NullSink));
    }
    let sink: Box<dyn Sink> = match settings.storage.format {
        StorageFormat::Raw => Box::new(FileSink::create(&settings.storage.path)?),
        StorageFormat::Csv => Box::new(CsvSink::create(&settings.storage.path)?),
    };
    Ok(sink)
}

/// Run one acquisition against `link` and return its report.
///
/// Failures at any stage end up in the report rather than as an `Err`. The report is also
/// appended to `storage.results_log` when one is configured.
pub fn run_acquisition<L: Link>(
    settings: &Settings,
    link: &L,
    stop: Option<Arc<AtomicBool>>,
) -> RunReport {
    let started_at = Utc::now();
    let params = settings.producer_params();
    let target = settings.resolved_target().ok();

    let report = match acquire_and_drain(settings, link, stop) {
        Ok((target, result)) => {
            RunReport::from_result(started_at, link.describe(), params, target, result)
        }
        Err(err) => {
            error!(error = %err, kind = err.kind(), "acquisition failed");
            RunReport::from_error(started_at, link.describe(), params, target, &err)
        }
    };

    if let Some(path) = &settings.storage.results_log {
        if let Err(e) = ResultsLog::new(path).append(&report) {
            warn!(path = %path.display(), error = %e, "failed to append results log");
        }
    }
    report
}

fn acquire_and_drain<L: Link>(
    settings: &Settings,
    link: &L,
    stop: Option<Arc<AtomicBool>>,
) -> AppResult<(u32, RunResult)> {
    settings.validate()?;
    let engine_config = settings.engine_config()?;
    let target = engine_config.target_samples;
    let sink = open_sink(settings)?;

    let handle = link.acquire(&settings.producer_params())?;
    info!(
        link = %link.describe(),
        target_samples = target,
        requested_rate_hz = settings.producer_params().requested_rate_hz(),
        "acquisition started"
    );

    let outcome = IngestionEngine::new(&handle, sink, engine_config).and_then(|engine| {
        let mut engine = match stop {
            Some(stop) => engine.with_stop_signal(stop),
            None => engine,
        };
        engine.run()
    });

    if let Err(e) = handle.release() {
        warn!(error = %e, "producer link release failed");
    }
    Ok((target, outcome?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingGeometry;
    use crate::sim::SimLink;
    use std::time::Duration;

    #[test]
    fn invalid_settings_are_reported_not_raised() {
        let mut settings = Settings::default();
        settings.producer.block_size = 0;
        let report = run_acquisition(&settings, &SimLink::new(RingGeometry::default()), None);
        assert!(!report.passed());
        assert!(report.result.is_none());
        assert!(report.to_string().contains("ConfigurationError"));
    }

    #[test]
    fn disabled_storage_uses_null_sink() {
        let settings = Settings::default();
        let mut sink = open_sink(&settings).unwrap();
        assert!(sink.append(&[1, 2, 3]).is_ok());
    }

    #[test]
    fn simulated_run_passes() {
        let mut settings = Settings::default();
        settings.producer.block_size = 64;
        settings.run.chunk_capacity = 256;
        settings.run.target_samples = Some(64 * 20);
        settings.run.stall_timeout = Some(Duration::from_secs(10));
        let link = SimLink::new(RingGeometry::default());

        let report = run_acquisition(&settings, &link, None);
        assert!(report.passed(), "{report}");
        let result = report.result.unwrap();
        assert_eq!(result.samples_observed, 1280);
        assert_eq!(result.chunks_flushed, 5);
    }
}
