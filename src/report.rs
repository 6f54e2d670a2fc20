//! Run reports and the cross-run results log.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{RunResult, Termination};
use crate::error::{AppResult, IngestError};
use crate::link::ProducerParams;

/// Pass/fail with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Target reached with continuity intact.
    Pass,
    /// Anything else.
    Fail {
        /// Stable error kind, e.g. `OverrunError`.
        kind: String,
        /// Human-readable detail.
        diagnostic: String,
    },
}

impl Outcome {
    fn from_error(err: &IngestError) -> Self {
        Outcome::Fail {
            kind: err.kind().to_string(),
            diagnostic: err.to_string(),
        }
    }
}

/// Everything known about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Device path or `simulated`.
    pub link: String,
    /// Period and block size written to the producer.
    pub params: ProducerParams,
    /// Resolved sample target, if the settings yielded one.
    pub target_samples: Option<u32>,
    /// Samples per second the producer was asked for.
    pub requested_rate_hz: f64,
    /// Samples per second actually drained.
    pub achieved_rate_hz: Option<f64>,
    /// Absent when the run failed before the polling loop started.
    pub result: Option<RunResult>,
    /// Pass or fail.
    pub outcome: Outcome,
}

impl RunReport {
    /// Report for a run whose loop terminated.
    pub fn from_result(
        started_at: DateTime<Utc>,
        link: impl Into<String>,
        params: ProducerParams,
        target_samples: u32,
        result: RunResult,
    ) -> Self {
        let outcome = if result.pass {
            Outcome::Pass
        } else {
            match result.error() {
                Some(err) => Outcome::from_error(&err),
                None => Outcome::Fail {
                    kind: termination_kind(&result.termination).to_string(),
                    diagnostic: termination_message(&result.termination),
                },
            }
        };
        Self {
            started_at,
            link: link.into(),
            params,
            target_samples: Some(target_samples),
            requested_rate_hz: params.requested_rate_hz(),
            achieved_rate_hz: Some(result.achieved_rate_hz()),
            result: Some(result),
            outcome,
        }
    }

    /// Report for a run that failed outside the polling loop.
    pub fn from_error(
        started_at: DateTime<Utc>,
        link: impl Into<String>,
        params: ProducerParams,
        target_samples: Option<u32>,
        err: &IngestError,
    ) -> Self {
        Self {
            started_at,
            link: link.into(),
            params,
            target_samples,
            requested_rate_hz: params.requested_rate_hz(),
            achieved_rate_hz: None,
            result: None,
            outcome: Outcome::from_error(err),
        }
    }

    /// Shorthand for an [`Outcome::Pass`].
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

fn termination_kind(termination: &Termination) -> &'static str {
    match termination {
        Termination::Completed => "Completed",
        Termination::Overrun { .. } => "OverrunError",
        Termination::Cancelled => "Cancelled",
        Termination::Stalled { .. } => "Stalled",
    }
}

fn termination_message(termination: &Termination) -> String {
    match termination {
        Termination::Completed => "target reached".to_string(),
        Termination::Overrun { expected, observed } => {
            format!("expected sample {expected}, observed {observed}")
        }
        Termination::Cancelled => "stopped before reaching the target".to_string(),
        Termination::Stalled { idle_ms } => {
            format!("no block from the producer for {idle_ms} ms")
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Operation Parameters:")?;
        writeln!(f, "\tLink: {}", self.link)?;
        writeln!(f, "\tPeriod (ms): {}", self.params.period_ms)?;
        writeln!(f, "\tBlock Size: {}", self.params.block_size)?;
        if let Some(target) = self.target_samples {
            writeln!(f, "\tTarget Samples: {target}")?;
        }
        writeln!(f, "\t-----------------")?;
        writeln!(
            f,
            "\tRequested rate = {:.3} [kHz]",
            self.requested_rate_hz / 1000.0
        )?;

        if let Some(result) = &self.result {
            writeln!(f, "Blocks read: {}", result.blocks_read)?;
            writeln!(f, "Chunks flushed: {}", result.chunks_flushed)?;
            writeln!(f, "Elapsed = {:.3} [sec]", result.elapsed_seconds)?;
            writeln!(
                f,
                "Actual rate = {:.3} [kHz]",
                result.achieved_rate_hz() / 1000.0
            )?;
            writeln!(
                f,
                "Samples observed = {}\tSamples expected = {}",
                result.samples_observed, result.samples_expected
            )?;
        }

        match &self.outcome {
            Outcome::Pass => write!(f, "Result: PASS"),
            Outcome::Fail { kind, diagnostic } => {
                write!(f, "Result: FAIL ({kind}): {diagnostic}")
            }
        }
    }
}

/// Append-only JSON lines file, one [`RunReport`] per line.
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    /// Log at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `report` as one JSON line.
    pub fn append(&self, report: &RunReport) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(report)?;
        writeln!(file, "{line}")?;
        debug!(path = %self.path.display(), "run appended to results log");
        Ok(())
    }

    /// Every report in the log, oldest first. Blank lines are skipped.
    pub fn read_all(&self) -> AppResult<Vec<RunReport>> {
        let file = fs::File::open(&self.path)?;
        let mut reports = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            reports.push(serde_json::from_str(&line)?);
        }
        Ok(reports)
    }

    /// Aggregate every run in the log.
    pub fn summary(&self) -> AppResult<ResultsSummary> {
        Ok(ResultsSummary::from_reports(&self.read_all()?))
    }
}

/// Aggregate over a results log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResultsSummary {
    /// Runs in the log.
    pub runs: usize,
    /// Runs that passed.
    pub passed: usize,
    /// Mean achieved rate over runs that reached the polling loop.
    pub mean_achieved_rate_hz: Option<f64>,
}

impl ResultsSummary {
    /// Summarize `reports`.
    pub fn from_reports(reports: &[RunReport]) -> Self {
        let rates: Vec<f64> = reports.iter().filter_map(|r| r.achieved_rate_hz).collect();
        let mean_achieved_rate_hz = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        };
        Self {
            runs: reports.len(),
            passed: reports.iter().filter(|r| r.passed()).count(),
            mean_achieved_rate_hz,
        }
    }
}
