//! CLI Entry Point for ring-ingest
//!
//! # Usage
//!
//! Drain the co-processor ring for 12 minutes at 10 ms / 256 samples and keep the data:
//! ```bash
//! ring-ingest run --delay-ms 10 --block-size 256 --minutes 12 --write-to-file
//! ```
//!
//! Same run against the software producer:
//! ```bash
//! ring-ingest simulate --delay-ms 10 --block-size 256 --samples 25600
//! ```
//!
//! Print the configuration a run would use:
//! ```bash
//! ring-ingest --config config/ring_ingest.toml show-config
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ring_ingest::config::{Settings, DEFAULT_CONFIG_PATH};
use ring_ingest::link::MmapLink;
use ring_ingest::report::ResultsLog;
use ring_ingest::sim::SimLink;
use ring_ingest::{run_acquisition, tracing_init, Link, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(name = "ring-ingest")]
#[command(about = "Host-side consumer for a co-processor telemetry ring", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the hardware ring
    Run(RunArgs),

    /// Drain a ring filled by a software producer thread
    Simulate {
        #[command(flatten)]
        run: RunArgs,

        /// Value of the first simulated sample
        #[arg(long, default_value_t = 0)]
        start_value: u32,

        /// Stop producing after this many blocks
        #[arg(long)]
        stall_after: Option<u32>,
    },

    /// Print the resolved configuration as TOML
    ShowConfig(RunArgs),

    /// Summarize a results log
    Stats {
        /// Results log to read (defaults to storage.results_log)
        path: Option<PathBuf>,
    },
}

/// Command-line overrides for the configuration file.
#[derive(Args, Default)]
struct RunArgs {
    /// Producer period between blocks, in milliseconds
    #[arg(long)]
    delay_ms: Option<u32>,

    /// Samples per block
    #[arg(long)]
    block_size: Option<u32>,

    /// Run time in minutes (converted to samples at the requested rate)
    #[arg(long, conflicts_with = "samples")]
    minutes: Option<u64>,

    /// Exact number of samples to drain
    #[arg(long)]
    samples: Option<u32>,

    /// Persist drained chunks
    #[arg(long)]
    write_to_file: bool,

    /// Output path for persisted samples
    #[arg(long)]
    output: Option<PathBuf>,

    /// Device exposing co-processor memory
    #[arg(long)]
    device: Option<PathBuf>,

    /// Append the run report to this JSON lines file
    #[arg(long)]
    results_log: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(delay_ms) = self.delay_ms {
            settings.producer.period_ms = delay_ms;
        }
        if let Some(block_size) = self.block_size {
            settings.producer.block_size = block_size;
        }
        if let Some(minutes) = self.minutes {
            let secs = minutes
                .checked_mul(60)
                .with_context(|| format!("--minutes {minutes} is too large"))?;
            settings.run.duration = Some(Duration::from_secs(secs));
            settings.run.target_samples = None;
        }
        if let Some(samples) = self.samples {
            settings.run.target_samples = Some(samples);
        }
        if self.write_to_file {
            settings.storage.enabled = true;
        }
        if let Some(output) = &self.output {
            settings.storage.path = output.clone();
        }
        if let Some(device) = &self.device {
            settings.ring.device = device.clone();
        }
        if let Some(results_log) = &self.results_log {
            settings.storage.results_log = Some(results_log.clone());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let settings = load_settings(&cli.config, &args)?;
            let link = MmapLink::new(settings.ring.device.clone(), settings.device_layout());
            execute(settings, link).await
        }
        Commands::Simulate {
            run,
            start_value,
            stall_after,
        } => {
            let settings = load_settings(&cli.config, &run)?;
            let mut link = SimLink::new(settings.ring.capacity).starting_at(start_value);
            if let Some(blocks) = stall_after {
                link = link.stalling_after(blocks);
            }
            execute(settings, link).await
        }
        Commands::ShowConfig(args) => {
            let settings = load_settings(&cli.config, &args)?;
            print!("{}", settings.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats { path } => {
            let settings = load_settings(&cli.config, &RunArgs::default())?;
            let path = path
                .or(settings.storage.results_log)
                .context("no results log given and storage.results_log is not set")?;
            let summary = ResultsLog::new(&path)
                .summary()
                .with_context(|| format!("Failed to read results log {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_settings(path: &Path, args: &RunArgs) -> Result<Settings> {
    let mut settings = Settings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    args.apply(&mut settings)?;
    Ok(settings)
}

async fn execute<L>(settings: Settings, link: L) -> Result<ExitCode>
where
    L: Link + Send + 'static,
{
    tracing_init::init_from_settings(&settings).context("Failed to initialize tracing")?;

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping acquisition");
            signal_stop.store(true, Ordering::Release);
        }
    });

    let report: RunReport =
        tokio::task::spawn_blocking(move || run_acquisition(&settings, &link, Some(stop)))
            .await
            .context("acquisition task failed")?;

    println!("{report}");
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
