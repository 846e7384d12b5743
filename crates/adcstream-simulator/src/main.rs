//! Desktop simulator for the adcstream drain loop.
//!
//! Runs the same drain loop as the firmware against a synthetic
//! continuous-mode ADC, so configurations, decoders and reporting can be
//! exercised without hardware. Output goes through `env_logger`; set
//! `RUST_LOG=debug` to see per-sample lines.
//!
//! # Arguments
//!
//! | Argument          | Effect                                               |
//! |-------------------|------------------------------------------------------|
//! | `--chip <name>`   | Reference configuration to run (default `esp32s3`)   |
//! | `--config <path>` | Read a JSON `MonitorConfig` instead                  |
//! | `--cycles <n>`    | Stop after `n` report cycles (default: run forever)  |
//! | `--lag-ms <ms>`   | Slow every read down to provoke store overruns       |
//! | `--print-config`  | Print the effective configuration as JSON and exit   |

mod source;
mod timebase;

use std::process::ExitCode;
use std::time::Duration;

use adcstream_core::{
    ChannelReport, ChannelSet, ChipVariant, DrainLoop, LogSink, MonitorConfig, ReportSink,
    ThroughputReport,
};
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::source::SyntheticSource;
use crate::timebase::StdTimebase;

#[derive(Error, Debug)]
enum ArgsError {
    #[error("Missing value for {0}")]
    MissingValue(&'static str),
    #[error("Unknown chip '{0}', expected one of esp32, esp32s2, esp32s3, esp32c3")]
    UnknownChip(String),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),
    #[error("Failed to read {path}: {reason}")]
    ConfigFile { path: String, reason: String },
}

#[derive(Debug, Default)]
struct Options {
    chip: Option<ChipVariant>,
    config_path: Option<String>,
    cycles: Option<u32>,
    lag: Duration,
    print_config: bool,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut options = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--chip" => {
                    let name = args.next().ok_or(ArgsError::MissingValue("--chip"))?;
                    let chip = name.parse().map_err(|()| ArgsError::UnknownChip(name))?;
                    options.chip = Some(chip);
                }
                "--config" => {
                    options.config_path =
                        Some(args.next().ok_or(ArgsError::MissingValue("--config"))?);
                }
                "--cycles" => {
                    let value = args.next().ok_or(ArgsError::MissingValue("--cycles"))?;
                    options.cycles = Some(parse_number(value)?);
                }
                "--lag-ms" => {
                    let value = args.next().ok_or(ArgsError::MissingValue("--lag-ms"))?;
                    options.lag = Duration::from_millis(u64::from(parse_number(value)?));
                }
                "--print-config" => options.print_config = true,
                _ => return Err(ArgsError::UnknownArgument(arg)),
            }
        }

        Ok(options)
    }

    fn monitor_config(&self) -> Result<MonitorConfig, ArgsError> {
        let Some(path) = &self.config_path else {
            return Ok(MonitorConfig::reference(
                self.chip.unwrap_or(ChipVariant::Esp32S3),
            ));
        };

        if self.chip.is_some() {
            warn!("--chip is ignored when --config is given");
        }
        let config_error = |reason: String| ArgsError::ConfigFile {
            path: path.clone(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))
    }
}

fn parse_number(value: String) -> Result<u32, ArgsError> {
    value.parse().map_err(|_| ArgsError::InvalidNumber(value))
}

/// Logs every report and raises `shutdown` after a number of cycles
struct CycleLimit<'s> {
    inner: LogSink,
    remaining: Option<u32>,
    shutdown: &'s Signal<NoopRawMutex, ()>,
}

impl ReportSink for CycleLimit<'_> {
    fn throughput(&mut self, report: &ThroughputReport) {
        self.inner.throughput(report);

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.shutdown.signal(());
            }
        }
    }

    fn channel(&mut self, report: &ChannelReport<'_>) {
        self.inner.channel(report);
    }
}

fn run(options: &Options) -> Result<(), String> {
    let config = options.monitor_config().map_err(|e| e.to_string())?;

    if options.print_config {
        let json = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
        println!("{json}");
        return Ok(());
    }

    let source = SyntheticSource::new(&config, options.lag).map_err(|e| e.to_string())?;
    let layout =
        adcstream_core::select_decoder(config.chip, &config.sampling).map_err(|e| e.to_string())?;
    let channels: ChannelSet = ChannelSet::from_bindings(
        &config.channels,
        config.drain.overflow_policy,
        config.drain.unmatched_policy,
    )
    .map_err(|e| e.to_string())?;

    let shutdown = Signal::<NoopRawMutex, ()>::new();
    if options.cycles == Some(0) {
        shutdown.signal(());
    }
    let sink = CycleLimit {
        inner: LogSink,
        remaining: options.cycles,
        shutdown: &shutdown,
    };

    let mut buffer = vec![0u8; config.batch_bytes()];
    let drain = DrainLoop::new(
        source,
        layout,
        channels,
        config.drain,
        StdTimebase,
        sink,
        &mut buffer,
    )
    .map_err(|e| e.to_string())?;

    let summary = block_on(drain.run(&shutdown)).map_err(|e| e.to_string())?;
    info!(
        "Finished: {} samples in {} batches, {} invalid, {} unmatched, {} overruns, {} timeouts",
        summary.samples,
        summary.batches,
        summary.invalid,
        summary.unmatched,
        summary.data_loss_events,
        summary.idle_timeouts
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    info!("Starting adcstream simulator");

    let result = Options::parse(std::env::args().skip(1))
        .map_err(|e| e.to_string())
        .and_then(|options| run(&options));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
