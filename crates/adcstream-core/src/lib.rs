//! Hardware-independent core library for adcstream
//!
//! This crate contains all platform-agnostic logic for continuous ADC
//! sampling: the per-channel min/max/range accumulators, the channel set the
//! samples are dispatched into, the hardware record layouts, chip
//! capabilities, configuration and its validation, the sampling-source
//! boundary and the drain loop tying them together.
//!
//! It is `no_std` and allocation free so it compiles on both embedded
//! targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod accumulator;
pub mod backoff;
pub mod channel;
pub mod chip;
pub mod config;
pub mod decode;
pub mod drain;
pub mod error;
pub mod record;
pub mod report;
pub mod source;

pub use accumulator::{ChannelAccumulator, ChannelStats, SAMPLES_PER_CHANNEL};
pub use channel::{AdcUnit, ChannelBinding, ChannelId, ChannelSet, Dispatch};
pub use chip::ChipVariant;
pub use config::{DrainConfig, MonitorConfig, SamplingConfig};
pub use decode::{RecordLayout, SampleDecoder, SampleEncoder, select_decoder};
pub use drain::{Clock, DrainLoop, DrainState, DrainSummary, Timebase};
pub use error::{ConfigError, DrainError};
pub use record::SampleRecord;
pub use report::{ChannelReport, LogSink, ReportSink, ThroughputReport};
pub use source::{DriverError, ErrorClass, ReadOutcome, ReadTimeout, SamplingSource};
