//! Error types for configuration and the drain loop

use thiserror_no_std::Error;

use crate::channel::ChannelId;
use crate::chip::ChipVariant;
use crate::config::{ConvMode, OutputFormat};

/// Reasons a configuration is rejected before sampling starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("conversion mode {mode:?} is not supported on {chip:?}")]
    UnsupportedMode { chip: ChipVariant, mode: ConvMode },
    #[error("output format {format:?} is not supported on {chip:?}")]
    UnsupportedFormat {
        chip: ChipVariant,
        format: OutputFormat,
    },
    #[error("conversion pattern is empty")]
    EmptyPattern,
    #[error("conversion pattern has {len} entries, the controller holds {max}")]
    PatternTooLong { len: usize, max: usize },
    #[error("{id} does not exist on {chip:?}")]
    ChannelOutOfRange { chip: ChipVariant, id: ChannelId },
    #[error("{id} is not converted in {mode:?} mode")]
    UnitNotConverted { id: ChannelId, mode: ConvMode },
    #[error("sample rate {freq_hz} Hz outside {min}..={max} Hz")]
    SampleRateOutOfRange { freq_hz: u32, min: u32, max: u32 },
    #[error("frame of {frame_bytes} bytes is not a multiple of the {record_width} byte record")]
    FrameNotAligned { frame_bytes: u32, record_width: u32 },
    #[error("store buffer of {store_bytes} bytes cannot hold a {frame_bytes} byte frame")]
    StoreBufferTooSmall { store_bytes: u32, frame_bytes: u32 },
    #[error("{chip:?} requires a conversion limit")]
    MissingConvLimit { chip: ChipVariant },
    #[error("conversion limit {limit} outside 1..=255")]
    ConvLimitOutOfRange { limit: u32 },
    #[error("{conversions} conversions at {freq_hz} Hz take less than 1 us per frame")]
    FramePeriodTooShort { conversions: u32, freq_hz: u32 },
    #[error("{id} is monitored but not in the conversion pattern")]
    UnsampledChannel { id: ChannelId },
    #[error("{id} is bound more than once")]
    DuplicateBinding { id: ChannelId },
    #[error("{count} channel bindings, at most {max} are supported")]
    TooManyBindings { count: usize, max: usize },
    #[error("read buffer of {len} bytes cannot hold a {record_width} byte record")]
    BufferTooSmall { len: usize, record_width: usize },
}

/// Ways the drain loop ends other than a shutdown request
#[derive(Error, Debug)]
pub enum DrainError<E: core::fmt::Debug> {
    #[error("failed to start sampling: {0:?}")]
    Start(E),
    #[error("sampling source failed: {0:?}")]
    Source(E),
    #[error("gave up after {attempts} consecutive failures, last: {last:?}")]
    RetriesExhausted { attempts: u32, last: E },
    #[error("failed to stop sampling: {0:?}")]
    Stop(E),
}
