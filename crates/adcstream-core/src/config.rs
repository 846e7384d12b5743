//! Sampling and drain-loop configuration
//!
//! [`MonitorConfig::reference`] reproduces the stock configuration for each
//! chip: a 1024 byte store buffer, 512 bytes per interrupt frame, 20480 Hz,
//! 6 dB attenuation and a one second report interval. [`MonitorConfig::validate`]
//! performs the checks the ADC driver applies before accepting a
//! configuration.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::channel::{AdcUnit, ChannelBinding, ChannelId, DropPolicy, MAX_MONITORED_CHANNELS};
use crate::chip::ChipVariant;
use crate::error::ConfigError;
use crate::source::ReadTimeout;

/// Longest pattern table across the supported chips
pub const MAX_PATTERN_LEN: usize = 32;

const ESP32_PATTERN: &[ChannelId] = &[ChannelId::adc1(0), ChannelId::adc1(3), ChannelId::adc1(6)];
const ESP32S2_PATTERN: &[ChannelId] = &[ChannelId::adc1(2), ChannelId::adc1(3), ChannelId::adc2(0)];
const SINGLE_UNIT_PATTERN: &[ChannelId] = &[ChannelId::adc1(2), ChannelId::adc1(3)];

/// Which units the digital controller converts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvMode {
    SingleUnit1,
    SingleUnit2,
    /// Both units convert simultaneously
    BothUnits,
    /// The units take turns
    AlternateUnits,
}

impl ConvMode {
    pub const fn covers(self, unit: AdcUnit) -> bool {
        match self {
            Self::SingleUnit1 => matches!(unit, AdcUnit::Adc1),
            Self::SingleUnit2 => matches!(unit, AdcUnit::Adc2),
            Self::BothUnits | Self::AlternateUnits => true,
        }
    }
}

/// Layout of the conversion results written to the DMA buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Data and channel only; the unit is implied by the conversion mode
    Type1,
    /// Data, channel and unit
    Type2,
}

/// Input attenuation of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Attenuation {
    Db0,
    Db2_5,
    #[default]
    Db6,
    Db11,
}

impl Attenuation {
    /// Approximate full-scale input voltage in millivolts
    pub const fn full_scale_mv(self) -> u16 {
        match self {
            Self::Db0 => 950,
            Self::Db2_5 => 1250,
            Self::Db6 => 1750,
            Self::Db11 => 2450,
        }
    }
}

/// One entry of the conversion pattern table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub channel: ChannelId,
    pub attenuation: Attenuation,
}

impl PatternEntry {
    pub const fn new(channel: ChannelId, attenuation: Attenuation) -> Self {
        Self {
            channel,
            attenuation,
        }
    }
}

/// Configuration handed to the sampling subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Size of the driver's internal store buffer in bytes
    pub max_store_buf_size: u32,
    /// Bytes of conversion results per internal interrupt frame
    pub conv_num_each_intr: u32,
    pub sample_freq_hz: u32,
    pub conv_mode: ConvMode,
    pub format: OutputFormat,
    /// Maximum conversions per frame, mandatory on the ESP32
    pub conv_limit: Option<u32>,
    pub pattern: heapless::Vec<PatternEntry, MAX_PATTERN_LEN>,
}

impl SamplingConfig {
    /// Channel selection mask of a unit, one bit per channel in the pattern
    pub fn channel_mask(&self, unit: AdcUnit) -> u16 {
        self.pattern
            .iter()
            .filter(|entry| entry.channel.unit == unit)
            .fold(0u16, |mask, entry| {
                mask | 1u16.checked_shl(u32::from(entry.channel.channel)).unwrap_or(0)
            })
    }

    /// Record width for this configuration on the given chip
    pub fn record_width(&self, chip: ChipVariant) -> usize {
        chip.record_width(self.format)
    }

    /// Conversions in one interrupt frame, after the conversion limit
    pub fn conversions_per_frame(&self, chip: ChipVariant) -> u32 {
        let per_frame = self.conv_num_each_intr / self.record_width(chip) as u32;
        match self.conv_limit {
            Some(limit) => per_frame.min(limit),
            None => per_frame,
        }
    }

    /// Time the controller needs to fill one frame
    pub fn frame_period(&self, chip: ChipVariant) -> Duration {
        let conversions = u64::from(self.conversions_per_frame(chip));
        Duration::from_micros(conversions * 1_000_000 / u64::from(self.sample_freq_hz.max(1)))
    }

    pub fn validate(&self, chip: ChipVariant) -> Result<(), ConfigError> {
        if !chip.supports_mode(self.conv_mode) {
            return Err(ConfigError::UnsupportedMode {
                chip,
                mode: self.conv_mode,
            });
        }

        if !chip.supports_format(self.format) {
            return Err(ConfigError::UnsupportedFormat {
                chip,
                format: self.format,
            });
        }

        if self.pattern.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }

        if self.pattern.len() > chip.max_pattern_len() {
            return Err(ConfigError::PatternTooLong {
                len: self.pattern.len(),
                max: chip.max_pattern_len(),
            });
        }

        for entry in &self.pattern {
            let id = entry.channel;
            if id.channel >= chip.channel_count(id.unit) {
                return Err(ConfigError::ChannelOutOfRange { chip, id });
            }
            if !self.conv_mode.covers(id.unit) {
                return Err(ConfigError::UnitNotConverted {
                    id,
                    mode: self.conv_mode,
                });
            }
        }

        let freq_range = chip.sample_freq_range();
        if !freq_range.contains(&self.sample_freq_hz) {
            return Err(ConfigError::SampleRateOutOfRange {
                freq_hz: self.sample_freq_hz,
                min: *freq_range.start(),
                max: *freq_range.end(),
            });
        }

        let width = self.record_width(chip) as u32;
        if self.conv_num_each_intr == 0 || self.conv_num_each_intr % width != 0 {
            return Err(ConfigError::FrameNotAligned {
                frame_bytes: self.conv_num_each_intr,
                record_width: width,
            });
        }

        if self.max_store_buf_size < self.conv_num_each_intr {
            return Err(ConfigError::StoreBufferTooSmall {
                store_bytes: self.max_store_buf_size,
                frame_bytes: self.conv_num_each_intr,
            });
        }

        match self.conv_limit {
            None if chip.requires_conv_limit() => {
                return Err(ConfigError::MissingConvLimit { chip });
            }
            Some(limit) if !(1..=255).contains(&limit) => {
                return Err(ConfigError::ConvLimitOutOfRange { limit });
            }
            _ => {}
        }

        // pacing works in whole microseconds
        if self.frame_period(chip).as_micros() == 0 {
            return Err(ConfigError::FramePeriodTooShort {
                conversions: self.conversions_per_frame(chip),
                freq_hz: self.sample_freq_hz,
            });
        }

        Ok(())
    }
}

/// Retry policy for recoverable driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_ms: u32,
    pub max_ms: u32,
    /// Consecutive failures tolerated before the loop gives up
    pub max_consecutive_failures: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 10,
            max_ms: 2000,
            max_consecutive_failures: 5,
        }
    }
}

/// Behaviour of the drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Maximum wait for a batch; `None` waits forever
    pub read_timeout_ms: Option<u32>,
    pub report_interval_ms: u32,
    /// Pause after a read that produced no data
    pub idle_pause_ms: u32,
    /// Pause at the end of every iteration
    pub yield_ms: u32,
    /// Records per batch that get a debug line
    pub debug_prefix_records: usize,
    pub overflow_policy: DropPolicy,
    pub unmatched_policy: DropPolicy,
    pub backoff: BackoffConfig,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            report_interval_ms: 1000,
            idle_pause_ms: 1000,
            yield_ms: 1,
            debug_prefix_records: 6,
            overflow_policy: DropPolicy::Silent,
            unmatched_policy: DropPolicy::Silent,
            backoff: BackoffConfig::default(),
        }
    }
}

impl DrainConfig {
    pub fn read_timeout(&self) -> ReadTimeout {
        match self.read_timeout_ms {
            Some(ms) => ReadTimeout::After(Duration::from_millis(u64::from(ms))),
            None => ReadTimeout::Forever,
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.report_interval_ms))
    }
}

/// Everything needed to bring up sampling and the drain loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub chip: ChipVariant,
    pub sampling: SamplingConfig,
    pub drain: DrainConfig,
    pub channels: heapless::Vec<ChannelBinding, MAX_MONITORED_CHANNELS>,
}

impl MonitorConfig {
    /// Stock configuration for a chip, monitoring every channel in the pattern
    pub fn reference(chip: ChipVariant) -> Self {
        let (conv_mode, conv_limit, pattern) = match chip {
            ChipVariant::Esp32 => (ConvMode::SingleUnit1, Some(250), ESP32_PATTERN),
            ChipVariant::Esp32S2 => (ConvMode::BothUnits, None, ESP32S2_PATTERN),
            ChipVariant::Esp32S3 | ChipVariant::Esp32C3 => {
                (ConvMode::SingleUnit1, None, SINGLE_UNIT_PATTERN)
            }
        };

        let mut config = Self {
            chip,
            sampling: SamplingConfig {
                max_store_buf_size: 1024,
                conv_num_each_intr: 512,
                sample_freq_hz: 20480,
                conv_mode,
                format: chip.default_format(),
                conv_limit,
                pattern: heapless::Vec::new(),
            },
            drain: DrainConfig::default(),
            channels: heapless::Vec::new(),
        };

        const LABELS: [&str; 3] = ["ct_1", "ct_2", "ct_3"];
        for (id, label) in pattern.iter().zip(LABELS) {
            // The reference patterns are shorter than either capacity
            let _ = config
                .sampling
                .pattern
                .push(PatternEntry::new(*id, Attenuation::Db6));
            let _ = config.channels.push(ChannelBinding::new(*id, label));
        }

        config
    }

    /// Replace the pattern and bindings with the given labelled channels
    pub fn with_channels(
        mut self,
        channels: &[(ChannelId, &str)],
        attenuation: Attenuation,
    ) -> Result<Self, ConfigError> {
        let too_many = ConfigError::TooManyBindings {
            count: channels.len(),
            max: MAX_MONITORED_CHANNELS,
        };

        self.sampling.pattern.clear();
        self.channels.clear();
        for (id, label) in channels {
            self.sampling
                .pattern
                .push(PatternEntry::new(*id, attenuation))
                .map_err(|_| too_many.clone())?;
            self.channels
                .push(ChannelBinding::new(*id, label))
                .map_err(|_| too_many.clone())?;
        }
        Ok(self)
    }

    /// Size of one read batch in bytes
    pub fn batch_bytes(&self) -> usize {
        self.sampling.conv_num_each_intr as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling.validate(self.chip)?;

        for (i, binding) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|b| b.id == binding.id) {
                return Err(ConfigError::DuplicateBinding { id: binding.id });
            }
            if !self
                .sampling
                .pattern
                .iter()
                .any(|entry| entry.channel == binding.id)
            {
                return Err(ConfigError::UnsampledChannel { id: binding.id });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_configs_are_valid() {
        for chip in ChipVariant::ALL {
            let config = MonitorConfig::reference(chip);
            assert_eq!(config.validate(), Ok(()), "{:?}", chip);
            assert_eq!(config.channels.len(), config.sampling.pattern.len());
        }
    }

    #[test]
    fn test_reference_esp32_monitors_three_channels() {
        let config = MonitorConfig::reference(ChipVariant::Esp32);
        let labels: Vec<_> = config.channels.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["ct_1", "ct_2", "ct_3"]);
        assert_eq!(config.sampling.channel_mask(AdcUnit::Adc1), 0b100_1001);
        assert_eq!(config.sampling.channel_mask(AdcUnit::Adc2), 0);
        assert_eq!(config.sampling.conv_limit, Some(250));
    }

    #[test]
    fn test_reference_esp32s2_uses_both_units() {
        let config = MonitorConfig::reference(ChipVariant::Esp32S2);
        assert_eq!(config.sampling.channel_mask(AdcUnit::Adc1), 0b1100);
        assert_eq!(config.sampling.channel_mask(AdcUnit::Adc2), 0b1);
    }

    #[test]
    fn test_conversions_per_frame() {
        let esp32 = MonitorConfig::reference(ChipVariant::Esp32);
        assert_eq!(esp32.sampling.conversions_per_frame(ChipVariant::Esp32), 250);

        let s3 = MonitorConfig::reference(ChipVariant::Esp32S3);
        assert_eq!(s3.sampling.conversions_per_frame(ChipVariant::Esp32S3), 128);
        assert_eq!(
            s3.sampling.frame_period(ChipVariant::Esp32S3),
            Duration::from_micros(6250)
        );
    }

    fn s3() -> SamplingConfig {
        MonitorConfig::reference(ChipVariant::Esp32S3).sampling
    }

    #[test]
    fn test_rejects_empty_pattern() {
        let mut config = s3();
        config.pattern.clear();
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::EmptyPattern)
        );
    }

    #[test]
    fn test_rejects_pattern_longer_than_table() {
        let mut config = s3();
        config.pattern.clear();
        for _ in 0..25 {
            config
                .pattern
                .push(PatternEntry::new(ChannelId::adc1(0), Attenuation::Db0))
                .unwrap();
        }
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::PatternTooLong { len: 25, max: 24 })
        );
    }

    #[test]
    fn test_rejects_channel_out_of_range() {
        let mut config = s3();
        config.pattern[0].channel = ChannelId::adc1(10);
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::ChannelOutOfRange {
                chip: ChipVariant::Esp32S3,
                id: ChannelId::adc1(10)
            })
        );
    }

    #[test]
    fn test_rejects_unit_outside_mode() {
        let mut config = s3();
        config.pattern[1].channel = ChannelId::adc2(1);
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::UnitNotConverted {
                id: ChannelId::adc2(1),
                mode: ConvMode::SingleUnit1
            })
        );
    }

    #[test]
    fn test_rejects_unsupported_mode_and_format() {
        let mut config = MonitorConfig::reference(ChipVariant::Esp32).sampling;
        config.conv_mode = ConvMode::BothUnits;
        assert_eq!(
            config.validate(ChipVariant::Esp32),
            Err(ConfigError::UnsupportedMode {
                chip: ChipVariant::Esp32,
                mode: ConvMode::BothUnits
            })
        );

        let mut config = s3();
        config.format = OutputFormat::Type1;
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::UnsupportedFormat {
                chip: ChipVariant::Esp32S3,
                format: OutputFormat::Type1
            })
        );
    }

    #[test]
    fn test_rejects_sample_rate_out_of_range() {
        let mut config = s3();
        config.sample_freq_hz = 100_000;
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::SampleRateOutOfRange {
                freq_hz: 100_000,
                min: 611,
                max: 83_333
            })
        );
    }

    #[test]
    fn test_rejects_misaligned_frame_and_small_store() {
        let mut config = s3();
        config.conv_num_each_intr = 510;
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::FrameNotAligned {
                frame_bytes: 510,
                record_width: 4
            })
        );

        let mut config = s3();
        config.max_store_buf_size = 256;
        assert_eq!(
            config.validate(ChipVariant::Esp32S3),
            Err(ConfigError::StoreBufferTooSmall {
                store_bytes: 256,
                frame_bytes: 512
            })
        );
    }

    #[test]
    fn test_conv_limit_rules() {
        let mut config = MonitorConfig::reference(ChipVariant::Esp32).sampling;
        config.conv_limit = None;
        assert_eq!(
            config.validate(ChipVariant::Esp32),
            Err(ConfigError::MissingConvLimit {
                chip: ChipVariant::Esp32
            })
        );

        config.conv_limit = Some(300);
        assert_eq!(
            config.validate(ChipVariant::Esp32),
            Err(ConfigError::ConvLimitOutOfRange { limit: 300 })
        );
    }

    #[test]
    fn test_rejects_sub_microsecond_frame() {
        let mut config = MonitorConfig::reference(ChipVariant::Esp32).sampling;
        config.sample_freq_hz = 2_000_000;
        config.conv_limit = Some(1);
        assert_eq!(config.frame_period(ChipVariant::Esp32).as_micros(), 0);
        assert_eq!(
            config.validate(ChipVariant::Esp32),
            Err(ConfigError::FramePeriodTooShort {
                conversions: 1,
                freq_hz: 2_000_000
            })
        );

        // two conversions at 2 MHz fill a frame in exactly 1 us
        config.conv_limit = Some(2);
        assert_eq!(config.validate(ChipVariant::Esp32), Ok(()));
        assert_eq!(
            config.frame_period(ChipVariant::Esp32),
            Duration::from_micros(1)
        );
    }

    #[test]
    fn test_rejects_binding_outside_pattern() {
        let mut config = MonitorConfig::reference(ChipVariant::Esp32S3);
        config
            .channels
            .push(ChannelBinding::new(ChannelId::adc1(7), "spare"))
            .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsampledChannel {
                id: ChannelId::adc1(7)
            })
        );
    }

    #[test]
    fn test_with_channels_replaces_pattern() {
        let config = MonitorConfig::reference(ChipVariant::Esp32S3)
            .with_channels(
                &[
                    (ChannelId::adc1(0), "ct_1"),
                    (ChannelId::adc1(3), "ct_2"),
                    (ChannelId::adc1(6), "ct_3"),
                ],
                Attenuation::Db11,
            )
            .unwrap();

        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.sampling.channel_mask(AdcUnit::Adc1), 0b100_1001);
        assert!(
            config
                .sampling
                .pattern
                .iter()
                .all(|e| e.attenuation == Attenuation::Db11)
        );
    }

    #[test]
    fn test_drain_defaults() {
        let drain = DrainConfig::default();
        assert_eq!(drain.read_timeout(), ReadTimeout::Forever);
        assert_eq!(drain.report_interval(), Duration::from_secs(1));
    }
}
