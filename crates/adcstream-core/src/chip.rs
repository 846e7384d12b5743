//! Capabilities of the supported ADC digital controllers
//!
//! The values mirror the SoC capability tables of each chip: how many
//! channels each unit has, which output formats and conversion modes the
//! continuous-mode controller accepts, how long its pattern table is and the
//! sample rates it can be driven at.

use core::ops::RangeInclusive;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channel::AdcUnit;
use crate::config::{ConvMode, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChipVariant {
    Esp32,
    Esp32S2,
    Esp32S3,
    Esp32C3,
}

impl ChipVariant {
    pub const ALL: [Self; 4] = [Self::Esp32, Self::Esp32S2, Self::Esp32S3, Self::Esp32C3];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Esp32 => "esp32",
            Self::Esp32S2 => "esp32s2",
            Self::Esp32S3 => "esp32s3",
            Self::Esp32C3 => "esp32c3",
        }
    }

    /// Number of channels on the given unit
    pub const fn channel_count(self, unit: AdcUnit) -> u8 {
        match (self, unit) {
            (Self::Esp32, AdcUnit::Adc1) => 8,
            (Self::Esp32, AdcUnit::Adc2) => 10,
            (Self::Esp32S2 | Self::Esp32S3, _) => 10,
            (Self::Esp32C3, AdcUnit::Adc1) => 5,
            (Self::Esp32C3, AdcUnit::Adc2) => 1,
        }
    }

    /// Whether a raw unit/channel pair from a hardware record is in range
    pub fn is_valid_channel(self, unit: u8, channel: u8) -> bool {
        AdcUnit::from_index(unit).is_some_and(|unit| channel < self.channel_count(unit))
    }

    /// Output format the reference configuration uses on this chip
    pub const fn default_format(self) -> OutputFormat {
        match self {
            Self::Esp32 => OutputFormat::Type1,
            Self::Esp32S2 | Self::Esp32S3 | Self::Esp32C3 => OutputFormat::Type2,
        }
    }

    pub const fn supports_format(self, format: OutputFormat) -> bool {
        matches!(
            (self, format),
            (Self::Esp32, OutputFormat::Type1)
                | (Self::Esp32S2, _)
                | (Self::Esp32S3 | Self::Esp32C3, OutputFormat::Type2)
        )
    }

    pub const fn supports_mode(self, mode: ConvMode) -> bool {
        match self {
            Self::Esp32 => matches!(mode, ConvMode::SingleUnit1),
            Self::Esp32S2 | Self::Esp32S3 => true,
            Self::Esp32C3 => !matches!(mode, ConvMode::BothUnits),
        }
    }

    /// Width in bytes of one conversion result in the given format
    pub const fn record_width(self, format: OutputFormat) -> usize {
        match (self, format) {
            (Self::Esp32S3 | Self::Esp32C3, OutputFormat::Type2) => 4,
            _ => 2,
        }
    }

    /// Number of channel bits in the 32-bit type-2 word
    pub const fn wide_channel_bits(self) -> u8 {
        match self {
            Self::Esp32C3 => 3,
            _ => 4,
        }
    }

    /// Maximum number of entries in the conversion pattern table
    pub const fn max_pattern_len(self) -> usize {
        match self {
            Self::Esp32 => 16,
            Self::Esp32S2 => 32,
            Self::Esp32S3 | Self::Esp32C3 => 24,
        }
    }

    /// Supported sample rates in Hz
    pub const fn sample_freq_range(self) -> RangeInclusive<u32> {
        match self {
            Self::Esp32 => 20_000..=2_000_000,
            Self::Esp32S2 | Self::Esp32S3 | Self::Esp32C3 => 611..=83_333,
        }
    }

    /// The ESP32 controller only runs with a conversion limit enabled
    pub const fn requires_conv_limit(self) -> bool {
        matches!(self, Self::Esp32)
    }
}

impl FromStr for ChipVariant {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|chip| chip.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}
