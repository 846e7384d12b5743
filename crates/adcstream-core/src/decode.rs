//! Hardware record layouts
//!
//! The continuous-mode controller writes one little-endian word per
//! conversion. Three layouts exist across the supported chips:
//!
//! | Layout        | Width | Bits (LSB first)                                  |
//! |---------------|-------|---------------------------------------------------|
//! | `Type1`       | 2     | data:12, channel:4                                |
//! | `PackedType2` | 2     | data:11, channel:4, unit:1                        |
//! | `WideType2`   | 4     | data:12, reserved:1, channel:3 or 4, unit:1, rest |
//!
//! The layout is picked once at startup with [`select_decoder`].

use crate::channel::{AdcUnit, ChannelId};
use crate::chip::ChipVariant;
use crate::config::{ConvMode, OutputFormat, SamplingConfig};
use crate::error::ConfigError;
use crate::record::SampleRecord;

/// Turns one hardware word into a [`SampleRecord`]
pub trait SampleDecoder {
    /// Width of one record in bytes
    fn record_width(&self) -> usize;

    /// Decode exactly one record. `None` if `bytes` is not one record wide.
    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord>;
}

/// Writes conversion results in a hardware layout
pub trait SampleEncoder {
    /// Encode one record into the front of `out`, returning the bytes written.
    /// `None` if `out` is too short.
    fn encode(&self, unit: u8, channel: u8, value: u16, out: &mut [u8]) -> Option<usize>;

    fn encode_id(&self, id: ChannelId, value: u16, out: &mut [u8]) -> Option<usize> {
        self.encode(id.unit.index(), id.channel, value, out)
    }
}

impl<D: SampleDecoder + ?Sized> SampleDecoder for &D {
    fn record_width(&self) -> usize {
        (**self).record_width()
    }

    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord> {
        (**self).decode(bytes)
    }
}

fn read_u16(bytes: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// 16-bit word without a unit field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type1Decoder {
    chip: ChipVariant,
    unit: AdcUnit,
}

impl Type1Decoder {
    pub const fn new(chip: ChipVariant, unit: AdcUnit) -> Self {
        Self { chip, unit }
    }
}

impl SampleDecoder for Type1Decoder {
    fn record_width(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord> {
        let word = read_u16(bytes)?;
        let value = word & 0x0FFF;
        let channel = (word >> 12) as u8;
        let unit = self.unit.index();
        Some(SampleRecord::new(
            unit,
            channel,
            value,
            self.chip.is_valid_channel(unit, channel),
        ))
    }
}

impl SampleEncoder for Type1Decoder {
    fn encode(&self, _unit: u8, channel: u8, value: u16, out: &mut [u8]) -> Option<usize> {
        let word = (value & 0x0FFF) | (u16::from(channel & 0x0F) << 12);
        out.get_mut(..2)?.copy_from_slice(&word.to_le_bytes());
        Some(2)
    }
}

/// 16-bit word with an 11-bit result and a unit bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedType2Decoder {
    chip: ChipVariant,
}

impl PackedType2Decoder {
    pub const fn new(chip: ChipVariant) -> Self {
        Self { chip }
    }
}

impl SampleDecoder for PackedType2Decoder {
    fn record_width(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord> {
        let word = read_u16(bytes)?;
        let value = word & 0x07FF;
        let channel = ((word >> 11) & 0x0F) as u8;
        let unit = (word >> 15) as u8;
        Some(SampleRecord::new(
            unit,
            channel,
            value,
            self.chip.is_valid_channel(unit, channel),
        ))
    }
}

impl SampleEncoder for PackedType2Decoder {
    fn encode(&self, unit: u8, channel: u8, value: u16, out: &mut [u8]) -> Option<usize> {
        let word = (value & 0x07FF)
            | (u16::from(channel & 0x0F) << 11)
            | (u16::from(unit & 0x01) << 15);
        out.get_mut(..2)?.copy_from_slice(&word.to_le_bytes());
        Some(2)
    }
}

/// 32-bit word used by the newer controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideType2Decoder {
    chip: ChipVariant,
    channel_bits: u8,
}

impl WideType2Decoder {
    const CHANNEL_SHIFT: u32 = 13;

    pub const fn new(chip: ChipVariant) -> Self {
        Self {
            chip,
            channel_bits: chip.wide_channel_bits(),
        }
    }

    const fn channel_mask(&self) -> u32 {
        (1 << self.channel_bits) - 1
    }

    const fn unit_shift(&self) -> u32 {
        Self::CHANNEL_SHIFT + self.channel_bits as u32
    }
}

impl SampleDecoder for WideType2Decoder {
    fn record_width(&self) -> usize {
        4
    }

    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord> {
        let word = read_u32(bytes)?;
        let value = (word & 0x0FFF) as u16;
        let channel = ((word >> Self::CHANNEL_SHIFT) & self.channel_mask()) as u8;
        let unit = ((word >> self.unit_shift()) & 0x01) as u8;
        Some(SampleRecord::new(
            unit,
            channel,
            value,
            self.chip.is_valid_channel(unit, channel),
        ))
    }
}

impl SampleEncoder for WideType2Decoder {
    fn encode(&self, unit: u8, channel: u8, value: u16, out: &mut [u8]) -> Option<usize> {
        let word = u32::from(value & 0x0FFF)
            | ((u32::from(channel) & self.channel_mask()) << Self::CHANNEL_SHIFT)
            | (u32::from(unit & 0x01) << self.unit_shift());
        out.get_mut(..4)?.copy_from_slice(&word.to_le_bytes());
        Some(4)
    }
}

/// The layout selected for the running chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    Type1(Type1Decoder),
    PackedType2(PackedType2Decoder),
    WideType2(WideType2Decoder),
}

impl SampleDecoder for RecordLayout {
    fn record_width(&self) -> usize {
        match self {
            Self::Type1(d) => d.record_width(),
            Self::PackedType2(d) => d.record_width(),
            Self::WideType2(d) => d.record_width(),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<SampleRecord> {
        match self {
            Self::Type1(d) => d.decode(bytes),
            Self::PackedType2(d) => d.decode(bytes),
            Self::WideType2(d) => d.decode(bytes),
        }
    }
}

impl SampleEncoder for RecordLayout {
    fn encode(&self, unit: u8, channel: u8, value: u16, out: &mut [u8]) -> Option<usize> {
        match self {
            Self::Type1(d) => d.encode(unit, channel, value, out),
            Self::PackedType2(d) => d.encode(unit, channel, value, out),
            Self::WideType2(d) => d.encode(unit, channel, value, out),
        }
    }
}

/// Pick the record layout for a chip and its sampling configuration
///
/// Type-1 records carry no unit, so they are only accepted in single-unit
/// conversion modes where the unit is implied.
pub fn select_decoder(
    chip: ChipVariant,
    config: &SamplingConfig,
) -> Result<RecordLayout, ConfigError> {
    let unsupported = ConfigError::UnsupportedFormat {
        chip,
        format: config.format,
    };

    if !chip.supports_format(config.format) {
        return Err(unsupported);
    }

    match config.format {
        OutputFormat::Type1 => match config.conv_mode {
            ConvMode::SingleUnit1 => Ok(RecordLayout::Type1(Type1Decoder::new(
                chip,
                AdcUnit::Adc1,
            ))),
            ConvMode::SingleUnit2 => Ok(RecordLayout::Type1(Type1Decoder::new(
                chip,
                AdcUnit::Adc2,
            ))),
            ConvMode::BothUnits | ConvMode::AlternateUnits => Err(unsupported),
        },
        OutputFormat::Type2 => match chip.record_width(OutputFormat::Type2) {
            2 => Ok(RecordLayout::PackedType2(PackedType2Decoder::new(chip))),
            _ => Ok(RecordLayout::WideType2(WideType2Decoder::new(chip))),
        },
    }
}
