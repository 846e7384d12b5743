//! A single hardware-delivered conversion result

use crate::channel::{AdcUnit, ChannelId};

/// One decoded conversion result
///
/// `unit` and `channel` are the raw indices from the hardware word, which is
/// why they are kept as plain integers: an out-of-range unit cannot be turned
/// into an [`AdcUnit`]. `valid` is set by the decoder from the chip's declared
/// channel ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub unit: u8,
    pub channel: u8,
    pub value: u16,
    pub valid: bool,
}

impl SampleRecord {
    pub const fn new(unit: u8, channel: u8, value: u16, valid: bool) -> Self {
        Self {
            unit,
            channel,
            value,
            valid,
        }
    }

    /// Channel this record belongs to, if its unit index is known
    pub fn channel_id(&self) -> Option<ChannelId> {
        AdcUnit::from_index(self.unit).map(|unit| ChannelId::new(unit, self.channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_from_record() {
        let record = SampleRecord::new(1, 4, 100, true);
        assert_eq!(record.channel_id(), Some(ChannelId::adc2(4)));
    }

    #[test]
    fn test_unknown_unit_has_no_channel_id() {
        let record = SampleRecord::new(3, 0, 100, false);
        assert_eq!(record.channel_id(), None);
    }
}
