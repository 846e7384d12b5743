//! Channel identities and the set of monitored channels
//!
//! The [`ChannelSet`] is owned by the drain loop and is the only place
//! accumulator state lives. Membership is fixed when the set is built from
//! the configured [`ChannelBinding`]s.

use core::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::accumulator::{ChannelAccumulator, SAMPLES_PER_CHANNEL};
use crate::error::ConfigError;
use crate::record::SampleRecord;
use crate::report::ChannelReport;

/// Maximum number of channels a [`ChannelSet`] can monitor
pub const MAX_MONITORED_CHANNELS: usize = 8;

/// Maximum length of a channel label in bytes
pub const LABEL_LEN: usize = 16;

pub type Label = heapless::String<LABEL_LEN>;

/// ADC block a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdcUnit {
    Adc1,
    Adc2,
}

impl AdcUnit {
    /// Zero-based index as encoded in hardware records
    pub const fn index(self) -> u8 {
        match self {
            Self::Adc1 => 0,
            Self::Adc2 => 1,
        }
    }

    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Adc1),
            1 => Some(Self::Adc2),
            _ => None,
        }
    }

    /// One-based number used in log output
    pub const fn number(self) -> u8 {
        self.index() + 1
    }
}

/// A physical analog input, identified by unit and channel index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub unit: AdcUnit,
    pub channel: u8,
}

impl ChannelId {
    pub const fn new(unit: AdcUnit, channel: u8) -> Self {
        Self { unit, channel }
    }

    pub const fn adc1(channel: u8) -> Self {
        Self::new(AdcUnit::Adc1, channel)
    }

    pub const fn adc2(channel: u8) -> Self {
        Self::new(AdcUnit::Adc2, channel)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ADC{}_CH{}", self.unit.number(), self.channel)
    }
}

/// A monitored channel and the label its reports carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub id: ChannelId,
    pub label: Label,
}

impl ChannelBinding {
    /// Build a binding, truncating the label to [`LABEL_LEN`] bytes
    pub fn new(id: ChannelId, label: &str) -> Self {
        let mut owned = Label::new();
        for c in label.chars() {
            if owned.push(c).is_err() {
                break;
            }
        }
        Self { id, label: owned }
    }
}

/// What happens to a sample that cannot be stored
///
/// Dropped samples are always counted in the channel report. `Logged`
/// additionally writes one debug line per drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropPolicy {
    #[default]
    Silent,
    Logged,
}

/// Result of dispatching one record into the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Stored in the channel's accumulator
    Recorded,
    /// The channel's accumulator is full for this cycle
    Overflowed,
    /// No accumulator is bound to this channel
    Unmatched,
    /// The record failed its validity check
    Invalid,
}

#[derive(Debug, Clone)]
struct MonitoredChannel<const N: usize> {
    binding: ChannelBinding,
    accumulator: ChannelAccumulator<N>,
    overflowed: u32,
}

/// Fixed mapping from channel ids to their accumulators
#[derive(Debug, Clone)]
pub struct ChannelSet<const N: usize = SAMPLES_PER_CHANNEL> {
    channels: heapless::Vec<MonitoredChannel<N>, MAX_MONITORED_CHANNELS>,
    unmatched: u32,
    overflow_policy: DropPolicy,
    unmatched_policy: DropPolicy,
}

impl<const N: usize> ChannelSet<N> {
    pub fn from_bindings(
        bindings: &[ChannelBinding],
        overflow_policy: DropPolicy,
        unmatched_policy: DropPolicy,
    ) -> Result<Self, ConfigError> {
        let mut channels = heapless::Vec::new();

        for binding in bindings {
            if channels
                .iter()
                .any(|c: &MonitoredChannel<N>| c.binding.id == binding.id)
            {
                return Err(ConfigError::DuplicateBinding { id: binding.id });
            }

            channels
                .push(MonitoredChannel {
                    binding: binding.clone(),
                    accumulator: ChannelAccumulator::new(),
                    overflowed: 0,
                })
                .map_err(|_| ConfigError::TooManyBindings {
                    count: bindings.len(),
                    max: MAX_MONITORED_CHANNELS,
                })?;
        }

        Ok(Self {
            channels,
            unmatched: 0,
            overflow_policy,
            unmatched_policy,
        })
    }

    /// Route a record to the accumulator bound to its channel
    pub fn dispatch(&mut self, record: &SampleRecord) -> Dispatch {
        let Some(id) = record.channel_id().filter(|_| record.valid) else {
            return Dispatch::Invalid;
        };

        let Some(monitored) = self.channels.iter_mut().find(|c| c.binding.id == id) else {
            self.unmatched = self.unmatched.saturating_add(1);
            if self.unmatched_policy == DropPolicy::Logged {
                debug!("Dropping sample from unmonitored channel {}", id);
            }
            return Dispatch::Unmatched;
        };

        if monitored.accumulator.record(record.value) {
            Dispatch::Recorded
        } else {
            monitored.overflowed = monitored.overflowed.saturating_add(1);
            if self.overflow_policy == DropPolicy::Logged {
                debug!(
                    "Dropping sample for {}: {} samples already recorded this cycle",
                    monitored.binding.label,
                    monitored.accumulator.len()
                );
            }
            Dispatch::Overflowed
        }
    }

    /// Reports for the current cycle, one per monitored channel
    pub fn reports(&self) -> impl Iterator<Item = ChannelReport<'_>> + '_ {
        self.channels.iter().map(|c| ChannelReport {
            label: c.binding.label.as_str(),
            id: c.binding.id,
            stats: (!c.accumulator.is_empty()).then(|| c.accumulator.report()),
            recorded: c.accumulator.len(),
            overflowed: c.overflowed,
        })
    }

    /// Start a new cycle on every channel
    pub fn reset_all(&mut self) {
        for c in self.channels.iter_mut() {
            c.accumulator.reset();
            c.overflowed = 0;
        }
        self.unmatched = 0;
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelAccumulator<N>> {
        self.channels
            .iter()
            .find(|c| c.binding.id == id)
            .map(|c| &c.accumulator)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &ChannelBinding> + '_ {
        self.channels.iter().map(|c| &c.binding)
    }

    /// Samples dropped this cycle because no channel was bound to them
    pub fn unmatched(&self) -> u32 {
        self.unmatched
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
