//! ADC1 front end of the board
//!
//! The three current-transformer inputs are wired to GPIO1, GPIO4 and GPIO7,
//! which are ADC1 channels 0, 3 and 6 on the ESP32-S3.

use adcstream_core::config::Attenuation;
use adcstream_core::{AdcUnit, ChannelId};
use esp_hal::Blocking;
use esp_hal::analog::adc::{self, Adc, AdcConfig, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO4, GPIO7};

/// Channels with a physical input on this board
pub const WIRED_CHANNELS: [ChannelId; 3] =
    [ChannelId::adc1(0), ChannelId::adc1(3), ChannelId::adc1(6)];

fn hal_attenuation(attenuation: Attenuation) -> adc::Attenuation {
    match attenuation {
        Attenuation::Db0 => adc::Attenuation::_0dB,
        Attenuation::Db2_5 => adc::Attenuation::_2p5dB,
        Attenuation::Db6 => adc::Attenuation::_6dB,
        Attenuation::Db11 => adc::Attenuation::_11dB,
    }
}

pub struct FrontEnd {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    ct_1: AdcPin<GPIO1<'static>, ADC1<'static>>,
    ct_2: AdcPin<GPIO4<'static>, ADC1<'static>>,
    ct_3: AdcPin<GPIO7<'static>, ADC1<'static>>,
}

impl FrontEnd {
    pub fn new(
        adc1: ADC1<'static>,
        gpio1: GPIO1<'static>,
        gpio4: GPIO4<'static>,
        gpio7: GPIO7<'static>,
        attenuation: Attenuation,
    ) -> Self {
        let attenuation = hal_attenuation(attenuation);
        let mut config = AdcConfig::new();
        let ct_1 = config.enable_pin(gpio1, attenuation);
        let ct_2 = config.enable_pin(gpio4, attenuation);
        let ct_3 = config.enable_pin(gpio7, attenuation);

        Self {
            adc: Adc::new(adc1, config),
            ct_1,
            ct_2,
            ct_3,
        }
    }

    pub fn is_wired(id: ChannelId) -> bool {
        WIRED_CHANNELS.contains(&id)
    }

    /// One blocking conversion. `None` for an unwired channel or a failed read.
    pub fn convert(&mut self, id: ChannelId) -> Option<u16> {
        if id.unit != AdcUnit::Adc1 {
            return None;
        }

        let result = match id.channel {
            0 => nb::block!(self.adc.read_oneshot(&mut self.ct_1)),
            3 => nb::block!(self.adc.read_oneshot(&mut self.ct_2)),
            6 => nb::block!(self.adc.read_oneshot(&mut self.ct_3)),
            _ => return None,
        };
        result.ok()
    }
}
