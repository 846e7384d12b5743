//! Synthetic continuous-mode ADC
//!
//! Produces one frame of conversions per frame period of wall-clock time,
//! cycling through the configured pattern. Each pattern entry carries a
//! 50 Hz sine around mid-scale with its own amplitude and phase. Frames are
//! encoded in the chip's record layout and appended to a store buffer of
//! `max_store_buf_size` bytes; a frame that does not fit is dropped and the
//! next read reports the loss.

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use adcstream_core::config::PatternEntry;
use adcstream_core::{
    DriverError, ErrorClass, MonitorConfig, ReadOutcome, ReadTimeout, RecordLayout,
    SampleDecoder, SampleEncoder, SamplingSource, select_decoder,
};
use adcstream_core::ConfigError;
use log::{debug, info};
use thiserror_no_std::Error;

/// Mains frequency of the synthetic current waveforms
const SIGNAL_HZ: f64 = 50.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
    #[error("Sampling already started")]
    AlreadyStarted,
    #[error("Sampling not started")]
    NotStarted,
}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl DriverError for SimError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }
}

pub struct SyntheticSource {
    layout: RecordLayout,
    pattern: Vec<PatternEntry>,
    sample_freq_hz: u32,
    conversions_per_frame: u32,
    frame_period: Duration,
    store: VecDeque<u8>,
    store_limit: usize,
    /// Extra time each read takes, to provoke overruns
    lag: Duration,
    started: bool,
    lost: bool,
    next_frame_at: Instant,
    slot: usize,
    conversions: u64,
}

impl SyntheticSource {
    pub fn new(config: &MonitorConfig, lag: Duration) -> Result<Self, SimError> {
        config.validate()?;
        let chip = config.chip;
        let sampling = &config.sampling;
        let layout = select_decoder(chip, sampling)?;

        info!(
            "{} synthetic ADC: {} Hz, {} conversions per frame, {} byte records",
            chip.name(),
            sampling.sample_freq_hz,
            sampling.conversions_per_frame(chip),
            layout.record_width()
        );

        Ok(Self {
            layout,
            pattern: sampling.pattern.iter().copied().collect(),
            sample_freq_hz: sampling.sample_freq_hz,
            conversions_per_frame: sampling.conversions_per_frame(chip),
            frame_period: Duration::from_micros(sampling.frame_period(chip).as_micros()),
            store: VecDeque::with_capacity(sampling.max_store_buf_size as usize),
            store_limit: sampling.max_store_buf_size as usize,
            lag,
            started: false,
            lost: false,
            next_frame_at: Instant::now(),
            slot: 0,
            conversions: 0,
        })
    }

    /// Largest raw value the layout can carry
    fn full_scale(&self) -> u16 {
        match self.layout {
            RecordLayout::PackedType2(_) => 0x07FF,
            RecordLayout::Type1(_) | RecordLayout::WideType2(_) => 0x0FFF,
        }
    }

    fn waveform(&self, slot: usize, conversion: u64) -> u16 {
        let full_scale = f64::from(self.full_scale());
        let mid = full_scale / 2.0;
        let amplitude = mid * 0.8 / (slot as f64 + 1.0);
        let phase = slot as f64 * TAU / 3.0;
        let t = conversion as f64 / f64::from(self.sample_freq_hz);

        let value = mid
            + amplitude * (TAU * SIGNAL_HZ * t + phase).sin()
            + amplitude * 0.1 * (TAU * 3.0 * SIGNAL_HZ * t).sin();
        value.round().clamp(0.0, full_scale) as u16
    }

    /// Run the controller up to `now`
    fn produce(&mut self, now: Instant) {
        let width = self.layout.record_width();
        let mut frame = vec![0u8; self.conversions_per_frame as usize * width];

        while self.next_frame_at <= now {
            for record in frame.chunks_exact_mut(width) {
                let entry = self.pattern[self.slot];
                let value = self.waveform(self.slot, self.conversions);
                let written = self.layout.encode_id(entry.channel, value, record);
                debug_assert_eq!(written, Some(width));
                self.slot = (self.slot + 1) % self.pattern.len();
                self.conversions += 1;
            }

            if self.store.len() + frame.len() > self.store_limit {
                if !self.lost {
                    debug!("Store buffer full, dropping frame");
                }
                self.lost = true;
            } else {
                self.store.extend(&frame);
            }
            self.next_frame_at += self.frame_period;
        }
    }

    /// Move whole records from the store into `buf`
    fn take(&mut self, buf: &mut [u8]) -> usize {
        let width = self.layout.record_width();
        let len = self.store.len().min(buf.len()) / width * width;
        for (dst, src) in buf[..len].iter_mut().zip(self.store.drain(..len)) {
            *dst = src;
        }
        len
    }
}

impl SamplingSource for SyntheticSource {
    type Error = SimError;

    async fn start(&mut self) -> Result<(), SimError> {
        if self.started {
            return Err(SimError::AlreadyStarted);
        }
        self.store.clear();
        self.lost = false;
        self.next_frame_at = Instant::now() + self.frame_period;
        self.started = true;
        Ok(())
    }

    async fn read_batch(
        &mut self,
        buf: &mut [u8],
        timeout: ReadTimeout,
    ) -> Result<ReadOutcome, SimError> {
        if !self.started {
            return Err(SimError::NotStarted);
        }

        let deadline = match timeout {
            ReadTimeout::Forever => None,
            ReadTimeout::After(limit) => {
                Some(Instant::now() + Duration::from_micros(limit.as_micros()))
            }
        };

        loop {
            let now = Instant::now();
            self.produce(now);

            let len = self.take(buf);
            if len > 0 {
                std::thread::sleep(self.lag);
                return Ok(ReadOutcome::Data {
                    len,
                    data_lost: std::mem::take(&mut self.lost),
                });
            }

            let wake = match deadline {
                Some(deadline) if deadline <= now => return Ok(ReadOutcome::NoData),
                Some(deadline) => self.next_frame_at.min(deadline),
                None => self.next_frame_at,
            };
            std::thread::sleep(wake.saturating_duration_since(now));
        }
    }

    async fn stop(&mut self) -> Result<(), SimError> {
        if !self.started {
            return Err(SimError::NotStarted);
        }
        self.started = false;
        self.store.clear();
        Ok(())
    }

    fn deinitialize(self) -> Result<(), SimError> {
        info!("Synthetic ADC released after {} conversions", self.conversions);
        Ok(())
    }
}
