//! The drain loop
//!
//! [`DrainLoop`] is the single consumer of a [`SamplingSource`]. Every
//! iteration it waits for a batch of raw records, decodes and validates each
//! record, dispatches it into the [`ChannelSet`] and, once per report
//! interval of clock time, emits a throughput report and one report per
//! channel before resetting the accumulators.
//!
//! ## States
//!
//! - `Running`: the last read returned data
//! - `IdleTimeout`: the last read timed out; the loop paused before retrying
//! - `Recovering`: the last read failed with a transient error; the loop
//!   backed off before retrying
//! - `Terminating`: shutdown was requested; the source is being stopped
//!
//! Time is taken from a [`Timebase`] rather than a global clock so the loop
//! can be driven deterministically in tests.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::accumulator::SAMPLES_PER_CHANNEL;
use crate::backoff::Backoff;
use crate::channel::{ChannelSet, Dispatch};
use crate::config::DrainConfig;
use crate::decode::SampleDecoder;
use crate::error::{ConfigError, DrainError};
use crate::report::{ReportSink, ThroughputReport};
use crate::source::{DriverError, ErrorClass, ReadOutcome, SamplingSource};

/// Monotonic time source
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A clock that can also pause the current task
pub trait Timebase: Clock + DelayNs {}

impl<T: Clock + DelayNs> Timebase for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Running,
    IdleTimeout,
    Recovering,
    Terminating,
}

/// Totals since sampling started
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub batches: u64,
    pub samples: u64,
    pub bytes: u64,
    pub invalid: u64,
    pub unmatched: u64,
    pub overflowed: u64,
    pub data_loss_events: u32,
    pub idle_timeouts: u32,
    pub transient_errors: u32,
    pub reports: u32,
}

/// Counters of the current reporting window
#[derive(Debug, Default, Clone, Copy)]
struct Window {
    samples: u32,
    bytes: u32,
    invalid: u32,
}

pub struct DrainLoop<'b, S, D, T, R, const N: usize = SAMPLES_PER_CHANNEL> {
    source: S,
    decoder: D,
    channels: ChannelSet<N>,
    config: DrainConfig,
    timebase: T,
    sink: R,
    buffer: &'b mut [u8],
    backoff: Backoff,
    state: DrainState,
    window_start: Instant,
    window: Window,
    summary: DrainSummary,
}

impl<'b, S, D, T, R, const N: usize> DrainLoop<'b, S, D, T, R, N>
where
    S: SamplingSource,
    D: SampleDecoder,
    T: Timebase,
    R: ReportSink,
{
    /// Assemble a loop around an initialized source.
    ///
    /// `buffer` receives each batch and must hold at least one record.
    pub fn new(
        source: S,
        decoder: D,
        channels: ChannelSet<N>,
        config: DrainConfig,
        timebase: T,
        sink: R,
        buffer: &'b mut [u8],
    ) -> Result<Self, ConfigError> {
        let record_width = decoder.record_width();
        if buffer.len() < record_width {
            return Err(ConfigError::BufferTooSmall {
                len: buffer.len(),
                record_width,
            });
        }

        let window_start = timebase.now();
        Ok(Self {
            source,
            decoder,
            channels,
            backoff: Backoff::new(config.backoff),
            config,
            timebase,
            sink,
            buffer,
            state: DrainState::Running,
            window_start,
            window: Window::default(),
            summary: DrainSummary::default(),
        })
    }

    /// Start the source and open the first reporting window
    pub async fn start(&mut self) -> Result<(), DrainError<S::Error>> {
        self.source.start().await.map_err(DrainError::Start)?;
        info!(
            "Sampling started, monitoring {} channels, reporting every {} ms",
            self.channels.len(),
            self.config.report_interval_ms
        );

        self.state = DrainState::Running;
        self.window_start = self.timebase.now();
        self.window = Window::default();
        Ok(())
    }

    /// One iteration: read, dispatch, maybe report, yield.
    pub async fn step(&mut self) -> Result<DrainState, DrainError<S::Error>> {
        let timeout = self.config.read_timeout();

        match self.source.read_batch(self.buffer, timeout).await {
            Ok(ReadOutcome::Data { len, data_lost }) => {
                self.backoff.reset();
                if data_lost {
                    warn!("Conversion results lost, the sampler is outpacing the drain loop");
                    self.summary.data_loss_events += 1;
                }
                self.dispatch_batch(len);
                self.state = DrainState::Running;
            }
            Ok(ReadOutcome::NoData) => {
                warn!("No data, increase timeout or reduce conv_num_each_intr");
                self.summary.idle_timeouts += 1;
                self.state = DrainState::IdleTimeout;
                self.timebase.delay_ms(self.config.idle_pause_ms).await;
            }
            Err(e) => self.recover(e).await?,
        }

        self.poll_report();
        self.timebase.delay_ms(self.config.yield_ms).await;

        Ok(self.state)
    }

    /// Drain until `shutdown` is signaled, then stop and release the source.
    ///
    /// On an unrecoverable error the source is stopped on a best-effort basis
    /// and the error is returned.
    pub async fn run<M: RawMutex>(
        mut self,
        shutdown: &Signal<M, ()>,
    ) -> Result<DrainSummary, DrainError<S::Error>> {
        self.start().await?;

        while !shutdown.signaled() {
            if let Err(e) = self.step().await {
                error!("Drain loop stopping: {}", e);
                if let Err(stop_err) = self.source.stop().await {
                    warn!("Failed to stop sampling: {:?}", stop_err);
                }
                return Err(e);
            }
        }

        self.state = DrainState::Terminating;
        info!("Shutdown requested, stopping sampling");

        self.source.stop().await.map_err(DrainError::Stop)?;
        let summary = self.summary;
        self.source.deinitialize().map_err(DrainError::Stop)?;

        info!(
            "Sampling stopped after {} samples in {} batches",
            summary.samples, summary.batches
        );
        Ok(summary)
    }

    async fn recover(&mut self, error: S::Error) -> Result<(), DrainError<S::Error>> {
        if error.class() == ErrorClass::Fatal {
            return Err(DrainError::Source(error));
        }

        let Some(delay) = self.backoff.next_delay() else {
            return Err(DrainError::RetriesExhausted {
                attempts: self.backoff.failures(),
                last: error,
            });
        };

        warn!(
            "Sampling error {:?}, retrying in {} ms (attempt {})",
            error,
            delay.as_millis(),
            self.backoff.failures()
        );
        self.summary.transient_errors += 1;
        self.state = DrainState::Recovering;
        let delay_ms = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.timebase.delay_ms(delay_ms).await;
        Ok(())
    }

    fn dispatch_batch(&mut self, len: usize) {
        let width = self.decoder.record_width();
        let batch = &self.buffer[..len.min(self.buffer.len())];
        let records = batch.chunks_exact(width);

        let trailing = records.remainder().len();
        if trailing != 0 {
            warn!("Ignoring {} bytes of a partial record", trailing);
        }

        let mut samples = 0u32;
        let mut invalid = 0u32;
        for (index, bytes) in records.enumerate() {
            samples += 1;
            let Some(record) = self.decoder.decode(bytes) else {
                continue;
            };

            if !record.valid {
                debug!(
                    "Invalid data: unit {} channel {}",
                    record.unit + 1,
                    record.channel
                );
                invalid += 1;
                continue;
            }

            if index < self.config.debug_prefix_records {
                debug!(
                    "Unit: {}, Channel: {}, Value: {}",
                    record.unit + 1,
                    record.channel,
                    record.value
                );
            }

            match self.channels.dispatch(&record) {
                Dispatch::Unmatched => self.summary.unmatched += 1,
                Dispatch::Overflowed => self.summary.overflowed += 1,
                Dispatch::Recorded | Dispatch::Invalid => {}
            }
        }

        let bytes = samples * width as u32;
        self.window.samples = self.window.samples.saturating_add(samples);
        self.window.bytes = self.window.bytes.saturating_add(bytes);
        self.window.invalid = self.window.invalid.saturating_add(invalid);

        self.summary.batches += 1;
        self.summary.samples += u64::from(samples);
        self.summary.bytes += u64::from(bytes);
        self.summary.invalid += u64::from(invalid);
    }

    fn poll_report(&mut self) {
        let now = self.timebase.now();
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.config.report_interval() {
            return;
        }

        self.sink.throughput(&ThroughputReport {
            samples: self.window.samples,
            bytes: self.window.bytes,
            invalid: self.window.invalid,
            elapsed,
        });
        for report in self.channels.reports() {
            self.sink.channel(&report);
        }
        if self.channels.unmatched() > 0 {
            debug!(
                "{} samples from unmonitored channels this cycle",
                self.channels.unmatched()
            );
        }

        self.channels.reset_all();
        self.window = Window::default();
        self.window_start = now;
        self.summary.reports += 1;
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn summary(&self) -> &DrainSummary {
        &self.summary
    }

    pub fn channels(&self) -> &ChannelSet<N> {
        &self.channels
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use std::collections::VecDeque;

    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_time::Duration;

    use super::*;
    use crate::accumulator::ChannelStats;
    use crate::channel::{AdcUnit, ChannelBinding, ChannelId, DropPolicy};
    use crate::chip::ChipVariant;
    use crate::decode::{RecordLayout, SampleEncoder, Type1Decoder};
    use crate::report::ChannelReport;
    use crate::source::ReadTimeout;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum MockError {
        Busy,
        Broken,
    }

    impl DriverError for MockError {
        fn class(&self) -> ErrorClass {
            match self {
                Self::Busy => ErrorClass::Transient,
                Self::Broken => ErrorClass::Fatal,
            }
        }
    }

    enum Script {
        Batch(Vec<u8>, bool),
        Timeout,
        Fail(MockError),
    }

    #[derive(Default)]
    struct ScriptedSource {
        script: VecDeque<Script>,
        started: bool,
        stopped: bool,
    }

    impl SamplingSource for ScriptedSource {
        type Error = MockError;

        async fn start(&mut self) -> Result<(), MockError> {
            self.started = true;
            Ok(())
        }

        async fn read_batch(
            &mut self,
            buf: &mut [u8],
            _timeout: ReadTimeout,
        ) -> Result<ReadOutcome, MockError> {
            match self.script.pop_front() {
                Some(Script::Batch(bytes, data_lost)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(ReadOutcome::Data {
                        len: bytes.len(),
                        data_lost,
                    })
                }
                Some(Script::Fail(e)) => Err(e),
                Some(Script::Timeout) | None => Ok(ReadOutcome::NoData),
            }
        }

        async fn stop(&mut self) -> Result<(), MockError> {
            self.stopped = true;
            Ok(())
        }

        fn deinitialize(self) -> Result<(), MockError> {
            Ok(())
        }
    }

    /// Clock that only moves when something waits on it
    #[derive(Default)]
    struct ManualTime {
        now_us: Cell<u64>,
        waited_ms: Vec<u32>,
    }

    impl Clock for ManualTime {
        fn now(&self) -> Instant {
            Instant::from_micros(self.now_us.get())
        }
    }

    impl DelayNs for ManualTime {
        async fn delay_ns(&mut self, ns: u32) {
            self.now_us.set(self.now_us.get() + u64::from(ns / 1000));
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.waited_ms.push(ms);
            self.now_us.set(self.now_us.get() + u64::from(ms) * 1000);
        }
    }

    #[derive(Default)]
    struct Collected {
        throughput: Vec<ThroughputReport>,
        channels: Vec<(String, Option<ChannelStats>, u32)>,
    }

    impl ReportSink for Collected {
        fn throughput(&mut self, report: &ThroughputReport) {
            self.throughput.push(*report);
        }

        fn channel(&mut self, report: &ChannelReport<'_>) {
            self.channels
                .push((report.label.into(), report.stats, report.overflowed));
        }
    }

    const LAYOUT: RecordLayout =
        RecordLayout::Type1(Type1Decoder::new(ChipVariant::Esp32, AdcUnit::Adc1));

    fn batch(records: &[(u8, u16)]) -> Vec<u8> {
        let mut bytes = vec![0u8; records.len() * 2];
        for (chunk, &(channel, value)) in bytes.chunks_exact_mut(2).zip(records) {
            LAYOUT.encode(0, channel, value, chunk).unwrap();
        }
        bytes
    }

    fn drain_config() -> DrainConfig {
        DrainConfig {
            report_interval_ms: 1000,
            idle_pause_ms: 1000,
            yield_ms: 1,
            ..DrainConfig::default()
        }
    }

    fn channels<const N: usize>() -> ChannelSet<N> {
        ChannelSet::from_bindings(
            &[
                ChannelBinding::new(ChannelId::adc1(0), "ct_1"),
                ChannelBinding::new(ChannelId::adc1(3), "ct_2"),
                ChannelBinding::new(ChannelId::adc1(6), "ct_3"),
            ],
            DropPolicy::Silent,
            DropPolicy::Silent,
        )
        .unwrap()
    }

    fn drain_loop<'b, const N: usize>(
        script: Vec<Script>,
        config: DrainConfig,
        buffer: &'b mut [u8],
    ) -> DrainLoop<'b, ScriptedSource, RecordLayout, ManualTime, Collected, N> {
        let source = ScriptedSource {
            script: script.into(),
            ..ScriptedSource::default()
        };
        DrainLoop::new(
            source,
            LAYOUT,
            channels(),
            config,
            ManualTime::default(),
            Collected::default(),
            buffer,
        )
        .unwrap()
    }

    #[test]
    fn test_batch_is_dispatched_by_channel() {
        let mut buffer = [0u8; 512];
        let script = vec![Script::Batch(
            batch(&[(0, 10), (3, 700), (0, 5000), (6, 42), (0, 3), (3, 650)]),
            false,
        )];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            assert_eq!(drain.step().await.unwrap(), DrainState::Running);
        });

        let ct1 = drain.channels().get(ChannelId::adc1(0)).unwrap();
        assert_eq!(
            ct1.report(),
            ChannelStats {
                min: 3,
                max: 5000,
                range: 4997
            }
        );
        assert_eq!(ct1.samples(), &[10, 5000, 3]);
        assert_eq!(drain.channels().get(ChannelId::adc1(3)).unwrap().len(), 2);
        assert_eq!(drain.summary().samples, 6);
        assert_eq!(drain.summary().bytes, 12);
        assert!(drain.sink().throughput.is_empty());
    }

    #[test]
    fn test_unmatched_and_invalid_records_are_skipped() {
        let mut buffer = [0u8; 64];
        // channel 5 is not monitored, channel 9 does not exist on the ESP32
        let script = vec![Script::Batch(batch(&[(5, 100), (9, 200), (6, 300)]), false)];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            drain.step().await.unwrap();
        });

        assert_eq!(drain.summary().unmatched, 1);
        assert_eq!(drain.summary().invalid, 1);
        assert!(drain.channels().get(ChannelId::adc1(0)).unwrap().is_empty());
        assert!(drain.channels().get(ChannelId::adc1(3)).unwrap().is_empty());
        assert_eq!(
            drain.channels().get(ChannelId::adc1(6)).unwrap().samples(),
            &[300]
        );
    }

    #[test]
    fn test_timeout_pauses_and_continues() {
        let mut buffer = [0u8; 64];
        let script = vec![
            Script::Timeout,
            Script::Batch(batch(&[(0, 1)]), false),
        ];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            assert_eq!(drain.step().await.unwrap(), DrainState::IdleTimeout);
            assert_eq!(drain.step().await.unwrap(), DrainState::Running);
        });

        assert_eq!(drain.summary().idle_timeouts, 1);
        assert_eq!(drain.timebase.waited_ms, [1000, 1, 1]);
        assert_eq!(drain.channels().get(ChannelId::adc1(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_report_fires_on_interval_and_resets() {
        let mut buffer = [0u8; 64];
        let config = DrainConfig {
            report_interval_ms: 2,
            ..drain_config()
        };
        let script = vec![
            Script::Batch(batch(&[(0, 100), (3, 10)]), false),
            Script::Batch(batch(&[(0, 300)]), false),
            Script::Batch(batch(&[(0, 200)]), false),
            Script::Batch(batch(&[(0, 50)]), false),
        ];
        let mut drain = drain_loop::<256>(script, config, &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            // each step yields 1 ms, so the third step reaches the boundary
            for _ in 0..4 {
                drain.step().await.unwrap();
            }
        });

        let sink = drain.sink();
        assert_eq!(sink.throughput.len(), 1);
        assert_eq!(sink.throughput[0].samples, 4);
        assert_eq!(sink.throughput[0].bytes, 8);
        assert_eq!(sink.throughput[0].elapsed, Duration::from_millis(2));
        assert_eq!(
            sink.channels,
            [
                (
                    String::from("ct_1"),
                    Some(ChannelStats {
                        min: 100,
                        max: 300,
                        range: 200
                    }),
                    0
                ),
                (
                    String::from("ct_2"),
                    Some(ChannelStats {
                        min: 10,
                        max: 10,
                        range: 0
                    }),
                    0
                ),
                (String::from("ct_3"), None, 0),
            ]
        );

        // only the sample after the boundary is left
        let ct1 = drain.channels().get(ChannelId::adc1(0)).unwrap();
        assert_eq!(ct1.samples(), &[50]);
        assert_eq!(drain.summary().reports, 1);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut buffer = [0u8; 64];
        let config = DrainConfig {
            report_interval_ms: 0,
            ..drain_config()
        };
        let script = vec![Script::Batch(batch(&[(3, 1), (3, 2), (3, 3), (3, 0)]), false)];
        let mut drain = drain_loop::<2>(script, config, &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            drain.step().await.unwrap();
        });

        assert_eq!(drain.summary().overflowed, 2);
        let (_, stats, overflowed) = &drain.sink().channels[1];
        assert_eq!(
            *stats,
            Some(ChannelStats {
                min: 1,
                max: 2,
                range: 1
            })
        );
        assert_eq!(*overflowed, 2);
    }

    #[test]
    fn test_data_loss_is_counted_and_consumed() {
        let mut buffer = [0u8; 64];
        let script = vec![Script::Batch(batch(&[(0, 7)]), true)];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            assert_eq!(drain.step().await.unwrap(), DrainState::Running);
        });

        assert_eq!(drain.summary().data_loss_events, 1);
        assert_eq!(drain.channels().get(ChannelId::adc1(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_partial_record_is_ignored() {
        let mut buffer = [0u8; 64];
        let mut bytes = batch(&[(0, 11)]);
        bytes.push(0xFF);
        let script = vec![Script::Batch(bytes, false)];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            drain.step().await.unwrap();
        });

        assert_eq!(drain.summary().samples, 1);
        assert_eq!(drain.summary().bytes, 2);
    }

    #[test]
    fn test_transient_errors_back_off() {
        let mut buffer = [0u8; 64];
        let script = vec![
            Script::Fail(MockError::Busy),
            Script::Fail(MockError::Busy),
            Script::Batch(batch(&[(0, 1)]), false),
            Script::Fail(MockError::Busy),
        ];
        let mut drain = drain_loop::<256>(script, drain_config(), &mut buffer);

        block_on(async {
            drain.start().await.unwrap();
            assert_eq!(drain.step().await.unwrap(), DrainState::Recovering);
            assert_eq!(drain.step().await.unwrap(), DrainState::Recovering);
            assert_eq!(drain.step().await.unwrap(), DrainState::Running);
            assert_eq!(drain.step().await.unwrap(), DrainState::Recovering);
        });

        // backoff doubles, then restarts after the successful read
        assert_eq!(drain.timebase.waited_ms, [10, 1, 20, 1, 1, 10, 1]);
        assert_eq!(drain.summary().transient_errors, 3);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let mut buffer = [0u8; 64];
        let mut config = drain_config();
        config.backoff.max_consecutive_failures = 2;
        let script = (0..3).map(|_| Script::Fail(MockError::Busy)).collect();
        let mut drain = drain_loop::<256>(script, config, &mut buffer);

        let result = block_on(async {
            drain.start().await.unwrap();
            drain.step().await.unwrap();
            drain.step().await.unwrap();
            drain.step().await
        });

        assert!(matches!(
            result,
            Err(DrainError::RetriesExhausted {
                attempts: 2,
                last: MockError::Busy
            })
        ));
    }

    #[test]
    fn test_fatal_error_stops_run() {
        let mut buffer = [0u8; 64];
        let script = vec![
            Script::Batch(batch(&[(0, 1)]), false),
            Script::Fail(MockError::Broken),
        ];
        let drain = drain_loop::<256>(script, drain_config(), &mut buffer);
        let shutdown = Signal::<NoopRawMutex, ()>::new();

        let result = block_on(drain.run(&shutdown));

        assert!(matches!(result, Err(DrainError::Source(MockError::Broken))));
    }

    #[test]
    fn test_shutdown_stops_source() {
        let mut buffer = [0u8; 64];
        let drain = drain_loop::<256>(Vec::new(), drain_config(), &mut buffer);
        let shutdown = Signal::<NoopRawMutex, ()>::new();
        shutdown.signal(());

        let summary = block_on(drain.run(&shutdown)).unwrap();

        assert_eq!(summary, DrainSummary::default());
    }

    #[test]
    fn test_buffer_must_hold_a_record() {
        let mut buffer = [0u8; 1];
        let result = DrainLoop::<_, _, _, _, 256>::new(
            ScriptedSource::default(),
            LAYOUT,
            channels(),
            drain_config(),
            ManualTime::default(),
            Collected::default(),
            &mut buffer,
        );

        assert!(matches!(
            result,
            Err(ConfigError::BufferTooSmall {
                len: 1,
                record_width: 2
            })
        ));
    }
}
