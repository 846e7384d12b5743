//! Paced sampling into a bounded byte stream
//!
//! [`sampler_task`] plays the role of the continuous-mode controller: once
//! per frame period it converts `conversions_per_frame` pattern entries,
//! encodes them as 32-bit type-2 records and pushes the frame into
//! [`SAMPLE_STREAM`]. The stream holds `max_store_buf_size` bytes; a frame
//! that does not fit is discarded and the loss is reported with the next
//! read. [`StreamSource`] is the drain-loop side of the stream.
//!
//! Stream capacity and frames are whole records, so every read from the
//! stream ends on a record boundary.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use adcstream_core::config::{MAX_PATTERN_LEN, PatternEntry};
use adcstream_core::decode::WideType2Decoder;
use adcstream_core::{
    ChipVariant, MonitorConfig, ReadOutcome, ReadTimeout, SampleEncoder, SamplingSource,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, with_timeout};
use log::{debug, info, warn};

use crate::error::FirmwareError;
use crate::front_end::FrontEnd;

/// Largest store buffer the stream can back
pub const STORE_BYTES: usize = 1024;
/// Largest frame the sampler assembles
pub const MAX_FRAME_BYTES: usize = 512;

pub static SAMPLE_STREAM: SampleStream = SampleStream::new();

/// Bytes in flight between the sampler task and the drain loop
pub struct SampleStream {
    pipe: Pipe<CriticalSectionRawMutex, STORE_BYTES>,
    /// Configured store size, at most `STORE_BYTES`
    limit: AtomicU32,
    running: AtomicBool,
    lost: AtomicBool,
    fault: AtomicBool,
    started: Signal<CriticalSectionRawMutex, ()>,
}

impl SampleStream {
    pub const fn new() -> Self {
        Self {
            pipe: Pipe::new(),
            limit: AtomicU32::new(STORE_BYTES as u32),
            running: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            fault: AtomicBool::new(false),
            started: Signal::new(),
        }
    }

    fn start(&self) {
        self.pipe.clear();
        self.lost.store(false, Ordering::Relaxed);
        self.fault.store(false, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
        self.started.signal(());
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.pipe.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Append a whole frame, or drop it and flag the loss
    fn push_frame(&self, frame: &[u8]) {
        let limit = self.limit.load(Ordering::Relaxed) as usize;
        let free = self.pipe.free_capacity().saturating_sub(STORE_BYTES - limit);
        if frame.len() > free {
            self.lost.store(true, Ordering::Relaxed);
            return;
        }

        let mut rest = frame;
        while !rest.is_empty() {
            match self.pipe.try_write(rest) {
                Ok(written) => rest = &rest[written..],
                Err(_) => {
                    self.lost.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::Relaxed)
    }

    fn take_fault(&self) -> bool {
        self.fault.swap(false, Ordering::Relaxed)
    }
}

impl Default for SampleStream {
    fn default() -> Self {
        Self::new()
    }
}

/// What the sampler converts each frame, derived from a validated config
#[derive(Debug, Clone)]
pub struct FramePlan {
    pattern: heapless::Vec<PatternEntry, MAX_PATTERN_LEN>,
    encoder: WideType2Decoder,
    conversions: u32,
    period: Duration,
}

impl FramePlan {
    pub fn new(config: &MonitorConfig) -> Result<Self, FirmwareError> {
        if config.chip != ChipVariant::Esp32S3 {
            return Err(FirmwareError::WrongChip(config.chip));
        }
        config.validate()?;

        let sampling = &config.sampling;
        if sampling.max_store_buf_size as usize > STORE_BYTES {
            return Err(FirmwareError::StoreTooLarge {
                size: sampling.max_store_buf_size,
                max: STORE_BYTES,
            });
        }
        if sampling.conv_num_each_intr as usize > MAX_FRAME_BYTES {
            return Err(FirmwareError::FrameTooLarge {
                size: sampling.conv_num_each_intr,
                max: MAX_FRAME_BYTES,
            });
        }
        if let Some(entry) = sampling
            .pattern
            .iter()
            .find(|entry| !FrontEnd::is_wired(entry.channel))
        {
            return Err(FirmwareError::UnwiredChannel(entry.channel));
        }

        SAMPLE_STREAM
            .limit
            .store(sampling.max_store_buf_size, Ordering::Relaxed);

        Ok(Self {
            pattern: sampling.pattern.clone(),
            encoder: WideType2Decoder::new(config.chip),
            conversions: sampling.conversions_per_frame(config.chip),
            period: sampling.frame_period(config.chip),
        })
    }
}

#[embassy_executor::task]
pub async fn sampler_task(mut front_end: FrontEnd, plan: FramePlan) {
    info!(
        "Sampler ready: {} conversions every {} us",
        plan.conversions,
        plan.period.as_micros()
    );

    let mut ticker = Ticker::every(plan.period);
    let mut frame = [0u8; MAX_FRAME_BYTES];
    let mut slot = 0usize;

    loop {
        if !SAMPLE_STREAM.is_running() {
            SAMPLE_STREAM.started.wait().await;
            slot = 0;
            ticker.reset();
        }
        ticker.next().await;

        let mut len = 0;
        let mut failed = 0u32;
        for _ in 0..plan.conversions {
            let entry = plan.pattern[slot];
            slot = (slot + 1) % plan.pattern.len();

            let Some(value) = front_end.convert(entry.channel) else {
                failed += 1;
                continue;
            };
            match plan.encoder.encode_id(entry.channel, value, &mut frame[len..]) {
                Some(written) => len += written,
                None => break,
            }
        }

        if failed > 0 {
            debug!("{} conversions failed this frame", failed);
            SAMPLE_STREAM.fault.store(true, Ordering::Relaxed);
        }
        if SAMPLE_STREAM.is_running() {
            SAMPLE_STREAM.push_frame(&frame[..len]);
        }
    }
}

/// Drain-loop end of [`SAMPLE_STREAM`]
pub struct StreamSource {
    stream: &'static SampleStream,
    started: bool,
}

impl StreamSource {
    pub fn new(stream: &'static SampleStream) -> Self {
        Self {
            stream,
            started: false,
        }
    }
}

impl SamplingSource for StreamSource {
    type Error = FirmwareError;

    async fn start(&mut self) -> Result<(), FirmwareError> {
        if self.started {
            return Err(FirmwareError::AlreadyStarted);
        }
        self.stream.start();
        self.started = true;
        Ok(())
    }

    async fn read_batch(
        &mut self,
        buf: &mut [u8],
        timeout: ReadTimeout,
    ) -> Result<ReadOutcome, FirmwareError> {
        if !self.started {
            return Err(FirmwareError::NotStarted);
        }
        if self.stream.take_fault() {
            return Err(FirmwareError::ConversionFault);
        }

        let read = self.stream.pipe.read(buf);
        let len = match timeout {
            ReadTimeout::Forever => read.await,
            ReadTimeout::After(limit) => match with_timeout(limit, read).await {
                Ok(len) => len,
                Err(_) => return Ok(ReadOutcome::NoData),
            },
        };

        Ok(ReadOutcome::Data {
            len,
            data_lost: self.stream.take_lost(),
        })
    }

    async fn stop(&mut self) -> Result<(), FirmwareError> {
        if !self.started {
            return Err(FirmwareError::NotStarted);
        }
        self.stream.stop();
        self.started = false;
        Ok(())
    }

    fn deinitialize(self) -> Result<(), FirmwareError> {
        if self.started {
            warn!("Releasing the sample stream while sampling is running");
            self.stream.stop();
        }
        Ok(())
    }
}
