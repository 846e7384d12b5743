//! Boundary with the sampling subsystem
//!
//! A [`SamplingSource`] is the DMA-backed producer of raw conversion bytes.
//! Concrete sources validate their [`SamplingConfig`](crate::config::SamplingConfig)
//! when they are constructed; that constructor is the "initialize" step of
//! the driver lifecycle. Everything after that goes through this trait.

use core::fmt::Debug;
use core::future::Future;

use embassy_time::Duration;

/// How long a read may block waiting for data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    Forever,
    After(Duration),
}

/// Outcome of a successful read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `len` bytes were written to the buffer. `data_lost` is set when the
    /// producer had to discard conversions since the previous read because
    /// its store buffer was full.
    Data { len: usize, data_lost: bool },
    /// Nothing arrived before the timeout elapsed
    NoData,
}

/// How the drain loop should react to a driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a pause
    Transient,
    /// Sampling cannot continue
    Fatal,
}

pub trait DriverError: Debug {
    fn class(&self) -> ErrorClass;
}

/// A continuously sampling ADC
pub trait SamplingSource {
    type Error: DriverError;

    /// Begin continuous conversions.
    fn start(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Wait for the next batch of raw records and copy it into `buf`.
    ///
    /// Implementations only ever return whole records.
    fn read_batch(
        &mut self,
        buf: &mut [u8],
        timeout: ReadTimeout,
    ) -> impl Future<Output = Result<ReadOutcome, Self::Error>>;

    /// Stop conversions. The source can be started again.
    fn stop(&mut self) -> impl Future<Output = Result<(), Self::Error>>;

    /// Release the underlying hardware.
    fn deinitialize(self) -> Result<(), Self::Error>
    where
        Self: Sized;
}
