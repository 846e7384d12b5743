//! ESP32-S3 firmware-specific modules for adcstream
//!
//! This crate contains the hardware-specific side of sampling that cannot
//! compile on desktop targets: the ADC front end wired to the board's
//! current-transformer inputs, the producer task that paces conversions into
//! frames, the sampling source the drain loop reads from and the embassy
//! backed timebase.

#![no_std]

pub mod error;
pub mod front_end;
pub mod sampler;
pub mod timebase;

pub use error::FirmwareError;
pub use front_end::FrontEnd;
pub use sampler::{FramePlan, SAMPLE_STREAM, SampleStream, StreamSource, sampler_task};
pub use timebase::EmbassyTimebase;
