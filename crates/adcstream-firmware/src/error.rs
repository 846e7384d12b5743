use adcstream_core::{ChannelId, ChipVariant, ConfigError, DriverError, ErrorClass};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
    #[error("This board carries an ESP32-S3, not {0:?}")]
    WrongChip(ChipVariant),
    #[error("{0} is not wired to an input on this board")]
    UnwiredChannel(ChannelId),
    #[error("Store buffer of {size} bytes exceeds the {max} byte stream")]
    StoreTooLarge { size: u32, max: usize },
    #[error("Frame of {size} bytes exceeds {max} bytes")]
    FrameTooLarge { size: u32, max: usize },
    #[error("Sampling already started")]
    AlreadyStarted,
    #[error("Sampling not started")]
    NotStarted,
    #[error("ADC conversion failed")]
    ConversionFault,
}

impl From<ConfigError> for FirmwareError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl DriverError for FirmwareError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::ConversionFault => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}
