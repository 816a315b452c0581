//! Crate-level error type.

use crate::device::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, Error>;
