use thiserror::Error;

use simcast_platform::{DeviceError, Platform};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no {platform} device with id {device}")]
    DeviceNotFound { device: String, platform: Platform },
    #[error("{device} is not booted")]
    NotBooted { device: String },
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
