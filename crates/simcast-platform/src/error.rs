use std::time::Duration;

use thiserror::Error;

use crate::device::Platform;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{program} failed: {message}")]
    CommandFailed { program: String, message: String },
    #[error("required tool not available: {tool}")]
    ToolUnavailable { tool: String },
    #[error("device not found: {device}")]
    DeviceNotFound { device: String },
    #[error("device is not running: {device}")]
    NotRunning { device: String },
    #[error("boot timed out for {device} after {}s", waited.as_secs())]
    BootTimeout { device: String, waited: Duration },
    #[error("{operation} is not supported on {platform}")]
    Unsupported { operation: String, platform: Platform },
}

impl DeviceError {
    pub fn command(program: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            program: program.into(),
            message: err.to_string(),
        }
    }

    pub fn unsupported(operation: impl Into<String>, platform: Platform) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            platform,
        }
    }

    /// True for the timeout case, so callers can retry later instead of
    /// treating the boot command as broken.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BootTimeout { .. })
    }
}
