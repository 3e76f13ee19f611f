// Shared device model and the seams between the engine and the host tools.

pub mod command;
pub mod device;
pub mod error;
pub mod resolver;
pub mod window;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use device::{BootOutcome, Device, DeviceBackend, DeviceState, OpResult, Platform};
pub use error::DeviceError;
