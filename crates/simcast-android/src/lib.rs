// Android Emulator control: adb/emulator device backend, SDK tool
// discovery and the scrcpy mirror side channel.
pub mod adb;
pub mod mirror;
pub mod sdk;

pub use adb::AdbBackend;
pub use mirror::{MirrorLauncher, MirrorSettings};
pub use sdk::AndroidToolchain;
