use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ios, Platform::Android];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Shutdown,
    Booting,
    Booted,
}

impl DeviceState {
    /// Map a simctl state string. Transitional states other than booting
    /// ("Shutting Down", "Creating") are reported as shut down.
    pub fn from_simctl(state: &str) -> Self {
        match state {
            "Booted" => DeviceState::Booted,
            "Booting" => DeviceState::Booting,
            _ => DeviceState::Shutdown,
        }
    }
}

/// A controllable simulator or emulator, discovered fresh on every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// UDID on iOS, AVD name on Android
    pub id: String,
    pub platform: Platform,
    pub name: String,
    pub runtime_label: String,
    pub state: DeviceState,
    pub is_booted: bool,
    /// Bridge serial (e.g. `emulator-5554`), Android only and only once booted
    pub serial: Option<String>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        platform: Platform,
        name: impl Into<String>,
        runtime_label: impl Into<String>,
        state: DeviceState,
    ) -> Self {
        Self {
            id: id.into(),
            platform,
            name: name.into(),
            runtime_label: runtime_label.into(),
            state,
            is_booted: state == DeviceState::Booted,
            serial: None,
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    /// The handle external tools address this device by.
    pub fn handle(&self) -> &str {
        match self.platform {
            Platform::Ios => &self.id,
            Platform::Android => self.serial.as_deref().unwrap_or(&self.id),
        }
    }
}

/// Result of a one-shot lifecycle operation, as reported to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl<E: fmt::Display> From<Result<(), E>> for OpResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => OpResult::ok(),
            Err(e) => OpResult::failed(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootOutcome {
    pub already_booted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

/// One platform's device control surface.
///
/// Listing never fails: a broken toolchain yields an empty list. One-shot
/// operations make a single attempt and report failure as a value.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Enumerate devices in discovery order
    async fn list_devices(&self) -> Vec<Device>;

    /// Fresh lookup by id (or serial where the platform has one)
    async fn find_device(&self, device_id: &str) -> Option<Device> {
        self.list_devices()
            .await
            .into_iter()
            .find(|d| d.id == device_id || d.serial.as_deref() == Some(device_id))
    }

    async fn boot(&self, device_id: &str, timeout: Duration) -> Result<BootOutcome, DeviceError>;

    async fn shutdown(&self, device_id: &str) -> OpResult;

    async fn install_app(&self, device_id: &str, app_path: &Path) -> OpResult;

    async fn launch_app(&self, device_id: &str, app_id: &str, activity: Option<&str>) -> OpResult;

    async fn send_touch(&self, device_id: &str, x: u32, y: u32) -> OpResult;

    async fn send_text(&self, device_id: &str, text: &str) -> OpResult;

    async fn send_key(&self, device_id: &str, key_code: u32) -> OpResult;

    /// Write a full-device screenshot to `output`
    async fn screenshot(&self, device_id: &str, output: &Path) -> OpResult;

    /// Grab one full-device frame as encoded image bytes.
    /// `scratch` may be used as an intermediate file.
    async fn capture_frame(&self, handle: &str, scratch: &Path) -> anyhow::Result<Vec<u8>>;
}
