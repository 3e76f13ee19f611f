//! Device enumeration and lifecycle across both platforms.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use simcast_platform::{BootOutcome, Device, DeviceBackend, OpResult, Platform};

use crate::error::EngineError;

/// Devices by platform, plus the combined list in display order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceGroups {
    pub ios: Vec<Device>,
    pub android: Vec<Device>,
    pub all: Vec<Device>,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    ios: Arc<dyn DeviceBackend>,
    android: Arc<dyn DeviceBackend>,
}

impl DeviceRegistry {
    pub fn new(ios: Arc<dyn DeviceBackend>, android: Arc<dyn DeviceBackend>) -> Self {
        Self { ios, android }
    }

    pub fn backend(&self, platform: Platform) -> &Arc<dyn DeviceBackend> {
        match platform {
            Platform::Ios => &self.ios,
            Platform::Android => &self.android,
        }
    }

    pub async fn list_devices(&self, platform: Platform) -> Vec<Device> {
        self.backend(platform).list_devices().await
    }

    /// Both platforms queried concurrently; iOS first.
    pub async fn list_all(&self) -> Vec<Device> {
        self.list_grouped().await.all
    }

    pub async fn list_grouped(&self) -> DeviceGroups {
        let (ios, android) = tokio::join!(self.ios.list_devices(), self.android.list_devices());
        let all = ios.iter().chain(android.iter()).cloned().collect();
        DeviceGroups { ios, android, all }
    }

    pub async fn find(&self, device_id: &str, platform: Platform) -> Option<Device> {
        self.backend(platform).find_device(device_id).await
    }

    pub async fn boot(
        &self,
        device_id: &str,
        platform: Platform,
        timeout: Duration,
    ) -> Result<BootOutcome, EngineError> {
        let outcome = self.backend(platform).boot(device_id, timeout).await?;
        info!(
            "{} device {} ready (already booted: {})",
            platform, device_id, outcome.already_booted
        );
        Ok(outcome)
    }

    pub async fn shutdown(&self, device_id: &str, platform: Platform) -> OpResult {
        self.backend(platform).shutdown(device_id).await
    }

    pub async fn install_app(&self, device_id: &str, platform: Platform, app_path: &Path) -> OpResult {
        if !app_path.exists() {
            warn!("install on {}: {} does not exist", device_id, app_path.display());
            return OpResult::failed(format!("app not found: {}", app_path.display()));
        }
        self.backend(platform).install_app(device_id, app_path).await
    }

    pub async fn launch_app(
        &self,
        device_id: &str,
        platform: Platform,
        app_id: &str,
        activity: Option<&str>,
    ) -> OpResult {
        self.backend(platform).launch_app(device_id, app_id, activity).await
    }

    pub async fn send_touch(&self, device_id: &str, platform: Platform, x: u32, y: u32) -> OpResult {
        self.backend(platform).send_touch(device_id, x, y).await
    }

    pub async fn send_text(&self, device_id: &str, platform: Platform, text: &str) -> OpResult {
        self.backend(platform).send_text(device_id, text).await
    }

    pub async fn send_key(&self, device_id: &str, platform: Platform, key_code: u32) -> OpResult {
        self.backend(platform).send_key(device_id, key_code).await
    }

    pub async fn screenshot(&self, device_id: &str, platform: Platform, output: &Path) -> OpResult {
        self.backend(platform).screenshot(device_id, output).await
    }
}
