//! Wiring of backends, capture sessions and compositor control.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use simcast_android::{AdbBackend, AndroidToolchain, MirrorLauncher, MirrorSettings};
use simcast_ios::{Compositor, OsaWindowLocator, SimctlBackend};
use simcast_platform::command::CommandRunner;
use simcast_platform::resolver::PathResolver;
use simcast_platform::window::{WindowInfo, WindowLocator};
use simcast_platform::{BootOutcome, Device, OpResult, Platform};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::frame::{FrameBus, FrameEvent};
use crate::process::SystemRunner;
use crate::registry::{DeviceGroups, DeviceRegistry};
use crate::session::{CaptureInfo, CaptureManager};
use crate::source::{AndroidPullSource, FrameSource, IosWindowSource, WindowDiscovery};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStarted {
    /// Key for frame and stream lookups: the UDID on iOS, the serial on Android
    pub session_id: String,
    pub already_running: bool,
}

pub struct Engine {
    config: EngineConfig,
    registry: DeviceRegistry,
    capture: Arc<CaptureManager>,
    compositor: Arc<Compositor>,
    locator: Arc<dyn WindowLocator>,
    mirror: Option<Arc<MirrorLauncher>>,
}

impl Engine {
    /// Production wiring against the host's tools.
    pub fn new(config: EngineConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let resolver = PathResolver::new();

        let toolchain = AndroidToolchain::resolve(config.sdk_root().as_deref(), &resolver);
        let ios = Arc::new(SimctlBackend::new(runner.clone(), config.compositor_process.clone()));
        let android = Arc::new(AdbBackend::new(runner.clone(), toolchain, config.boot_poll_interval()));
        let locator = Arc::new(OsaWindowLocator::new(runner.clone(), config.compositor_process.clone()));

        let mirror = config.mirror.enabled.then(|| {
            let settings = MirrorSettings {
                max_fps: config.mirror.max_fps,
                bit_rate: config.mirror.bit_rate,
            };
            Arc::new(MirrorLauncher::discover(
                runner.clone(),
                &resolver,
                &config.mirror.extra_paths,
                settings,
            ))
        });

        Self::with_parts(config, DeviceRegistry::new(ios, android), locator, mirror)
    }

    pub fn with_parts(
        config: EngineConfig,
        registry: DeviceRegistry,
        locator: Arc<dyn WindowLocator>,
        mirror: Option<Arc<MirrorLauncher>>,
    ) -> Self {
        let capture = Arc::new(CaptureManager::new(FrameBus::new(config.frame_channel_capacity)));
        let compositor = Arc::new(Compositor::new(locator.clone()));
        Self {
            config,
            registry,
            capture,
            compositor,
            locator,
            mirror,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn capture(&self) -> &Arc<CaptureManager> {
        &self.capture
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.capture.subscribe()
    }

    pub async fn list_all(&self) -> Vec<Device> {
        self.registry.list_all().await
    }

    pub async fn list_grouped(&self) -> DeviceGroups {
        self.registry.list_grouped().await
    }

    pub async fn boot(&self, device_id: &str, platform: Platform) -> Result<BootOutcome, EngineError> {
        self.registry
            .boot(device_id, platform, self.config.boot_timeout())
            .await
    }

    pub async fn shutdown(&self, device_id: &str, platform: Platform) -> OpResult {
        self.registry.shutdown(device_id, platform).await
    }

    /// Start capturing a booted device. `fps` overrides the platform default;
    /// without it an Android session lacking a mirror pulls at the fallback rate.
    pub async fn start_capture(
        &self,
        device_id: &str,
        platform: Platform,
        fps: Option<u32>,
    ) -> Result<CaptureStarted, EngineError> {
        let device = self
            .registry
            .find(device_id, platform)
            .await
            .ok_or_else(|| EngineError::DeviceNotFound {
                device: device_id.to_string(),
                platform,
            })?;
        if !device.is_booted {
            return Err(EngineError::NotBooted {
                device: device_id.to_string(),
            });
        }

        if let Err(e) = std::fs::create_dir_all(&self.config.scratch_dir) {
            warn!("failed to create {}: {}", self.config.scratch_dir.display(), e);
        }

        let session_id = device.handle().to_string();
        let backend = self.registry.backend(platform).clone();
        let scratch = self.config.scratch_dir.clone();

        let (source, rate): (Box<dyn FrameSource>, u32) = match platform {
            Platform::Ios => {
                let discovery = WindowDiscovery {
                    attempts: self.config.window_discovery_attempts,
                    interval: self.config.window_discovery_interval(),
                };
                let source = IosWindowSource::new(
                    device.id.clone(),
                    device.name.clone(),
                    backend,
                    self.locator.clone(),
                    self.compositor.clone(),
                    discovery,
                    scratch,
                );
                (Box::new(source), fps.unwrap_or(self.config.ios_fps))
            }
            Platform::Android => {
                let source = AndroidPullSource::new(
                    session_id.clone(),
                    backend,
                    self.mirror.clone(),
                    fps.is_some(),
                    self.config.android_fallback_fps,
                    scratch,
                );
                (Box::new(source), fps.unwrap_or(self.config.android_fps))
            }
        };

        let started = self.capture.start_session(&session_id, platform, rate, source);
        Ok(CaptureStarted {
            session_id,
            already_running: !started,
        })
    }

    pub fn stop_capture(&self, session_id: &str) -> bool {
        self.capture.stop(session_id)
    }

    pub fn current_frame(&self, session_id: &str) -> Option<Bytes> {
        self.capture.current_frame(session_id)
    }

    pub fn capture_info(&self, session_id: &str) -> Option<CaptureInfo> {
        self.capture.info(session_id)
    }

    pub async fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        self.locator.list_windows().await
    }

    /// Bring a parked simulator window back on screen.
    pub async fn restore_compositor_window(&self) -> Result<bool> {
        self.compositor.restore().await
    }

    /// Stop every session, restore the simulator window and remove the
    /// scratch directory.
    pub async fn close(&self) {
        self.capture.close_all();

        match self.compositor.restore().await {
            Ok(true) => info!("simulator window restored"),
            Ok(false) => {}
            Err(e) => warn!("failed to restore simulator window: {:#}", e),
        }

        remove_scratch(&self.config.scratch_dir).await;
    }
}

async fn remove_scratch(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!("removed scratch directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", dir.display(), e),
    }
}
