//! Per-platform frame acquisition strategies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use simcast_android::MirrorLauncher;
use simcast_ios::{window, Compositor};
use simcast_platform::window::{WindowHandle, WindowLocator};
use simcast_platform::DeviceBackend;

use crate::session::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStrategy {
    /// Compositor window capture by window id
    Window,
    /// Full-device screenshot through the platform tool
    DeviceScreenshot,
    /// Mirror process for display, frames pulled over the bridge
    MirrorWithPull,
    /// Frames pulled over the bridge only
    Pull,
}

/// One session's way of getting frames. `prepare` runs once while the
/// session is starting; `acquire` runs on every tick.
#[async_trait]
pub trait FrameSource: Send {
    fn strategy(&self) -> CaptureStrategy;

    async fn prepare(&mut self, ctx: &SessionContext);

    /// One attempt. `Ok(None)` means nothing this tick.
    async fn acquire(&mut self, ctx: &SessionContext) -> Result<Option<Vec<u8>>>;
}

pub struct WindowDiscovery {
    pub attempts: u32,
    pub interval: Duration,
}

/// iOS: capture the Simulator window, falling back to `simctl io screenshot`.
pub struct IosWindowSource {
    udid: String,
    name_hint: String,
    backend: Arc<dyn DeviceBackend>,
    locator: Arc<dyn WindowLocator>,
    compositor: Arc<Compositor>,
    discovery: WindowDiscovery,
    window: Option<WindowHandle>,
    window_scratch: PathBuf,
    screenshot_scratch: PathBuf,
}

impl IosWindowSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        udid: impl Into<String>,
        name_hint: impl Into<String>,
        backend: Arc<dyn DeviceBackend>,
        locator: Arc<dyn WindowLocator>,
        compositor: Arc<Compositor>,
        discovery: WindowDiscovery,
        scratch_dir: PathBuf,
    ) -> Self {
        let udid = udid.into();
        Self {
            window_scratch: window::capture_path(&scratch_dir, &udid),
            screenshot_scratch: scratch_dir.join(format!("ios-{}-frame.png", udid)),
            name_hint: name_hint.into(),
            udid,
            backend,
            locator,
            compositor,
            discovery,
            window: None,
        }
    }

    async fn adopt_window(&mut self, ctx: &SessionContext, window: WindowHandle) {
        info!("found simulator window {} ({:?}) for {}", window.id, window.title, self.udid);
        if let Err(e) = self.compositor.hide_once(&window).await {
            warn!("failed to hide simulator window {}: {:#}", window.id, e);
        }
        ctx.set_window(window.clone());
        ctx.set_strategy(CaptureStrategy::Window);
        self.window = Some(window);
    }
}

#[async_trait]
impl FrameSource for IosWindowSource {
    fn strategy(&self) -> CaptureStrategy {
        CaptureStrategy::DeviceScreenshot
    }

    async fn prepare(&mut self, ctx: &SessionContext) {
        let attempts = self.discovery.attempts.max(1);
        for attempt in 1..=attempts {
            if ctx.is_stopped() {
                return;
            }
            if let Some(window) = self.locator.find_window(&self.name_hint).await {
                self.adopt_window(ctx, window).await;
                return;
            }
            debug!("waiting for simulator window for {} (attempt {}/{})", self.udid, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(self.discovery.interval).await;
            }
        }
        warn!("no simulator window for {}, using device screenshots", self.udid);
    }

    async fn acquire(&mut self, ctx: &SessionContext) -> Result<Option<Vec<u8>>> {
        if let Some(window) = &self.window {
            if let Some(bytes) = self.locator.capture_window(window.id, &self.window_scratch).await {
                return Ok(Some(bytes));
            }
            debug!("window capture failed for {}, falling back to screenshot", self.udid);
        }

        match self.backend.capture_frame(&self.udid, &self.screenshot_scratch).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                if self.window.is_none() {
                    if let Some(window) = self.locator.find_window(&self.name_hint).await {
                        self.adopt_window(ctx, window).await;
                    }
                }
                Err(e)
            }
        }
    }
}

/// Android: frames pulled with `exec-out screencap`, optionally next to a
/// scrcpy mirror window.
pub struct AndroidPullSource {
    serial: String,
    backend: Arc<dyn DeviceBackend>,
    mirror: Option<Arc<MirrorLauncher>>,
    explicit_fps: bool,
    fallback_fps: u32,
    scratch: PathBuf,
}

impl AndroidPullSource {
    pub fn new(
        serial: impl Into<String>,
        backend: Arc<dyn DeviceBackend>,
        mirror: Option<Arc<MirrorLauncher>>,
        explicit_fps: bool,
        fallback_fps: u32,
        scratch_dir: PathBuf,
    ) -> Self {
        let serial = serial.into();
        Self {
            scratch: scratch_dir.join(format!("android-{}-frame.png", serial)),
            serial,
            backend,
            mirror,
            explicit_fps,
            fallback_fps,
        }
    }
}

#[async_trait]
impl FrameSource for AndroidPullSource {
    fn strategy(&self) -> CaptureStrategy {
        CaptureStrategy::Pull
    }

    async fn prepare(&mut self, ctx: &SessionContext) {
        let launched = match self.mirror.as_ref().map(|m| m.launch(&self.serial)) {
            Some(Ok(Some(child))) => {
                ctx.attach_process(child);
                true
            }
            Some(Ok(None)) | None => false,
            Some(Err(e)) => {
                warn!("mirror unavailable for {}: {:#}", self.serial, e);
                false
            }
        };

        if launched {
            ctx.set_strategy(CaptureStrategy::MirrorWithPull);
        } else if !self.explicit_fps {
            debug!("no mirror for {}, pulling at {} fps", self.serial, self.fallback_fps);
            ctx.set_target_fps(self.fallback_fps);
        }
    }

    async fn acquire(&mut self, ctx: &SessionContext) -> Result<Option<Vec<u8>>> {
        if ctx.reap_process() {
            info!("mirror for {} exited, continuing with frame pulls", self.serial);
            ctx.set_strategy(CaptureStrategy::Pull);
        }
        let bytes = self.backend.capture_frame(&self.serial, &self.scratch).await?;
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::bail;
    use simcast_android::MirrorSettings;
    use simcast_platform::command::CommandOutput;
    use simcast_platform::testing::ScriptedRunner;
    use simcast_platform::window::{Position, WindowInfo};
    use simcast_platform::{BootOutcome, Device, DeviceError, OpResult, Platform};

    use crate::frame::tests::test_png;
    use crate::frame::FrameBus;
    use crate::session::{CaptureManager, SessionPhase};

    /// Backend whose only working operation is `capture_frame`
    struct FrameBackend {
        platform: Platform,
        captures: AtomicUsize,
        fail: bool,
    }

    impl FrameBackend {
        fn new(platform: Platform, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                platform,
                captures: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl DeviceBackend for FrameBackend {
        fn platform(&self) -> Platform {
            self.platform
        }
        async fn list_devices(&self) -> Vec<Device> {
            Vec::new()
        }
        async fn boot(&self, _id: &str, _timeout: Duration) -> Result<BootOutcome, DeviceError> {
            Err(DeviceError::unsupported("boot", self.platform))
        }
        async fn shutdown(&self, _id: &str) -> OpResult {
            OpResult::ok()
        }
        async fn install_app(&self, _id: &str, _app: &Path) -> OpResult {
            OpResult::ok()
        }
        async fn launch_app(&self, _id: &str, _app: &str, _activity: Option<&str>) -> OpResult {
            OpResult::ok()
        }
        async fn send_touch(&self, _id: &str, _x: u32, _y: u32) -> OpResult {
            OpResult::ok()
        }
        async fn send_text(&self, _id: &str, _text: &str) -> OpResult {
            OpResult::ok()
        }
        async fn send_key(&self, _id: &str, _code: u32) -> OpResult {
            OpResult::ok()
        }
        async fn screenshot(&self, _id: &str, _out: &Path) -> OpResult {
            OpResult::ok()
        }
        async fn capture_frame(&self, _handle: &str, _scratch: &Path) -> Result<Vec<u8>> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("simctl io failed");
            }
            Ok(test_png(200))
        }
    }

    /// Window appears after `appears_after` lookups; captures succeed only
    /// if `capture_ok`.
    struct ScriptedLocator {
        lookups: AtomicUsize,
        appears_after: usize,
        capture_ok: bool,
        moves: Mutex<Vec<Position>>,
        dests: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedLocator {
        fn new(appears_after: usize, capture_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                lookups: AtomicUsize::new(0),
                appears_after,
                capture_ok,
                moves: Mutex::new(Vec::new()),
                dests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WindowLocator for ScriptedLocator {
        async fn find_window(&self, name_hint: &str) -> Option<WindowHandle> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= self.appears_after).then(|| WindowHandle {
                id: 501,
                title: name_hint.to_string(),
            })
        }
        async fn list_windows(&self) -> Result<Vec<WindowInfo>> {
            Ok(Vec::new())
        }
        async fn capture_window(&self, _id: u64, dest: &Path) -> Option<Vec<u8>> {
            self.dests.lock().unwrap().push(dest.to_path_buf());
            self.capture_ok.then(|| test_png(10))
        }
        async fn window_position(&self, _window: &WindowHandle) -> Result<Position> {
            Ok(Position::new(300, 200))
        }
        async fn move_window(&self, _window: &WindowHandle, to: Position) -> Result<()> {
            self.moves.lock().unwrap().push(to);
            Ok(())
        }
        async fn activate(&self) -> Result<()> {
            Ok(())
        }
    }

    fn discovery() -> WindowDiscovery {
        WindowDiscovery {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }

    fn ios_source(
        backend: Arc<FrameBackend>,
        locator: Arc<ScriptedLocator>,
    ) -> (Box<IosWindowSource>, Arc<Compositor>) {
        let compositor = Arc::new(Compositor::new(locator.clone()));
        let source = IosWindowSource::new(
            "AAAA-1111",
            "iPhone 15",
            backend,
            locator,
            compositor.clone(),
            discovery(),
            std::env::temp_dir(),
        );
        (Box::new(source), compositor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_discovers_window_and_hides_once() {
        let backend = FrameBackend::new(Platform::Ios, false);
        let locator = ScriptedLocator::new(3, true);
        let (source, compositor) = ios_source(backend.clone(), locator.clone());

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("AAAA-1111", Platform::Ios, 10, source);

        // attempts at 0s, 1s, 2s; running from 2s
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.info("AAAA-1111").unwrap().phase, SessionPhase::Starting);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let info = manager.info("AAAA-1111").unwrap();
        assert_eq!(info.phase, SessionPhase::Running);
        assert_eq!(info.strategy, CaptureStrategy::Window);
        assert!(info.frame_count > 0);
        assert!(compositor.is_hidden().await);
        assert_eq!(compositor.saved_position().await, Some(Position::new(300, 200)));
        assert_eq!(backend.captures.load(Ordering::SeqCst), 0);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 3);
        let expected = window::capture_path(&std::env::temp_dir(), "AAAA-1111");
        assert!(locator.dests.lock().unwrap().iter().all(|d| *d == expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_without_window_uses_screenshots() {
        let backend = FrameBackend::new(Platform::Ios, false);
        let locator = ScriptedLocator::new(usize::MAX, false);
        let (source, compositor) = ios_source(backend.clone(), locator.clone());

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("AAAA-1111", Platform::Ios, 10, source);
        tokio::time::sleep(Duration::from_millis(9500)).await;

        let info = manager.info("AAAA-1111").unwrap();
        assert_eq!(info.phase, SessionPhase::Running);
        assert_eq!(info.strategy, CaptureStrategy::DeviceScreenshot);
        assert!(manager.current_frame("AAAA-1111").is_some());
        assert!(!compositor.is_hidden().await);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_window_capture_falls_back_to_screenshot() {
        let backend = FrameBackend::new(Platform::Ios, false);
        let locator = ScriptedLocator::new(1, false);
        let (source, _) = ios_source(backend.clone(), locator);

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("AAAA-1111", Platform::Ios, 10, source);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(manager.info("AAAA-1111").unwrap().frame_count, 3);
        assert_eq!(backend.captures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ios_rediscovers_after_failed_screenshot() {
        let backend = FrameBackend::new(Platform::Ios, true);
        // not found during the 10 starting attempts, found on the 11th
        let locator = ScriptedLocator::new(11, true);
        let (mut source, _) = ios_source(backend.clone(), locator.clone());

        let manager = CaptureManager::new(FrameBus::new(16));
        let ctx = manager.test_context("AAAA-1111", Platform::Ios);
        source.prepare(&ctx).await;
        assert!(source.window.is_none());

        assert!(source.acquire(&ctx).await.is_err());
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 11);
        assert_eq!(source.window.as_ref().map(|w| w.id), Some(501));
        assert!(source.acquire(&ctx).await.unwrap().is_some());
    }

    fn mirror(runner: Arc<ScriptedRunner>, installed: bool) -> Arc<MirrorLauncher> {
        let binary = installed.then(|| PathBuf::from("/opt/homebrew/bin/scrcpy"));
        Arc::new(MirrorLauncher::new(runner, binary, MirrorSettings::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_android_without_mirror_uses_fallback_rate() {
        let backend = FrameBackend::new(Platform::Android, false);
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))));
        let source = AndroidPullSource::new(
            "emulator-5554",
            backend.clone(),
            Some(mirror(runner, false)),
            false,
            10,
            std::env::temp_dir(),
        );

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("emulator-5554", Platform::Android, 30, Box::new(source));
        tokio::time::sleep(Duration::from_millis(950)).await;

        let info = manager.info("emulator-5554").unwrap();
        assert_eq!(info.target_fps, 10);
        assert_eq!(info.strategy, CaptureStrategy::Pull);
        assert_eq!(backend.captures.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_android_explicit_rate_is_kept() {
        let backend = FrameBackend::new(Platform::Android, false);
        let source = AndroidPullSource::new("emulator-5554", backend, None, true, 10, std::env::temp_dir());

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("emulator-5554", Platform::Android, 30, Box::new(source));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.info("emulator-5554").unwrap().target_fps, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_android_mirror_exit_is_reaped() {
        let backend = FrameBackend::new(Platform::Android, false);
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))));
        let source = AndroidPullSource::new(
            "emulator-5554",
            backend.clone(),
            Some(mirror(runner.clone(), true)),
            false,
            10,
            std::env::temp_dir(),
        );

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("emulator-5554", Platform::Android, 30, Box::new(source));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let info = manager.info("emulator-5554").unwrap();
        assert_eq!(info.strategy, CaptureStrategy::MirrorWithPull);
        assert_eq!(info.target_fps, 30);
        assert_eq!(runner.spawned().len(), 1);

        runner.spawned()[0].exit();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = manager.info("emulator-5554").unwrap();
        assert_eq!(info.strategy, CaptureStrategy::Pull);
        assert!(info.running);

        let before = backend.captures.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(backend.captures.load(Ordering::SeqCst) > before);

        manager.stop("emulator-5554");
        assert!(!runner.spawned()[0].is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_android_stop_terminates_mirror() {
        let backend = FrameBackend::new(Platform::Android, false);
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))));
        let source = AndroidPullSource::new(
            "emulator-5554",
            backend,
            Some(mirror(runner.clone(), true)),
            false,
            10,
            std::env::temp_dir(),
        );

        let manager = CaptureManager::new(FrameBus::new(16));
        manager.start_session("emulator-5554", Platform::Android, 30, Box::new(source));
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.stop("emulator-5554");
        assert!(runner.spawned()[0].is_terminated());
    }
}
