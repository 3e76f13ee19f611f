//! Capture sessions: one timer task per device, at most one per id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use simcast_platform::command::ChildProcess;
use simcast_platform::window::WindowHandle;
use simcast_platform::Platform;

use crate::frame::{self, FrameBus, FrameEvent};
use crate::source::{CaptureStrategy, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Starting,
    Running,
    Stopped,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    pub device_id: String,
    pub platform: Platform,
    pub phase: SessionPhase,
    pub running: bool,
    pub target_fps: u32,
    pub frame_count: u64,
    pub last_frame_timestamp_ms: Option<i64>,
    pub strategy: CaptureStrategy,
}

struct SessionState {
    phase: SessionPhase,
    target_fps: u32,
    frame_count: u64,
    last_frame_timestamp_ms: Option<i64>,
    current_frame: Option<Bytes>,
    strategy: CaptureStrategy,
    window: Option<WindowHandle>,
    /// Side-channel process owned by the session (Android mirror)
    process: Option<Box<dyn ChildProcess>>,
}

struct Shared {
    device_id: String,
    platform: Platform,
    bus: FrameBus,
    state: Mutex<SessionState>,
}

impl Shared {
    fn new(device_id: &str, platform: Platform, bus: FrameBus, fps: u32, strategy: CaptureStrategy) -> Self {
        Self {
            device_id: device_id.to_string(),
            platform,
            bus,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Starting,
                target_fps: fps.max(1),
                frame_count: 0,
                last_frame_timestamp_ms: None,
                current_frame: None,
                strategy,
                window: None,
                process: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a frame source may see and change about its own session.
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<Shared>,
}

impl SessionContext {
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().phase == SessionPhase::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().phase == SessionPhase::Stopped
    }

    pub fn target_fps(&self) -> u32 {
        self.shared.lock().target_fps
    }

    /// Only meaningful while starting; the timer period is fixed once running.
    pub fn set_target_fps(&self, fps: u32) {
        self.shared.lock().target_fps = fps.max(1);
    }

    pub fn set_strategy(&self, strategy: CaptureStrategy) {
        self.shared.lock().strategy = strategy;
    }

    pub fn set_window(&self, window: WindowHandle) {
        self.shared.lock().window = Some(window);
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.shared.lock().window.clone()
    }

    /// Hand a child process to the session. If the session was stopped in
    /// the meantime the child is terminated right away.
    pub fn attach_process(&self, mut child: Box<dyn ChildProcess>) {
        let mut state = self.shared.lock();
        if state.phase == SessionPhase::Stopped {
            drop(state);
            debug!("session {} stopped before process attached", self.shared.device_id);
            if let Err(e) = child.terminate() {
                warn!("failed to terminate process for {}: {:#}", self.shared.device_id, e);
            }
            return;
        }
        state.process = Some(child);
    }

    pub fn has_process(&self) -> bool {
        self.shared.lock().process.is_some()
    }

    /// Drop the owned process if it exited on its own. Returns true if one
    /// was reaped.
    pub fn reap_process(&self) -> bool {
        let mut state = self.shared.lock();
        let exited = state.process.as_mut().is_some_and(|p| p.has_exited());
        if exited {
            let pid = state.process.take().and_then(|p| p.id());
            info!("side-channel process {:?} for {} exited", pid, self.shared.device_id);
        }
        exited
    }

    /// Store and broadcast a frame. Nothing is published unless the session
    /// is running; the check and the publish share one lock acquisition.
    fn publish(&self, data: Vec<u8>) -> Option<u64> {
        let mut state = self.shared.lock();
        if state.phase != SessionPhase::Running {
            return None;
        }
        state.frame_count += 1;
        let timestamp_ms = frame::now_ms();
        let data = Bytes::from(data);
        state.current_frame = Some(data.clone());
        state.last_frame_timestamp_ms = Some(timestamp_ms);

        self.shared.bus.publish(FrameEvent {
            device_id: self.shared.device_id.clone(),
            platform: self.shared.platform,
            data,
            sequence: state.frame_count,
            timestamp_ms,
        });
        Some(state.frame_count)
    }
}

struct CaptureSession {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

/// Owns every capture session and the frame bus they publish on.
pub struct CaptureManager {
    sessions: Mutex<HashMap<String, CaptureSession>>,
    bus: FrameBus,
}

impl CaptureManager {
    pub fn new(bus: FrameBus) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            bus,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, CaptureSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start capturing `device_id`. Returns false without side effects if a
    /// session for it already exists. Must be called within a tokio runtime.
    pub fn start_session(
        &self,
        device_id: &str,
        platform: Platform,
        fps: u32,
        source: Box<dyn FrameSource>,
    ) -> bool {
        let mut sessions = self.sessions();
        if sessions.contains_key(device_id) {
            debug!("capture for {} is already running", device_id);
            return false;
        }

        let shared = Arc::new(Shared::new(
            device_id,
            platform,
            self.bus.clone(),
            fps,
            source.strategy(),
        ));
        let ctx = SessionContext {
            shared: shared.clone(),
        };
        let task = tokio::spawn(run_session(ctx, source));

        info!("starting {} capture for {} at {} fps", platform, device_id, fps.max(1));
        sessions.insert(device_id.to_string(), CaptureSession { shared, task });
        true
    }

    /// Stop and forget a session. Unknown ids are ignored. Returns whether
    /// a session was stopped.
    pub fn stop(&self, device_id: &str) -> bool {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get(device_id) else {
            return false;
        };

        let process = {
            let mut state = session.shared.lock();
            state.phase = SessionPhase::Stopped;
            state.process.take()
        };
        session.task.abort();
        if let Some(mut process) = process {
            if let Err(e) = process.terminate() {
                warn!("failed to terminate process for {}: {:#}", device_id, e);
            }
        }
        sessions.remove(device_id);
        info!("stopped capture for {}", device_id);
        true
    }

    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions().keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Ids of active sessions, sorted
    pub fn active_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn current_frame(&self, device_id: &str) -> Option<Bytes> {
        let sessions = self.sessions();
        let state = sessions.get(device_id)?.shared.lock();
        state.current_frame.clone()
    }

    pub fn info(&self, device_id: &str) -> Option<CaptureInfo> {
        let sessions = self.sessions();
        let session = sessions.get(device_id)?;
        let state = session.shared.lock();
        Some(CaptureInfo {
            device_id: session.shared.device_id.clone(),
            platform: session.shared.platform,
            phase: state.phase,
            running: state.phase == SessionPhase::Running,
            target_fps: state.target_fps,
            frame_count: state.frame_count,
            last_frame_timestamp_ms: state.last_frame_timestamp_ms,
            strategy: state.strategy,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &FrameBus {
        &self.bus
    }

    /// A running context with no timer task behind it, for driving a
    /// source by hand.
    #[cfg(test)]
    pub(crate) fn test_context(&self, device_id: &str, platform: Platform) -> SessionContext {
        let shared = Shared::new(device_id, platform, self.bus.clone(), 1, CaptureStrategy::DeviceScreenshot);
        shared.lock().phase = SessionPhase::Running;
        SessionContext {
            shared: Arc::new(shared),
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn run_session(ctx: SessionContext, mut source: Box<dyn FrameSource>) {
    source.prepare(&ctx).await;

    let fps = {
        let mut state = ctx.shared.lock();
        if state.phase == SessionPhase::Stopped {
            return;
        }
        state.phase = SessionPhase::Running;
        state.target_fps
    };

    let period = Duration::from_millis(1000 / u64::from(fps.max(1)));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("capture loop for {} running every {:?}", ctx.device_id(), period);

    loop {
        interval.tick().await;
        if !ctx.is_running() {
            break;
        }

        match source.acquire(&ctx).await {
            Ok(Some(data)) if frame::is_complete_image(&data) => {
                if ctx.publish(data).is_none() {
                    break;
                }
            }
            Ok(Some(data)) => {
                warn!("dropping incomplete frame from {} ({} bytes)", ctx.device_id(), data.len());
            }
            Ok(None) => debug!("no frame from {} this tick", ctx.device_id()),
            Err(e) => warn!("capture failed for {}: {:#}", ctx.device_id(), e),
        }
    }
}
