//! Parking the Simulator.app window off-screen while it is being captured.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use simcast_platform::window::{Position, WindowHandle, WindowLocator};

/// Far enough left to be off every display arrangement we care about.
pub const OFFSCREEN: Position = Position::new(-3000, 100);

/// Used by `show` when nothing was saved.
pub const DEFAULT_RESTORE: Position = Position::new(100, 100);

#[derive(Default)]
struct WindowState {
    saved_position: Option<Position>,
    hidden: Option<WindowHandle>,
}

/// Hides and restores the compositor window. One instance per engine.
pub struct Compositor {
    locator: Arc<dyn WindowLocator>,
    state: Mutex<WindowState>,
}

impl Compositor {
    pub fn new(locator: Arc<dyn WindowLocator>) -> Self {
        Self {
            locator,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Record the window's current position, then move it off-screen.
    /// If the position can't be read the previous saved value is kept.
    pub async fn hide(&self, window: &WindowHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        match self.locator.window_position(window).await {
            Ok(pos) if pos != OFFSCREEN => state.saved_position = Some(pos),
            Ok(_) => debug!("window {} is already off-screen", window.id),
            Err(e) => warn!("could not read position of window {}: {:#}", window.id, e),
        }
        self.locator.move_window(window, OFFSCREEN).await?;
        state.hidden = Some(window.clone());
        info!("moved window {} off-screen", window.id);
        Ok(())
    }

    /// Move the window back to its saved position (or the default) and
    /// bring the compositor forward.
    pub async fn show(&self, window: &WindowHandle) -> Result<Position> {
        let mut state = self.state.lock().await;
        let target = state.saved_position.unwrap_or(DEFAULT_RESTORE);
        self.locator.move_window(window, target).await?;
        if let Err(e) = self.locator.activate().await {
            debug!("failed to activate compositor: {:#}", e);
        }
        state.hidden = None;
        info!("restored window {} to ({}, {})", window.id, target.x, target.y);
        Ok(target)
    }

    /// Hide unless a window is already parked. Returns whether a move happened.
    pub async fn hide_once(&self, window: &WindowHandle) -> Result<bool> {
        if self.is_hidden().await {
            return Ok(false);
        }
        self.hide(window).await?;
        Ok(true)
    }

    /// Show the last hidden window, if any. Returns whether one was restored.
    pub async fn restore(&self) -> Result<bool> {
        let hidden = self.state.lock().await.hidden.clone();
        match hidden {
            Some(window) => self.show(&window).await.map(|_| true),
            None => Ok(false),
        }
    }

    pub async fn is_hidden(&self) -> bool {
        self.state.lock().await.hidden.is_some()
    }

    pub async fn saved_position(&self) -> Option<Position> {
        self.state.lock().await.saved_position
    }
}
