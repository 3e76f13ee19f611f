use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A native compositor window, re-resolved each time a capture starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowHandle {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: u64,
    pub title: String,
    pub bounds: WindowBounds,
}

/// Single-attempt window primitives scoped to the compositor process.
/// Callers own any retry policy.
#[async_trait]
pub trait WindowLocator: Send + Sync {
    /// Find the window whose title contains `name_hint`, else the first
    /// window of the process
    async fn find_window(&self, name_hint: &str) -> Option<WindowHandle>;

    /// Every compositor window with its on-screen bounds
    async fn list_windows(&self) -> Result<Vec<WindowInfo>>;

    /// Capture one window's pixels into `dest` and return the bytes
    async fn capture_window(&self, window_id: u64, dest: &Path) -> Option<Vec<u8>>;

    async fn window_position(&self, window: &WindowHandle) -> Result<Position>;

    async fn move_window(&self, window: &WindowHandle, to: Position) -> Result<()>;

    /// Bring the compositor application to the foreground
    async fn activate(&self) -> Result<()>;
}
