//! Simulator.app window primitives via `osascript`, a Quartz window-list
//! helper run through `python3`, and `screencapture`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use simcast_platform::command::{args, CommandRunner};
use simcast_platform::window::{Position, WindowBounds, WindowHandle, WindowInfo, WindowLocator};

const TITLE_SEPARATOR: &str = "|||";

/// Prints `[{"id": .., "title": .., "x": .., "y": .., "width": .., "height": ..}]`
/// for every window owned by the process named in argv[1]. argv[2] selects
/// the option set: "all" includes off-screen windows, anything else lists
/// on-screen windows without desktop elements.
const QUARTZ_SCRIPT: &str = r#"
import json, sys
import Quartz
owner = sys.argv[1]
if sys.argv[2] == "all":
    opts = Quartz.kCGWindowListOptionAll
else:
    opts = Quartz.kCGWindowListOptionOnScreenOnly | Quartz.kCGWindowListExcludeDesktopElements
out = []
for w in Quartz.CGWindowListCopyWindowInfo(opts, Quartz.kCGNullWindowID) or []:
    if w.get("kCGWindowOwnerName") != owner:
        continue
    b = w.get("kCGWindowBounds", {})
    out.append({
        "id": int(w.get("kCGWindowNumber", 0)),
        "title": w.get("kCGWindowName") or "",
        "x": float(b.get("X", 0)),
        "y": float(b.get("Y", 0)),
        "width": float(b.get("Width", 0)),
        "height": float(b.get("Height", 0)),
    })
print(json.dumps(out))
"#;

#[derive(Debug, Deserialize)]
struct QuartzWindow {
    id: u64,
    title: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Window locator for the compositor process (normally "Simulator").
pub struct OsaWindowLocator {
    runner: Arc<dyn CommandRunner>,
    process: String,
}

impl OsaWindowLocator {
    pub fn new(runner: Arc<dyn CommandRunner>, process: impl Into<String>) -> Self {
        Self {
            runner,
            process: process.into(),
        }
    }

    async fn osascript(&self, script: &str) -> Result<String> {
        let output = self
            .runner
            .run_checked(Path::new("osascript"), &args(["-e", script]))
            .await?;
        Ok(output.stdout_str().trim().to_string())
    }

    async fn quartz_windows(&self, scope: &str) -> Result<Vec<QuartzWindow>> {
        let output = self
            .runner
            .run_checked(
                Path::new("python3"),
                &args(["-c", QUARTZ_SCRIPT, self.process.as_str(), scope]),
            )
            .await?;
        serde_json::from_slice(&output.stdout).context("invalid window list JSON")
    }

    async fn windows_via_applescript(&self) -> Result<Vec<WindowHandle>> {
        let script = format!(
            r#"tell application "System Events" to tell process "{}"
    set out to {{}}
    repeat with w in windows
        set end of out to (name of w as text) & "{}" & (id of w as text)
    end repeat
    return out
end tell"#,
            escape(&self.process),
            TITLE_SEPARATOR
        );
        let stdout = self.osascript(&script).await?;
        Ok(parse_applescript_windows(&stdout))
    }

    fn window_ref(&self, window: &WindowHandle) -> String {
        if window.title.is_empty() {
            "front window".to_string()
        } else {
            format!(r#"window "{}""#, escape(&window.title))
        }
    }
}

/// Parse `title|||id, title|||id` as printed by AppleScript for a list.
pub fn parse_applescript_windows(stdout: &str) -> Vec<WindowHandle> {
    stdout
        .split(", ")
        .filter_map(|entry| {
            let (title, id) = entry.trim().rsplit_once(TITLE_SEPARATOR)?;
            let id = id.trim().parse().ok()?;
            Some(WindowHandle {
                id,
                title: title.to_string(),
            })
        })
        .collect()
}

/// Title substring match, else the first window.
pub fn pick_window(windows: Vec<WindowHandle>, name_hint: &str) -> Option<WindowHandle> {
    if !name_hint.is_empty() {
        if let Some(found) = windows.iter().find(|w| w.title.contains(name_hint)) {
            return Some(found.clone());
        }
    }
    windows.into_iter().next()
}

/// Parse `x, y` as printed for an AppleScript position record.
pub fn parse_position(stdout: &str) -> Result<Position> {
    let mut parts = stdout.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y))) => Ok(Position::new(x.round() as i32, y.round() as i32)),
        _ => Err(anyhow!("unexpected window position output: {:?}", stdout)),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl WindowLocator for OsaWindowLocator {
    async fn find_window(&self, name_hint: &str) -> Option<WindowHandle> {
        let windows = match self.windows_via_applescript().await {
            Ok(windows) => windows,
            Err(e) => {
                debug!("AppleScript window query failed, trying Quartz: {:#}", e);
                match self.quartz_windows("onscreen").await {
                    // Untitled entries are helper panels, not device windows
                    Ok(windows) => windows
                        .into_iter()
                        .filter(|w| !w.title.is_empty())
                        .map(|w| WindowHandle {
                            id: w.id,
                            title: w.title,
                        })
                        .collect(),
                    Err(e) => {
                        warn!("failed to enumerate {} windows: {:#}", self.process, e);
                        return None;
                    }
                }
            }
        };
        pick_window(windows, name_hint)
    }

    async fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let windows = self.quartz_windows("all").await?;
        Ok(windows
            .into_iter()
            .map(|w| WindowInfo {
                id: w.id,
                title: w.title,
                bounds: WindowBounds {
                    x: w.x,
                    y: w.y,
                    width: w.width,
                    height: w.height,
                },
            })
            .collect())
    }

    async fn capture_window(&self, window_id: u64, dest: &Path) -> Option<Vec<u8>> {
        // A stale file from the previous tick must never be served as new.
        let _ = tokio::fs::remove_file(dest).await;

        let dest_arg = dest.to_string_lossy().into_owned();
        let capture = self
            .runner
            .run_checked(
                Path::new("screencapture"),
                &args([format!("-l{}", window_id), "-x".into(), "-o".into(), dest_arg]),
            )
            .await;
        if let Err(e) = capture {
            debug!("screencapture of window {} failed: {:#}", window_id, e);
            return None;
        }

        match tokio::fs::read(dest).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                debug!("no capture written to {}: {}", dest.display(), e);
                None
            }
        }
    }

    async fn window_position(&self, window: &WindowHandle) -> Result<Position> {
        let script = format!(
            r#"tell application "System Events" to tell process "{}" to get position of {}"#,
            escape(&self.process),
            self.window_ref(window)
        );
        parse_position(&self.osascript(&script).await?)
    }

    async fn move_window(&self, window: &WindowHandle, to: Position) -> Result<()> {
        let script = format!(
            r#"tell application "System Events" to tell process "{}" to set position of {} to {{{}, {}}}"#,
            escape(&self.process),
            self.window_ref(window),
            to.x,
            to.y
        );
        self.osascript(&script).await.map(|_| ())
    }

    async fn activate(&self) -> Result<()> {
        let script = format!(r#"tell application "{}" to activate"#, escape(&self.process));
        self.osascript(&script).await.map(|_| ())
    }
}

/// Default scratch file for window captures of one device.
pub fn capture_path(scratch_dir: &Path, device_id: &str) -> PathBuf {
    scratch_dir.join(format!("window-{}.png", device_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcast_platform::command::CommandOutput;
    use simcast_platform::testing::ScriptedRunner;

    #[test]
    fn test_parse_applescript_windows() {
        let windows = parse_applescript_windows("iPhone 15 Pro|||4211, iPad Air|||4300\n");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].id, 4211);
        assert_eq!(windows[0].title, "iPhone 15 Pro");
        assert_eq!(windows[1].title, "iPad Air");
        assert!(parse_applescript_windows("").is_empty());
    }

    #[test]
    fn test_pick_window_prefers_hint() {
        let windows = vec![
            WindowHandle { id: 1, title: "iPad Air".into() },
            WindowHandle { id: 2, title: "iPhone 15".into() },
        ];
        assert_eq!(pick_window(windows.clone(), "iPhone 15").unwrap().id, 2);
        assert_eq!(pick_window(windows.clone(), "Galaxy").unwrap().id, 1);
        assert_eq!(pick_window(Vec::new(), "iPhone 15"), None);
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("-3000, 100").unwrap(), Position::new(-3000, 100));
        assert_eq!(parse_position("12.6, 40").unwrap(), Position::new(13, 40));
        assert!(parse_position("missing value").is_err());
    }

    #[tokio::test]
    async fn test_find_window_falls_back_to_quartz() {
        let runner = Arc::new(ScriptedRunner::new(|program, _| match program {
            "osascript" => Ok(CommandOutput::failed(1, "not authorized to send Apple events")),
            "python3" => Ok(CommandOutput::ok(
                r#"[{"id": 77, "title": "iPhone 15", "x": 0, "y": 25, "width": 430, "height": 932}]"#,
            )),
            _ => Ok(CommandOutput::ok("")),
        }));
        let locator = OsaWindowLocator::new(runner.clone(), "Simulator");

        let window = locator.find_window("iPhone").await.unwrap();
        assert_eq!(window.id, 77);
        let programs: Vec<_> = runner.calls().into_iter().map(|c| c.program).collect();
        assert_eq!(programs, vec!["osascript", "python3"]);
    }

    #[tokio::test]
    async fn test_quartz_fallback_skips_untitled_windows() {
        let runner = Arc::new(ScriptedRunner::new(|program, args| match program {
            "osascript" => Ok(CommandOutput::failed(1, "not authorized to send Apple events")),
            "python3" if args[3] == "onscreen" => Ok(CommandOutput::ok(
                r#"[{"id": 12, "title": "", "x": 0, "y": 0, "width": 40, "height": 40},
                    {"id": 78, "title": "iPad Air", "x": 0, "y": 25, "width": 820, "height": 1180}]"#,
            )),
            _ => Ok(CommandOutput::failed(2, "unexpected")),
        }));
        let locator = OsaWindowLocator::new(runner, "Simulator");

        let window = locator.find_window("").await.unwrap();
        assert_eq!(window.id, 78);
        assert_eq!(window.title, "iPad Air");
    }

    #[test]
    fn test_quartz_script_excludes_desktop_elements_on_screen() {
        assert!(QUARTZ_SCRIPT.contains(
            "kCGWindowListOptionOnScreenOnly | Quartz.kCGWindowListExcludeDesktopElements"
        ));
    }

    #[tokio::test]
    async fn test_find_window_none_when_both_fail() {
        let locator = OsaWindowLocator::new(Arc::new(ScriptedRunner::unavailable()), "Simulator");
        assert_eq!(locator.find_window("iPhone").await, None);
    }

    #[tokio::test]
    async fn test_move_window_script() {
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))));
        let locator = OsaWindowLocator::new(runner.clone(), "Simulator");
        let window = WindowHandle { id: 9, title: "iPhone \"15\"".into() };

        locator.move_window(&window, Position::new(-3000, 100)).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].args[0], "-e");
        assert!(calls[0].args[1].contains(r#"window "iPhone \"15\"""#));
        assert!(calls[0].args[1].ends_with("to {-3000, 100}"));
    }

    #[tokio::test]
    async fn test_capture_window_without_output_is_none() {
        let dir = std::env::temp_dir().join(format!("simcast-window-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dest = capture_path(&dir, "AAAA");
        std::fs::write(&dest, b"stale").unwrap();

        // screencapture "succeeds" but writes nothing
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))));
        let locator = OsaWindowLocator::new(runner.clone(), "Simulator");
        assert_eq!(locator.capture_window(5, &dest).await, None);
        assert_eq!(runner.command_lines()[0], format!("screencapture -l5 -x -o {}", dest.display()));
    }
}
