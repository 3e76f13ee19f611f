//! iOS Simulator control through `xcrun simctl`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use simcast_platform::command::{args, CommandRunner};
use simcast_platform::{BootOutcome, Device, DeviceBackend, DeviceError, DeviceState, OpResult, Platform};

#[derive(Debug, Deserialize)]
struct SimctlList {
    devices: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "isAvailable")]
    is_available: Option<bool>,
    /// Pre-Xcode 11 form: "(available)" / "(unavailable, ...)"
    availability: Option<String>,
}

impl SimctlDevice {
    fn available(&self) -> bool {
        match (self.is_available, self.availability.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(text)) => text == "(available)",
            (None, None) => false,
        }
    }
}

/// Device backend for iOS Simulators.
pub struct SimctlBackend {
    runner: Arc<dyn CommandRunner>,
    xcrun: PathBuf,
    compositor_app: String,
}

impl SimctlBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, compositor_app: impl Into<String>) -> Self {
        Self {
            runner,
            xcrun: PathBuf::from("xcrun"),
            compositor_app: compositor_app.into(),
        }
    }

    async fn simctl(&self, simctl_args: &[&str]) -> Result<Vec<u8>> {
        let mut full = vec!["simctl".to_string()];
        full.extend(simctl_args.iter().map(|a| a.to_string()));
        let output = self.runner.run_checked(&self.xcrun, &full).await?;
        Ok(output.stdout)
    }

    async fn try_list(&self) -> Result<Vec<Device>> {
        let stdout = self.simctl(&["list", "devices", "-j"]).await?;
        parse_device_list(&stdout)
    }

    /// Start Simulator.app without bringing it forward. Window capture
    /// needs the compositor running even though its window is parked.
    async fn ensure_compositor(&self) -> Result<()> {
        self.runner
            .run_checked(
                Path::new("open"),
                &args(["-a", self.compositor_app.as_str(), "--background", "--hide"]),
            )
            .await
            .map(|_| ())
    }

    fn op(&self, operation: &str, result: Result<()>) -> OpResult {
        if let Err(e) = &result {
            warn!("simctl {} failed: {:#}", operation, e);
        }
        result.map_err(|e| format!("{:#}", e)).into()
    }
}

/// Parse `simctl list devices -j`, keeping only available devices in the
/// order simctl reports them.
pub fn parse_device_list(json: &[u8]) -> Result<Vec<Device>> {
    let list: SimctlList = serde_json::from_slice(json).context("invalid simctl JSON")?;
    let mut devices = Vec::new();

    for (runtime, entries) in list.devices {
        let entries: Vec<SimctlDevice> = match serde_json::from_value(entries) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("skipping runtime {}: {}", runtime, e);
                continue;
            }
        };
        let label = runtime_label(&runtime);

        for entry in entries.into_iter().filter(SimctlDevice::available) {
            devices.push(Device::new(
                entry.udid,
                Platform::Ios,
                entry.name,
                label.clone(),
                DeviceState::from_simctl(&entry.state),
            ));
        }
    }

    Ok(devices)
}

/// `com.apple.CoreSimulator.SimRuntime.iOS-17-0` → `iOS 17.0`. Keys that
/// carry no iOS version are returned unchanged.
pub fn runtime_label(runtime: &str) -> String {
    parse_ios_version(runtime)
        .map(|(major, minor)| format!("iOS {}.{}", major, minor))
        .unwrap_or_else(|| runtime.to_string())
}

fn parse_ios_version(runtime: &str) -> Option<(&str, &str)> {
    let idx = runtime.to_ascii_lowercase().find("ios")?;
    let rest = runtime[idx + 3..].strip_prefix(['-', ' '])?;
    let (major, rest) = split_digits(rest)?;
    let rest = rest.strip_prefix(['-', ' '])?;
    let (minor, _) = split_digits(rest)?;
    Some((major, minor))
}

fn split_digits(s: &str) -> Option<(&str, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    (end > 0).then(|| s.split_at(end))
}

#[async_trait]
impl DeviceBackend for SimctlBackend {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn list_devices(&self) -> Vec<Device> {
        match self.try_list().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("failed to list iOS simulators: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn boot(&self, device_id: &str, _timeout: Duration) -> Result<BootOutcome, DeviceError> {
        let device = self.find_device(device_id).await;
        if device.as_ref().is_some_and(|d| d.is_booted) {
            info!("iOS simulator {} is already booted", device_id);
            return Ok(BootOutcome {
                already_booted: true,
                serial: None,
            });
        }

        info!("booting iOS simulator {}", device_id);
        self.simctl(&["boot", device_id])
            .await
            .map_err(|e| DeviceError::command("simctl boot", format!("{:#}", e)))?;

        if let Err(e) = self.ensure_compositor().await {
            warn!("failed to start {}: {:#}", self.compositor_app, e);
        }

        Ok(BootOutcome {
            already_booted: false,
            serial: None,
        })
    }

    async fn shutdown(&self, device_id: &str) -> OpResult {
        let result = self.simctl(&["shutdown", device_id]).await.map(|_| ());
        self.op("shutdown", result)
    }

    async fn install_app(&self, device_id: &str, app_path: &Path) -> OpResult {
        let path = app_path.to_string_lossy();
        let result = self.simctl(&["install", device_id, &path]).await.map(|_| ());
        self.op("install", result)
    }

    async fn launch_app(&self, device_id: &str, app_id: &str, _activity: Option<&str>) -> OpResult {
        let result = self.simctl(&["launch", device_id, app_id]).await.map(|_| ());
        self.op("launch", result)
    }

    async fn send_touch(&self, _device_id: &str, _x: u32, _y: u32) -> OpResult {
        OpResult::failed(DeviceError::unsupported("touch input", Platform::Ios))
    }

    async fn send_text(&self, _device_id: &str, _text: &str) -> OpResult {
        OpResult::failed(DeviceError::unsupported("text input", Platform::Ios))
    }

    async fn send_key(&self, _device_id: &str, _key_code: u32) -> OpResult {
        OpResult::failed(DeviceError::unsupported("key input", Platform::Ios))
    }

    async fn screenshot(&self, device_id: &str, output: &Path) -> OpResult {
        let path = output.to_string_lossy();
        let result = self
            .simctl(&["io", device_id, "screenshot", &path])
            .await
            .map(|_| ());
        self.op("screenshot", result)
    }

    async fn capture_frame(&self, handle: &str, scratch: &Path) -> Result<Vec<u8>> {
        let path = scratch.to_string_lossy();
        self.simctl(&["io", handle, "screenshot", &path, "--type=png"]).await?;
        tokio::fs::read(scratch)
            .await
            .with_context(|| format!("failed to read screenshot {}", scratch.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcast_platform::command::CommandOutput;
    use simcast_platform::testing::ScriptedRunner;

    const LIST_JSON: &str = r#"{
      "devices": {
        "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
          {"udid": "AAAA-1111", "name": "iPhone 15", "state": "Booted", "isAvailable": true},
          {"udid": "BBBB-2222", "name": "iPhone SE", "state": "Shutdown", "isAvailable": false}
        ],
        "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
          {"udid": "CCCC-3333", "name": "iPad Air", "state": "Shutdown", "isAvailable": true}
        ],
        "com.apple.CoreSimulator.SimRuntime.watchOS-10-0": [
          {"udid": "DDDD-4444", "name": "Apple Watch", "state": "Shutdown", "availability": "(available)"}
        ]
      }
    }"#;

    fn backend(runner: ScriptedRunner) -> (SimctlBackend, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (SimctlBackend::new(runner.clone(), "Simulator"), runner)
    }

    fn list_runner() -> ScriptedRunner {
        ScriptedRunner::new(|program, args| match (program, args.get(1).map(String::as_str)) {
            ("xcrun", Some("list")) => Ok(CommandOutput::ok(LIST_JSON)),
            _ => Ok(CommandOutput::ok("")),
        })
    }

    #[test]
    fn test_runtime_label() {
        assert_eq!(runtime_label("com.apple.CoreSimulator.SimRuntime.iOS-17-0"), "iOS 17.0");
        assert_eq!(runtime_label("iOS 16 4"), "iOS 16.4");
        assert_eq!(
            runtime_label("com.apple.CoreSimulator.SimRuntime.watchOS-10-0"),
            "com.apple.CoreSimulator.SimRuntime.watchOS-10-0"
        );
    }

    #[test]
    fn test_parse_keeps_order_and_filters_unavailable() {
        let devices = parse_device_list(LIST_JSON.as_bytes()).unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["AAAA-1111", "CCCC-3333", "DDDD-4444"]);
        assert!(devices[0].is_booted);
        assert_eq!(devices[0].runtime_label, "iOS 17.0");
        assert_eq!(devices[1].state, DeviceState::Shutdown);
        assert!(devices.iter().all(|d| d.serial.is_none()));
    }

    #[tokio::test]
    async fn test_list_failure_is_empty() {
        let (backend, _) = backend(ScriptedRunner::unavailable());
        assert!(backend.list_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_boot_already_booted_does_nothing_else() {
        let (backend, runner) = backend(list_runner());
        let outcome = backend.boot("AAAA-1111", Duration::from_secs(60)).await.unwrap();
        assert!(outcome.already_booted);
        assert_eq!(runner.command_lines(), vec!["xcrun simctl list devices -j"]);
    }

    #[tokio::test]
    async fn test_boot_starts_compositor() {
        let (backend, runner) = backend(list_runner());
        let outcome = backend.boot("CCCC-3333", Duration::from_secs(60)).await.unwrap();
        assert!(!outcome.already_booted);
        assert_eq!(
            runner.command_lines(),
            vec![
                "xcrun simctl list devices -j",
                "xcrun simctl boot CCCC-3333",
                "open -a Simulator --background --hide",
            ]
        );
    }

    #[tokio::test]
    async fn test_boot_failure_is_command_error() {
        let (backend, _) = backend(ScriptedRunner::new(|_, args| match args.get(1).map(String::as_str) {
            Some("list") => Ok(CommandOutput::ok(LIST_JSON)),
            _ => Ok(CommandOutput::failed(149, "Invalid device: CCCC-3333")),
        }));
        let err = backend.boot("CCCC-3333", Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, DeviceError::CommandFailed { .. }));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_one_shot_ops_report_failures() {
        let (backend, runner) = backend(ScriptedRunner::new(|_, args| match args.get(1).map(String::as_str) {
            Some("shutdown") => Ok(CommandOutput::failed(164, "Unable to shutdown device in current state: Shutdown")),
            _ => Ok(CommandOutput::ok("")),
        }));

        let result = backend.shutdown("CCCC-3333").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("current state"));

        assert!(backend.launch_app("AAAA-1111", "com.example.app", None).await.success);
        assert!(!backend.send_touch("AAAA-1111", 10, 10).await.success);
        assert_eq!(
            runner.command_lines(),
            vec!["xcrun simctl shutdown CCCC-3333", "xcrun simctl launch AAAA-1111 com.example.app"]
        );
    }
}
