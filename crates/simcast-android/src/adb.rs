//! Android Emulator control through `adb` and the SDK `emulator` binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use simcast_platform::command::{args, ChildProcess, CommandOutput, CommandRunner, SpawnMode};
use simcast_platform::{BootOutcome, Device, DeviceBackend, DeviceError, DeviceState, OpResult, Platform};

use crate::sdk::AndroidToolchain;

/// Upper bound for one `exec-out screencap` frame.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

const DEVICE_SCREENSHOT_PATH: &str = "/sdcard/screenshot.png";

/// An emulator instance as reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningEmulator {
    pub serial: String,
    /// None when the identity query failed
    pub avd_name: Option<String>,
}

pub struct AdbBackend {
    runner: Arc<dyn CommandRunner>,
    toolchain: AndroidToolchain,
    poll_interval: Duration,
    /// Emulators spawned by `boot`, keyed by AVD name
    emulators: Mutex<HashMap<String, Box<dyn ChildProcess>>>,
}

impl AdbBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, toolchain: AndroidToolchain, poll_interval: Duration) -> Self {
        Self {
            runner,
            toolchain,
            poll_interval,
            emulators: Mutex::new(HashMap::new()),
        }
    }

    fn adb_path(&self) -> Result<&Path, DeviceError> {
        self.toolchain.adb.as_deref().ok_or_else(|| DeviceError::ToolUnavailable {
            tool: "adb".to_string(),
        })
    }

    async fn adb(&self, adb_args: Vec<String>) -> Result<CommandOutput> {
        let adb = self.adb_path()?;
        self.runner.run_checked(adb, &adb_args).await
    }

    async fn adb_serial(&self, serial: &str, rest: &[&str]) -> Result<CommandOutput> {
        let mut full = args(["-s", serial]);
        full.extend(rest.iter().map(|a| a.to_string()));
        self.adb(full).await
    }

    /// Emulator instances currently attached to adb, with their AVD names.
    pub async fn running_emulators(&self) -> Result<Vec<RunningEmulator>> {
        let output = self.adb(args(["devices"])).await?;
        let mut running = Vec::new();

        for serial in parse_adb_devices(&output.stdout_str()) {
            let avd_name = match self.adb_serial(&serial, &["emu", "avd", "name"]).await {
                Ok(out) => out
                    .stdout_str()
                    .lines()
                    .next()
                    .map(|line| line.trim().to_string())
                    .filter(|name| !name.is_empty()),
                Err(e) => {
                    debug!("could not identify {}: {:#}", serial, e);
                    None
                }
            };
            running.push(RunningEmulator { serial, avd_name });
        }

        Ok(running)
    }

    async fn running_or_empty(&self) -> Vec<RunningEmulator> {
        if self.toolchain.adb.is_none() {
            return Vec::new();
        }
        self.running_emulators().await.unwrap_or_else(|e| {
            warn!("failed to query running emulators: {:#}", e);
            Vec::new()
        })
    }

    async fn list_avds(&self, emulator: &Path) -> Result<Vec<String>> {
        let output = self.runner.run_checked(emulator, &args(["-list-avds"])).await?;
        Ok(parse_avd_list(&output.stdout_str()))
    }

    /// Map an AVD name or an `emulator-NNNN` serial to a running instance.
    pub async fn resolve(&self, device_id: &str) -> Result<RunningEmulator, DeviceError> {
        let running = self
            .running_emulators()
            .await
            .map_err(|e| DeviceError::command("adb devices", format!("{:#}", e)))?;
        running
            .into_iter()
            .find(|r| r.serial == device_id || r.avd_name.as_deref() == Some(device_id))
            .ok_or_else(|| DeviceError::NotRunning {
                device: device_id.to_string(),
            })
    }

    fn owns_emulator(&self, avd: &str) -> bool {
        let mut emulators = self.emulators.lock().unwrap_or_else(PoisonError::into_inner);
        let exited = match emulators.get_mut(avd) {
            Some(child) => child.has_exited(),
            None => return false,
        };
        if exited {
            emulators.remove(avd);
        }
        !exited
    }

    fn release_emulator(&self, avd: &str) {
        let removed = self
            .emulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(avd);
        if removed.is_some() {
            debug!("released emulator handle for {}", avd);
        }
    }

    async fn boot_completed_serial(&self, avd: &str) -> Option<String> {
        let running = self.running_emulators().await.ok()?;
        let instance = running.into_iter().find(|r| r.avd_name.as_deref() == Some(avd))?;
        let prop = self
            .adb_serial(&instance.serial, &["shell", "getprop", "sys.boot_completed"])
            .await
            .ok()?;
        (prop.stdout_str().trim() == "1").then_some(instance.serial)
    }

    /// Poll until the AVD reports `sys.boot_completed=1`. Transient query
    /// failures are ignored until the deadline, which also bounds each
    /// in-flight adb query.
    async fn wait_for_boot(&self, avd: &str, timeout: Duration) -> Result<String, DeviceError> {
        let started = Instant::now();
        let deadline = started + timeout;

        while Instant::now() < deadline {
            if !self.owns_emulator(avd) {
                return Err(DeviceError::command("emulator", format!("{} exited before boot completed", avd)));
            }
            match tokio::time::timeout_at(deadline, self.boot_completed_serial(avd)).await {
                Ok(Some(serial)) => {
                    info!("android emulator {} booted as {} after {:?}", avd, serial, started.elapsed());
                    return Ok(serial);
                }
                Ok(None) => {}
                Err(_) => break,
            }
            if tokio::time::timeout_at(deadline, tokio::time::sleep(self.poll_interval))
                .await
                .is_err()
            {
                break;
            }
        }

        warn!("android emulator {} did not finish booting within {:?}", avd, timeout);
        Err(DeviceError::BootTimeout {
            device: avd.to_string(),
            waited: started.elapsed(),
        })
    }

    async fn device_op(&self, device_id: &str, operation: &str, rest: &[&str]) -> OpResult {
        let result = async {
            let instance = self.resolve(device_id).await?;
            self.adb_serial(&instance.serial, rest)
                .await
                .map_err(|e| DeviceError::command("adb", format!("{:#}", e)))?;
            Ok::<_, DeviceError>(instance)
        }
        .await;

        match result {
            Ok(_) => OpResult::ok(),
            Err(e) => {
                warn!("adb {} on {} failed: {}", operation, device_id, e);
                OpResult::failed(e)
            }
        }
    }
}

/// Serials of emulator lines in the `device` state.
pub fn parse_adb_devices(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            let is_emulator = serial
                .strip_prefix("emulator-")
                .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()));
            (is_emulator && state == "device" && fields.next().is_none()).then(|| serial.to_string())
        })
        .collect()
}

/// AVD names from `emulator -list-avds`, skipping its log lines.
pub fn parse_avd_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains('|'))
        .map(str::to_string)
        .collect()
}

/// `adb shell input text` takes a single word; spaces go over as `%s`.
pub fn escape_input_text(text: &str) -> String {
    text.replace(' ', "%s")
}

#[async_trait]
impl DeviceBackend for AdbBackend {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list_devices(&self) -> Vec<Device> {
        let Some(emulator) = self.toolchain.emulator.as_deref() else {
            debug!("emulator binary unavailable, no AVDs listed");
            return Vec::new();
        };
        let avds = match self.list_avds(emulator).await {
            Ok(avds) => avds,
            Err(e) => {
                error!("failed to list android emulators: {:#}", e);
                return Vec::new();
            }
        };
        let running = self.running_or_empty().await;

        avds.into_iter()
            .map(|avd| {
                let serial = running
                    .iter()
                    .find(|r| r.avd_name.as_deref() == Some(avd.as_str()))
                    .map(|r| r.serial.clone());
                let state = match serial {
                    Some(_) => DeviceState::Booted,
                    None if self.owns_emulator(&avd) => DeviceState::Booting,
                    None => DeviceState::Shutdown,
                };
                Device::new(avd.clone(), Platform::Android, avd, "Android", state).with_serial(serial)
            })
            .collect()
    }

    async fn boot(&self, device_id: &str, timeout: Duration) -> Result<BootOutcome, DeviceError> {
        self.adb_path()?;
        let emulator: PathBuf = self
            .toolchain
            .emulator
            .clone()
            .ok_or_else(|| DeviceError::ToolUnavailable {
                tool: "emulator".to_string(),
            })?;

        if let Some(instance) = self
            .running_or_empty()
            .await
            .into_iter()
            .find(|r| r.avd_name.as_deref() == Some(device_id))
        {
            info!("android emulator {} is already running as {}", device_id, instance.serial);
            return Ok(BootOutcome {
                already_booted: true,
                serial: Some(instance.serial),
            });
        }

        info!("booting android emulator {}", device_id);
        let child = self
            .runner
            .spawn(
                &emulator,
                &args(["-avd", device_id, "-no-boot-anim", "-no-audio", "-gpu", "auto"]),
                SpawnMode::Detached,
            )
            .map_err(|e| DeviceError::command("emulator", format!("{:#}", e)))?;
        self.emulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string(), child);

        let serial = self.wait_for_boot(device_id, timeout).await?;
        Ok(BootOutcome {
            already_booted: false,
            serial: Some(serial),
        })
    }

    async fn shutdown(&self, device_id: &str) -> OpResult {
        let result = async {
            let instance = self.resolve(device_id).await?;
            self.adb_serial(&instance.serial, &["emu", "kill"])
                .await
                .map_err(|e| DeviceError::command("adb", format!("{:#}", e)))?;
            Ok::<_, DeviceError>(instance)
        }
        .await;

        match result {
            Ok(instance) => {
                self.release_emulator(device_id);
                if let Some(avd) = &instance.avd_name {
                    self.release_emulator(avd);
                }
                info!("shut down android emulator {}", instance.serial);
                OpResult::ok()
            }
            Err(e) => {
                warn!("adb shutdown of {} failed: {}", device_id, e);
                OpResult::failed(e)
            }
        }
    }

    async fn install_app(&self, device_id: &str, app_path: &Path) -> OpResult {
        let apk = app_path.to_string_lossy();
        self.device_op(device_id, "install", &["install", "-r", &apk]).await
    }

    async fn launch_app(&self, device_id: &str, app_id: &str, activity: Option<&str>) -> OpResult {
        let component = match activity {
            Some(activity) => format!("{}/{}", app_id, activity),
            None => app_id.to_string(),
        };
        self.device_op(device_id, "launch", &["shell", "am", "start", "-n", &component])
            .await
    }

    async fn send_touch(&self, device_id: &str, x: u32, y: u32) -> OpResult {
        let (x, y) = (x.to_string(), y.to_string());
        self.device_op(device_id, "tap", &["shell", "input", "tap", &x, &y]).await
    }

    async fn send_text(&self, device_id: &str, text: &str) -> OpResult {
        let escaped = escape_input_text(text);
        self.device_op(device_id, "text", &["shell", "input", "text", &escaped])
            .await
    }

    async fn send_key(&self, device_id: &str, key_code: u32) -> OpResult {
        let code = key_code.to_string();
        self.device_op(device_id, "key", &["shell", "input", "keyevent", &code])
            .await
    }

    async fn screenshot(&self, device_id: &str, output: &Path) -> OpResult {
        let result: Result<(), DeviceError> = async {
            let instance = self.resolve(device_id).await?;
            let serial = instance.serial.as_str();
            let dest = output.to_string_lossy();
            let capture = async {
                self.adb_serial(serial, &["shell", "screencap", "-p", DEVICE_SCREENSHOT_PATH])
                    .await?;
                self.adb_serial(serial, &["pull", DEVICE_SCREENSHOT_PATH, &dest]).await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = self.adb_serial(serial, &["shell", "rm", DEVICE_SCREENSHOT_PATH]).await {
                debug!("failed to remove {} on {}: {:#}", DEVICE_SCREENSHOT_PATH, serial, e);
            }
            capture.map_err(|e| DeviceError::command("adb", format!("{:#}", e)))
        }
        .await;

        if let Err(e) = &result {
            warn!("screenshot of {} failed: {}", device_id, e);
        }
        result.into()
    }

    async fn capture_frame(&self, handle: &str, _scratch: &Path) -> Result<Vec<u8>> {
        let output = self.adb_serial(handle, &["exec-out", "screencap", "-p"]).await?;
        if output.stdout.is_empty() {
            bail!("screencap on {} returned no data", handle);
        }
        if output.stdout.len() > MAX_FRAME_BYTES {
            bail!(
                "screencap on {} returned {} bytes, over the {} byte limit",
                handle,
                output.stdout.len(),
                MAX_FRAME_BYTES
            );
        }
        Ok(output.stdout)
    }
}
