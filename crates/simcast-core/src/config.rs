use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the frame server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Frame server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Android SDK root (falls back to ANDROID_HOME / ANDROID_SDK_ROOT)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_sdk_root: Option<PathBuf>,

    /// Capture rate for iOS sessions
    #[serde(default = "default_fps")]
    pub ios_fps: u32,

    /// Capture rate for Android sessions with a mirror running
    #[serde(default = "default_fps")]
    pub android_fps: u32,

    /// Capture rate for Android sessions pulling frames without a mirror
    #[serde(default = "default_android_fallback_fps")]
    pub android_fallback_fps: u32,

    #[serde(default = "default_boot_timeout")]
    pub boot_timeout_secs: u64,

    #[serde(default = "default_boot_poll_interval")]
    pub boot_poll_interval_ms: u64,

    /// Window lookups made when an iOS session starts
    #[serde(default = "default_window_discovery_attempts")]
    pub window_discovery_attempts: u32,

    #[serde(default = "default_window_discovery_interval")]
    pub window_discovery_interval_ms: u64,

    /// Process that owns the simulator windows
    #[serde(default = "default_compositor_process")]
    pub compositor_process: String,

    /// Intermediate capture files live here; removed on shutdown
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Frames buffered per subscriber before it starts skipping
    #[serde(default = "default_frame_channel_capacity")]
    pub frame_channel_capacity: usize,

    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_fps")]
    pub max_fps: u32,

    /// Video bit rate in bits per second
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u64,

    /// Checked after the well-known install locations, before PATH
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_paths: Vec<PathBuf>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_port() -> u16 {
    8765
}
fn default_fps() -> u32 {
    30
}
fn default_android_fallback_fps() -> u32 {
    10
}
fn default_boot_timeout() -> u64 {
    60
}
fn default_boot_poll_interval() -> u64 {
    1000
}
fn default_window_discovery_attempts() -> u32 {
    10
}
fn default_window_discovery_interval() -> u64 {
    1000
}
fn default_compositor_process() -> String {
    "Simulator".to_string()
}
fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("simcast-capture")
}
fn default_frame_channel_capacity() -> usize {
    16
}
fn default_true() -> bool {
    true
}
fn default_bit_rate() -> u64 {
    8_000_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            android_sdk_root: None,
            ios_fps: default_fps(),
            android_fps: default_fps(),
            android_fallback_fps: default_android_fallback_fps(),
            boot_timeout_secs: default_boot_timeout(),
            boot_poll_interval_ms: default_boot_poll_interval(),
            window_discovery_attempts: default_window_discovery_attempts(),
            window_discovery_interval_ms: default_window_discovery_interval(),
            compositor_process: default_compositor_process(),
            scratch_dir: default_scratch_dir(),
            frame_channel_capacity: default_frame_channel_capacity(),
            mirror: MirrorConfig::default(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_fps: default_fps(),
            bit_rate: default_bit_rate(),
            extra_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("dev", "simcast", "simcast") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("simcast-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Load if the file exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_interval_ms)
    }

    pub fn window_discovery_interval(&self) -> Duration {
        Duration::from_millis(self.window_discovery_interval_ms)
    }

    /// Explicit SDK root, else the environment defaults
    pub fn sdk_root(&self) -> Option<PathBuf> {
        self.android_sdk_root
            .clone()
            .or_else(simcast_android::sdk::default_sdk_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8765);
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:8765");
        assert_eq!(config.ios_fps, 30);
        assert_eq!(config.android_fallback_fps, 10);
        assert_eq!(config.boot_timeout(), Duration::from_secs(60));
        assert_eq!(config.compositor_process, "Simulator");
        assert!(config.mirror.enabled);
        assert_eq!(config.mirror.bit_rate, 8_000_000);
    }

    #[test]
    fn test_partial_override() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"port": 9000, "mirror": {"enabled": false}}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.mirror.enabled);
        assert_eq!(config.mirror.max_fps, 30);
        assert_eq!(config.window_discovery_attempts, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("simcast-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let mut config = EngineConfig::default();
        config.android_fps = 24;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.android_fps, 24);
        assert!(EngineConfig::load_or_default(&dir.join("missing.json")).is_ok());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
