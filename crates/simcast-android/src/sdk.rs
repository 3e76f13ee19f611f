use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use simcast_platform::resolver::ToolResolver;

/// Resolved locations of the SDK tools. Either may be missing; the backend
/// degrades per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidToolchain {
    pub adb: Option<PathBuf>,
    pub emulator: Option<PathBuf>,
}

impl AndroidToolchain {
    /// Look in `<sdk>/platform-tools/adb` and `<sdk>/emulator/emulator`
    /// first, then on `PATH`.
    pub fn resolve(sdk_root: Option<&Path>, resolver: &dyn ToolResolver) -> Self {
        let adb_candidates: Vec<PathBuf> = sdk_root
            .map(|root| vec![root.join("platform-tools").join("adb")])
            .unwrap_or_default();
        let emulator_candidates: Vec<PathBuf> = sdk_root
            .map(|root| vec![root.join("emulator").join("emulator")])
            .unwrap_or_default();

        let toolchain = Self {
            adb: resolver.resolve("adb", &adb_candidates),
            emulator: resolver.resolve("emulator", &emulator_candidates),
        };

        match (&toolchain.adb, &toolchain.emulator) {
            (Some(adb), Some(emulator)) => {
                debug!("android tools: adb={} emulator={}", adb.display(), emulator.display())
            }
            (None, _) => warn!("adb not found, android device control disabled"),
            (_, None) => warn!("emulator binary not found, AVDs will not be listed"),
        }
        toolchain
    }
}

/// `ANDROID_HOME`, then `ANDROID_SDK_ROOT`, then `~/Library/Android/sdk`.
pub fn default_sdk_root() -> Option<PathBuf> {
    ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .find(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join("Library/Android/sdk")))
}
