//! scrcpy as an optional display side channel for Android sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use simcast_platform::command::{args, ChildProcess, CommandRunner, SpawnMode};
use simcast_platform::resolver::ToolResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSettings {
    pub max_fps: u32,
    pub bit_rate: u64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            max_fps: 30,
            bit_rate: 8_000_000,
        }
    }
}

/// Well-known install locations, checked before `PATH`.
pub fn candidate_paths(home: Option<&Path>, extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/opt/homebrew/bin/scrcpy"),
        PathBuf::from("/usr/local/bin/scrcpy"),
        PathBuf::from("/usr/bin/scrcpy"),
    ];
    if let Some(home) = home {
        paths.push(home.join("scrcpy").join("scrcpy"));
    }
    paths.extend(extra.iter().cloned());
    paths
}

pub struct MirrorLauncher {
    runner: Arc<dyn CommandRunner>,
    binary: Option<PathBuf>,
    settings: MirrorSettings,
}

impl MirrorLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: Option<PathBuf>, settings: MirrorSettings) -> Self {
        Self {
            runner,
            binary,
            settings,
        }
    }

    /// Resolve the binary once; a missing tool disables mirroring.
    pub fn discover(
        runner: Arc<dyn CommandRunner>,
        resolver: &dyn ToolResolver,
        extra_paths: &[PathBuf],
        settings: MirrorSettings,
    ) -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let binary = resolver.resolve("scrcpy", &candidate_paths(home.as_deref(), extra_paths));
        match &binary {
            Some(path) => debug!("scrcpy found at {}", path.display()),
            None => info!("scrcpy not found, android capture will pull frames only"),
        }
        Self::new(runner, binary, settings)
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn launch_args(&self, serial: &str) -> Vec<String> {
        args([
            "-s".to_string(),
            serial.to_string(),
            "--max-fps".to_string(),
            self.settings.max_fps.to_string(),
            "--bit-rate".to_string(),
            self.settings.bit_rate.to_string(),
            "--window-title".to_string(),
            format!("simcast - {}", serial),
            "--stay-awake".to_string(),
            "--no-audio".to_string(),
        ])
    }

    /// Start mirroring `serial`. Returns None when scrcpy is not installed.
    pub fn launch(&self, serial: &str) -> Result<Option<Box<dyn ChildProcess>>> {
        let Some(binary) = &self.binary else {
            return Ok(None);
        };
        let child = self
            .runner
            .spawn(binary, &self.launch_args(serial), SpawnMode::Owned)
            .with_context(|| format!("failed to start scrcpy for {}", serial))?;
        info!("scrcpy mirroring {} (pid {:?})", serial, child.id());
        Ok(Some(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcast_platform::command::CommandOutput;
    use simcast_platform::resolver::FixedResolver;
    use simcast_platform::testing::ScriptedRunner;

    fn runner() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))))
    }

    #[test]
    fn test_candidate_order() {
        let paths = candidate_paths(Some(Path::new("/Users/dev")), &[PathBuf::from("/tools/scrcpy")]);
        assert_eq!(paths[0], PathBuf::from("/opt/homebrew/bin/scrcpy"));
        assert_eq!(paths[3], PathBuf::from("/Users/dev/scrcpy/scrcpy"));
        assert_eq!(paths.last(), Some(&PathBuf::from("/tools/scrcpy")));
    }

    #[test]
    fn test_launch_spawns_owned_process() {
        let runner = runner();
        let resolver = FixedResolver::new().with("scrcpy", "/opt/homebrew/bin/scrcpy");
        let launcher = MirrorLauncher::discover(runner.clone(), &resolver, &[], MirrorSettings::default());
        assert!(launcher.is_available());

        let child = launcher.launch("emulator-5554").unwrap();
        assert!(child.is_some());

        let spawned = runner.spawned();
        assert_eq!(spawned[0].mode, SpawnMode::Owned);
        assert_eq!(
            spawned[0].args,
            vec![
                "-s",
                "emulator-5554",
                "--max-fps",
                "30",
                "--bit-rate",
                "8000000",
                "--window-title",
                "simcast - emulator-5554",
                "--stay-awake",
                "--no-audio",
            ]
        );
    }

    #[test]
    fn test_missing_binary_disables_mirror() {
        let runner = runner();
        let launcher = MirrorLauncher::discover(runner.clone(), &FixedResolver::new(), &[], MirrorSettings::default());
        assert!(!launcher.is_available());
        assert!(launcher.launch("emulator-5554").unwrap().is_none());
        assert!(runner.spawned().is_empty());
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::new(|_, _| Ok(CommandOutput::ok(""))).failing_spawns());
        let launcher = MirrorLauncher::new(runner, Some(PathBuf::from("/usr/bin/scrcpy")), MirrorSettings::default());
        assert!(launcher.launch("emulator-5554").is_err());
    }
}
