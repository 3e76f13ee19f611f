//! Scripted stand-ins for host tools, shared by the backend crates' tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::command::{ChildProcess, CommandOutput, CommandRunner, SpawnMode};

type Handler = dyn Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync;

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A spawned fake child, with flags the test can observe or flip.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub program: String,
    pub args: Vec<String>,
    pub mode: SpawnMode,
    pub terminated: Arc<AtomicBool>,
    pub exited: Arc<AtomicBool>,
}

impl SpawnRecord {
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Simulate the process exiting by itself
    pub fn exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

struct FakeChild {
    pid: u32,
    terminated: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst) || self.terminated.load(Ordering::SeqCst)
    }
}

/// Answers every `run` through a handler keyed on the program's file name
/// and records all invocations.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<Invocation>>,
    spawns: Mutex<Vec<SpawnRecord>>,
    fail_spawns: bool,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            spawns: Mutex::new(Vec::new()),
            fail_spawns: false,
        }
    }

    /// A runner for which every command fails to start
    pub fn unavailable() -> Self {
        Self::new(|program, _| bail!("{}: not found", program))
    }

    pub fn failing_spawns(mut self) -> Self {
        self.fail_spawns = true;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.spawns.lock().unwrap().clone()
    }
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let name = program_name(program);
        self.calls.lock().unwrap().push(Invocation {
            program: name.clone(),
            args: args.to_vec(),
        });
        (self.handler)(&name, args)
    }

    fn spawn(&self, program: &Path, args: &[String], mode: SpawnMode) -> Result<Box<dyn ChildProcess>> {
        if self.fail_spawns {
            bail!("failed to spawn {}", program.display());
        }
        let mut spawns = self.spawns.lock().unwrap();
        let record = SpawnRecord {
            program: program_name(program),
            args: args.to_vec(),
            mode,
            terminated: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
        };
        let child = FakeChild {
            pid: 40_000 + spawns.len() as u32,
            terminated: record.terminated.clone(),
            exited: record.exited.clone(),
        };
        spawns.push(record);
        Ok(Box::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::args;

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let runner = ScriptedRunner::new(|program, _| match program {
            "adb" => Ok(CommandOutput::failed(1, "error: no devices/emulators found\n")),
            _ => Ok(CommandOutput::ok("ok")),
        });

        let err = runner
            .run_checked(Path::new("/sdk/platform-tools/adb"), &args(["devices"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no devices/emulators found"));

        let out = runner.run_checked(Path::new("xcrun"), &args(["simctl"])).await.unwrap();
        assert_eq!(out.stdout_str(), "ok");
        assert_eq!(runner.command_lines(), vec!["adb devices", "xcrun simctl"]);
    }

    #[test]
    fn test_spawn_records_and_terminates() {
        let runner = ScriptedRunner::new(|_, _| Ok(CommandOutput::ok("")));
        let mut child = runner
            .spawn(Path::new("/usr/bin/scrcpy"), &args(["-s", "emulator-5554"]), SpawnMode::Owned)
            .unwrap();
        assert!(!child.has_exited());
        child.terminate().unwrap();

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].program, "scrcpy");
        assert!(spawned[0].is_terminated());
    }
}
