//! Host process execution backed by `tokio::process`.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use simcast_platform::command::{ChildProcess, CommandOutput, CommandRunner, SpawnMode};

/// The production runner: real processes, stdio captured for `run` and
/// discarded for `spawn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!("run: {} {}", program.display(), args.join(" "));
        // An aborted session drops this future; the tool must not outlive it
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", program.display()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn spawn(&self, program: &Path, args: &[String], mode: SpawnMode) -> Result<Box<dyn ChildProcess>> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        if mode == SpawnMode::Detached {
            // Own process group: terminal signals to us don't reach it
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        debug!("spawned {} (pid {:?}, {:?})", program.display(), child.id(), mode);

        Ok(Box::new(SystemChild {
            child,
            mode,
            terminated: false,
        }))
    }
}

struct SystemChild {
    child: Child,
    mode: SpawnMode,
    terminated: bool,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        // Already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)
                .with_context(|| format!("failed to signal pid {}", pid))?;
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .with_context(|| format!("failed to kill pid {}", pid))?;
        }
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!("failed to poll child {:?}: {}", self.child.id(), e);
                true
            }
        }
    }
}

impl Drop for SystemChild {
    fn drop(&mut self) {
        if self.mode == SpawnMode::Owned && !self.has_exited() {
            if let Err(e) = self.terminate() {
                warn!("failed to terminate child on drop: {:#}", e);
            }
        }
    }
}
