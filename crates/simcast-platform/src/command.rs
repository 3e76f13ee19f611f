use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Captured result of a finished external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// How a long-lived child is attached to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Killed when its owner terminates it or drops the handle
    Owned,
    /// Own process group, survives this process exiting
    Detached,
}

/// An explicitly owned child process handle.
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Send a termination signal. Must not block.
    fn terminate(&mut self) -> Result<()>;

    /// Non-blocking exit check; reaps the child if it has exited.
    fn has_exited(&mut self) -> bool;
}

/// Runs host tools. Every external invocation in the engine goes through
/// this so tests can script the tools' behavior.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. Errors only if the program
    /// could not be started; a non-zero exit is reported in the output.
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;

    /// Start a long-lived process with stdio ignored
    fn spawn(&self, program: &Path, args: &[String], mode: SpawnMode)
        -> Result<Box<dyn ChildProcess>>;

    /// Run and fail on non-zero exit, with stderr as the message
    async fn run_checked(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(program, args).await?;
        if !output.success {
            let stderr = output.stderr_str();
            let stderr = stderr.trim();
            match output.code {
                Some(code) if stderr.is_empty() => bail!("{} exited with {}", program.display(), code),
                Some(code) => bail!("{} exited with {}: {}", program.display(), code, stderr),
                None if stderr.is_empty() => bail!("{} terminated by signal", program.display()),
                None => bail!("{} terminated by signal: {}", program.display(), stderr),
            }
        }
        Ok(output)
    }
}

/// Build an owned argument vector from string literals and formatted values.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
