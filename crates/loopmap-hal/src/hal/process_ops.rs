//! Process execution helpers.
//!
//! External commands are considered "world-touching" and must go through the HAL so we can
//! test workflows without spawning real processes.

use crate::HalResult;
use std::process::Output;
use std::time::Duration;

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Run a command with inherited stdio and extra environment variables.
    ///
    /// `timeout = None` waits for as long as the command runs. A non-zero exit is reported as
    /// `HalError::CommandFailed`.
    fn command_status_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> HalResult<()>;
}

/// What a command printed, kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTranscript {
    /// Rendered command line, e.g. `kpartx -a -v -s /tmp/disk.img`.
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandTranscript {
    pub fn new(command: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn from_output(command: impl Into<String>, output: &Output) -> Self {
        Self {
            command: command.into(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }

    /// stdout followed by stderr, the way a terminal would interleave a short run.
    pub fn combined(&self) -> String {
        join_streams(&self.stdout, &self.stderr)
    }
}

/// Combined stdout + stderr of a finished process, trimmed.
pub fn combined_output(output: &Output) -> String {
    join_streams(
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    )
}

/// Render `program args...` for log lines.
pub fn render_command(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}
