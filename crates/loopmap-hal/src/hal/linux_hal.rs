//! Linux HAL implementation using real commands and the real `/dev`.

use super::{
    combined_output, render_command, CommandTranscript, DeviceOps, LoopOps, ProcessOps, SystemOps,
};
use crate::{sysfs, HalError, HalResult};
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::symlink;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const UDEV_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone)]
pub struct LinuxHal {
    command_timeout: Duration,
}

impl Default for LinuxHal {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxHal {
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Timeout applied to losetup/kpartx invocations.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> HalResult<CommandTranscript> {
        run_with_timeout(program, args, self.command_timeout)
    }
}

/// Run to completion within `timeout`; a non-zero exit becomes `CommandFailed`.
fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> HalResult<CommandTranscript> {
    let rendered = render_command(program, args);
    log::debug!("exec: {}", rendered);
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = output_with_timeout(program, &mut cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(CommandTranscript::from_output(rendered, &output))
}

fn map_command_err(program: &str, err: io::Error) -> HalError {
    if err.kind() == io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        output: combined_output(output),
    }
}

/// Read a child pipe to the end on its own thread.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for `child`, killing and reaping it once `timeout` has passed.
fn wait_or_kill(child: &mut Child, program: &str, timeout: Duration) -> HalResult<ExitStatus> {
    if let Some(status) = child.wait_timeout(timeout)? {
        return Ok(status);
    }
    log::warn!("{} still running after {}s, killing it", program, timeout.as_secs());
    let _ = child.kill();
    let _ = child.wait();
    Err(HalError::CommandTimeout {
        program: program.to_string(),
        timeout_secs: timeout.as_secs(),
    })
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    // losetup and kpartx never read stdin.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    // Both pipes drain concurrently so a chatty child cannot block on a full pipe.
    let stdout = drain_pipe(child.stdout.take());
    let stderr = drain_pipe(child.stderr.take());

    let status = wait_or_kill(&mut child, program, timeout);
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok(Output {
        status: status?,
        stdout,
        stderr,
    })
}

impl ProcessOps for LinuxHal {
    fn command_status_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> HalResult<()> {
        log::debug!("exec: {}", render_command(program, args));
        let mut cmd = Command::new(program);
        cmd.args(args).envs(env.iter().copied());
        let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

        let status = match timeout {
            Some(timeout) => wait_or_kill(&mut child, program, timeout)?,
            None => child.wait()?,
        };
        if status.success() {
            return Ok(());
        }
        Err(HalError::CommandFailed {
            program: program.to_string(),
            code: status.code(),
            output: String::new(),
        })
    }
}

impl LoopOps for LinuxHal {
    fn losetup_attach(&self, image: &Path, scan_partitions: bool) -> HalResult<CommandTranscript> {
        let image = image.display().to_string();
        let mut args = vec!["--find", "--show", "--verbose"];
        if scan_partitions {
            args.push("--partscan");
        }
        args.push(image.as_str());
        self.run_checked("losetup", &args)
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<CommandTranscript> {
        match self.run_checked("losetup", &["--detach", loop_device]) {
            Ok(transcript) => Ok(transcript),
            Err(HalError::CommandFailed { output, .. })
                if output.to_ascii_lowercase().contains("resource busy") =>
            {
                Err(HalError::DeviceBusy(format!("{}: {}", loop_device, output)))
            }
            Err(err) => Err(err),
        }
    }

    fn losetup_list(&self) -> HalResult<String> {
        Ok(self.run_checked("losetup", &["--list"])?.combined())
    }

    fn loop_is_attached(&self, loop_device: &str) -> HalResult<bool> {
        Ok(sysfs::block::loop_backing_file(Path::new(loop_device))?.is_some())
    }

    fn kpartx_add(&self, image: &Path) -> HalResult<CommandTranscript> {
        let image = image.display().to_string();
        self.run_checked("kpartx", &["-a", "-v", "-s", &image])
    }

    fn kpartx_delete(&self, loop_device: &str) -> HalResult<CommandTranscript> {
        self.run_checked("kpartx", &["-d", "-v", loop_device])
    }
}

impl DeviceOps for LinuxHal {
    fn device_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> HalResult<()> {
        symlink(target, link)?;
        Ok(())
    }

    fn remove_symlink(&self, link: &Path) -> HalResult<()> {
        match fs::symlink_metadata(link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                fs::remove_file(link)?;
                Ok(())
            }
            Ok(_) => Err(HalError::Other(format!(
                "refusing to remove {}: not a symlink",
                link.display()
            ))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_dir(&self, dir: &Path) -> HalResult<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}

impl SystemOps for LinuxHal {
    fn udev_settle(&self) -> HalResult<CommandTranscript> {
        run_with_timeout("udevadm", &["settle"], UDEV_SETTLE_TIMEOUT)
    }
}
