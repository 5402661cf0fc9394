//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or a loop table.
//! Loop indices are handed out from a shared counter, so clones of one
//! `FakeHal` behave like a single host.

use super::{render_command, CommandTranscript, DeviceOps, LoopOps, ProcessOps, SystemOps};
use crate::{HalError, HalResult};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    LosetupAttach {
        image: PathBuf,
        scan_partitions: bool,
    },
    LosetupDetach {
        loop_device: String,
    },
    LosetupList,
    KpartxAdd {
        image: PathBuf,
    },
    KpartxDelete {
        loop_device: String,
    },
    Symlink {
        target: PathBuf,
        link: PathBuf,
    },
    RemoveSymlink {
        link: PathBuf,
    },
    ListDir {
        dir: PathBuf,
    },
    UdevSettle,
    Command {
        program: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
    },
}

/// Scripted result for the next attach call.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Command exits 0 and prints `stdout`.
    Output(String),
    /// Command exits with `code` and prints `output`.
    Failure { code: i32, output: String },
}

#[derive(Debug, Default)]
struct FakeHalState {
    operations: Vec<Operation>,
    next_loop_index: u32,
    partitions_per_image: u32,
    losetup_script: VecDeque<FakeResponse>,
    kpartx_script: VecDeque<FakeResponse>,
    detached: HashSet<String>,
    missing_paths: HashSet<PathBuf>,
    /// Remaining `device_exists` checks before a path appears.
    delayed_paths: HashMap<PathBuf, u32>,
    symlinks: BTreeMap<PathBuf, PathBuf>,
    failing_symlinks: bool,
    detach_failure: Option<String>,
    kpartx_delete_failure: Option<String>,
    command_failures: HashMap<String, i32>,
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl Default for FakeHal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState {
                partitions_per_image: 2,
                ..FakeHalState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeHalState> {
        // A panicking test thread must not hide the recorded operations from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start handing out loop indices from `index`.
    pub fn with_first_loop_index(self, index: u32) -> Self {
        self.lock().next_loop_index = index;
        self
    }

    /// Number of partitions the default kpartx output reports per image.
    pub fn with_partitions(self, count: u32) -> Self {
        self.lock().partitions_per_image = count;
        self
    }

    /// Script the next `losetup --find` result instead of allocating a device.
    pub fn push_losetup_response(&self, response: FakeResponse) {
        self.lock().losetup_script.push_back(response);
    }

    /// Script the next `kpartx -a` result instead of allocating a device.
    pub fn push_kpartx_response(&self, response: FakeResponse) {
        self.lock().kpartx_script.push_back(response);
    }

    /// `path` never shows up in `device_exists`.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.lock().missing_paths.insert(path.into());
    }

    /// `path` shows up after `checks` negative `device_exists` calls.
    pub fn appear_after(&self, path: impl Into<PathBuf>, checks: u32) {
        self.lock().delayed_paths.insert(path.into(), checks);
    }

    /// Every `create_symlink` call fails.
    pub fn fail_symlinks(&self) {
        self.lock().failing_symlinks = true;
    }

    /// Every `losetup --detach` fails with `output`.
    pub fn fail_detach(&self, output: impl Into<String>) {
        self.lock().detach_failure = Some(output.into());
    }

    /// Every `kpartx -d` fails with `output`.
    pub fn fail_kpartx_delete(&self, output: impl Into<String>) {
        self.lock().kpartx_delete_failure = Some(output.into());
    }

    /// Commands run through `ProcessOps` for `program` exit with `code`.
    pub fn fail_command(&self, program: impl Into<String>, code: i32) {
        self.lock().command_failures.insert(program.into(), code);
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.lock().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.lock().operations.iter().any(check)
    }

    /// Count operations matching `check`.
    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.lock().operations.iter().filter(|op| check(op)).count()
    }

    /// Symlinks currently present, `link -> target`.
    pub fn symlinks(&self) -> BTreeMap<PathBuf, PathBuf> {
        self.lock().symlinks.clone()
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        self.lock().operations.clear();
    }

    fn record_operation(&self, op: Operation) {
        self.lock().operations.push(op);
    }

    fn allocate_index(&self) -> u32 {
        let mut state = self.lock();
        let index = state.next_loop_index;
        state.next_loop_index += 1;
        index
    }
}

fn scripted(program: &str, command: String, response: FakeResponse) -> HalResult<CommandTranscript> {
    match response {
        FakeResponse::Output(stdout) => Ok(CommandTranscript::new(command, stdout)),
        FakeResponse::Failure { code, output } => Err(HalError::CommandFailed {
            program: program.to_string(),
            code: Some(code),
            output,
        }),
    }
}

impl ProcessOps for FakeHal {
    fn command_status_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        _timeout: Option<Duration>,
    ) -> HalResult<()> {
        log::info!("FAKE HAL: {}", render_command(program, args));
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        if let Some(code) = self.lock().command_failures.get(program).copied() {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: Some(code),
                output: String::new(),
            });
        }
        Ok(())
    }
}

impl LoopOps for FakeHal {
    fn losetup_attach(&self, image: &Path, scan_partitions: bool) -> HalResult<CommandTranscript> {
        self.record_operation(Operation::LosetupAttach {
            image: image.to_path_buf(),
            scan_partitions,
        });
        let command = format!("losetup --find --show --verbose {}", image.display());
        let next = self.lock().losetup_script.pop_front();
        if let Some(response) = next {
            return scripted("losetup", command, response);
        }

        let index = self.allocate_index();
        log::info!("FAKE HAL: {} -> /dev/loop{}", image.display(), index);
        Ok(CommandTranscript::new(command, format!("/dev/loop{}\n", index)))
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<CommandTranscript> {
        self.record_operation(Operation::LosetupDetach {
            loop_device: loop_device.to_string(),
        });
        let mut state = self.lock();
        if let Some(output) = state.detach_failure.clone() {
            return Err(HalError::CommandFailed {
                program: "losetup".to_string(),
                code: Some(1),
                output,
            });
        }
        state.detached.insert(loop_device.to_string());
        Ok(CommandTranscript::new(
            format!("losetup --detach {}", loop_device),
            "",
        ))
    }

    fn losetup_list(&self) -> HalResult<String> {
        self.record_operation(Operation::LosetupList);
        Ok("NAME SIZELIMIT OFFSET AUTOCLEAR RO BACK-FILE DIO LOG-SEC".to_string())
    }

    fn loop_is_attached(&self, loop_device: &str) -> HalResult<bool> {
        Ok(!self.lock().detached.contains(loop_device))
    }

    fn kpartx_add(&self, image: &Path) -> HalResult<CommandTranscript> {
        self.record_operation(Operation::KpartxAdd {
            image: image.to_path_buf(),
        });
        let command = format!("kpartx -a -v -s {}", image.display());
        let next = self.lock().kpartx_script.pop_front();
        if let Some(response) = next {
            return scripted("kpartx", command, response);
        }

        let index = self.allocate_index();
        let partitions = self.lock().partitions_per_image;
        let mut stdout = String::new();
        for part in 1..=partitions {
            stdout.push_str(&format!(
                "add map loop{index}p{part} (253:{minor}): 0 204800 linear 7:{index} {start}\n",
                minor = part - 1,
                start = 2048 + (part - 1) * 204800,
            ));
        }
        Ok(CommandTranscript::new(command, stdout))
    }

    fn kpartx_delete(&self, loop_device: &str) -> HalResult<CommandTranscript> {
        self.record_operation(Operation::KpartxDelete {
            loop_device: loop_device.to_string(),
        });
        if let Some(output) = self.lock().kpartx_delete_failure.clone() {
            return Err(HalError::CommandFailed {
                program: "kpartx".to_string(),
                code: Some(1),
                output,
            });
        }
        Ok(CommandTranscript::new(
            format!("kpartx -d -v {}", loop_device),
            format!("del devmap : {}\n", loop_device.trim_start_matches("/dev/")),
        ))
    }
}

impl DeviceOps for FakeHal {
    fn device_exists(&self, path: &Path) -> bool {
        let mut state = self.lock();
        if state.missing_paths.contains(path) {
            return false;
        }
        if let Some(remaining) = state.delayed_paths.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return false;
            }
        }
        true
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> HalResult<()> {
        self.record_operation(Operation::Symlink {
            target: target.to_path_buf(),
            link: link.to_path_buf(),
        });
        let mut state = self.lock();
        if state.failing_symlinks {
            return Err(HalError::PermissionDenied);
        }
        if state.symlinks.contains_key(link) {
            return Err(HalError::Io(std::io::Error::from(
                std::io::ErrorKind::AlreadyExists,
            )));
        }
        state
            .symlinks
            .insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn remove_symlink(&self, link: &Path) -> HalResult<()> {
        self.record_operation(Operation::RemoveSymlink {
            link: link.to_path_buf(),
        });
        self.lock().symlinks.remove(link);
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> HalResult<Vec<String>> {
        self.record_operation(Operation::ListDir {
            dir: dir.to_path_buf(),
        });
        Ok(vec!["loop-control".to_string(), "mapper".to_string()])
    }
}

impl SystemOps for FakeHal {
    fn udev_settle(&self) -> HalResult<CommandTranscript> {
        self.record_operation(Operation::UdevSettle);
        Ok(CommandTranscript::new("udevadm settle", ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_hal_allocates_distinct_loop_devices() {
        let hal = FakeHal::new().with_first_loop_index(3);
        let a = hal.losetup_attach(Path::new("/tmp/a.img"), true).unwrap();
        let b = hal.losetup_attach(Path::new("/tmp/b.img"), true).unwrap();

        assert_eq!(a.stdout.trim(), "/dev/loop3");
        assert_eq!(b.stdout.trim(), "/dev/loop4");
        assert_eq!(hal.operation_count(), 2);
    }

    #[test]
    fn fake_hal_kpartx_reports_partitions() {
        let hal = FakeHal::new().with_first_loop_index(7).with_partitions(3);
        let out = hal.kpartx_add(Path::new("/tmp/a.img")).unwrap();

        assert_eq!(out.stdout.lines().count(), 3);
        assert!(out.stdout.starts_with("add map loop7p1 (253:0)"));
        assert!(hal.has_operation(|op| matches!(op, Operation::KpartxAdd { .. })));
    }

    #[test]
    fn fake_hal_scripted_failure() {
        let hal = FakeHal::new();
        hal.push_losetup_response(FakeResponse::Failure {
            code: 1,
            output: "losetup: cannot find an unused loop device".to_string(),
        });

        let err = hal
            .losetup_attach(Path::new("/tmp/a.img"), true)
            .unwrap_err();
        assert!(matches!(err, HalError::CommandFailed { code: Some(1), .. }));

        // The script is consumed; the next call allocates normally.
        assert!(hal.losetup_attach(Path::new("/tmp/a.img"), true).is_ok());
    }

    #[test]
    fn fake_hal_tracks_detach() {
        let hal = FakeHal::new();
        assert!(hal.loop_is_attached("/dev/loop0").unwrap());
        hal.losetup_detach("/dev/loop0").unwrap();
        assert!(!hal.loop_is_attached("/dev/loop0").unwrap());
    }

    #[test]
    fn fake_hal_delayed_device_appears() {
        let hal = FakeHal::new();
        let path = Path::new("/dev/mapper/loop0p1");
        hal.appear_after(path, 2);

        assert!(!hal.device_exists(path));
        assert!(!hal.device_exists(path));
        assert!(hal.device_exists(path));
    }

    #[test]
    fn fake_hal_command_failure() {
        let hal = FakeHal::new();
        hal.fail_command("false", 1);
        let err = hal
            .command_status_with_env("false", &[], &[], None)
            .unwrap_err();
        assert!(matches!(err, HalError::CommandFailed { code: Some(1), .. }));
        assert!(hal.command_status_with_env("true", &[], &[], None).is_ok());
    }

    #[test]
    fn fake_hal_can_clear() {
        let hal = FakeHal::new();
        hal.udev_settle().unwrap();
        assert_eq!(hal.operation_count(), 1);
        hal.clear();
        assert_eq!(hal.operation_count(), 0);
    }
}
