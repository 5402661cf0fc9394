//! Helpers related to loop block devices in sysfs.

use crate::{HalError, HalResult};
use std::fs;
use std::path::{Path, PathBuf};

pub const SYS_BLOCK_ROOT: &str = "/sys/block";

pub fn device_basename(path: &Path) -> HalResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| HalError::Parse(format!("invalid device path {}", path.display())))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Reads `<sys_block_root>/<loopN>/loop/backing_file`.
///
/// Returns `None` when the device does not exist or has nothing attached.
pub fn loop_backing_file_in(sys_block_root: &Path, loop_name: &str) -> Option<PathBuf> {
    let raw = fs::read_to_string(sys_block_root.join(loop_name).join("loop/backing_file")).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

pub fn loop_backing_file(loop_device: &Path) -> HalResult<Option<PathBuf>> {
    let name = device_basename(loop_device)?;
    Ok(loop_backing_file_in(Path::new(SYS_BLOCK_ROOT), &name))
}
