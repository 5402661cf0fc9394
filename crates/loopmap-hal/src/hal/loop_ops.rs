//! Loop device operations (losetup, kpartx).

use super::CommandTranscript;
use crate::HalResult;
use std::path::Path;

pub trait LoopOps {
    /// Attach `image` to a free loop device chosen by the kernel (`losetup --find --show`).
    ///
    /// Find and claim happen in one call, so no separate "list free devices" step exists.
    /// If `scan_partitions` is true, the loop device is created with partition scanning
    /// (equivalent to `losetup --partscan`). The transcript's stdout carries the device path.
    fn losetup_attach(&self, image: &Path, scan_partitions: bool) -> HalResult<CommandTranscript>;

    /// Detach a loop device.
    fn losetup_detach(&self, loop_device: &str) -> HalResult<CommandTranscript>;

    /// Human-readable loop table for diagnostics (`losetup --list`).
    fn losetup_list(&self) -> HalResult<String>;

    /// Whether the kernel still has a backing file attached to `loop_device`.
    fn loop_is_attached(&self, loop_device: &str) -> HalResult<bool>;

    /// Attach `image` and create device-mapper nodes for each partition (`kpartx -a -v -s`).
    fn kpartx_add(&self, image: &Path) -> HalResult<CommandTranscript>;

    /// Remove the partition mappings of `loop_device` (`kpartx -d -v`).
    fn kpartx_delete(&self, loop_device: &str) -> HalResult<CommandTranscript>;
}
