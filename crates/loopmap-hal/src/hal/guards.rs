use crate::{CommandTranscript, HalResult, LoopOps};
use std::fmt;
use std::sync::Arc;

/// RAII guard that detaches a loop device when dropped.
///
/// Release happens exactly once: either through [`LoopGuard::detach`], which reports the
/// error to the caller, or on drop, which only logs it.
pub struct LoopGuard<H: LoopOps + ?Sized> {
    hal: Arc<H>,
    loop_device: String,
    partition_mappings: bool,
    active: bool,
}

impl<H: LoopOps + ?Sized> LoopGuard<H> {
    pub fn new(hal: Arc<H>, loop_device: impl Into<String>) -> Self {
        Self {
            hal,
            loop_device: loop_device.into(),
            partition_mappings: false,
            active: true,
        }
    }

    /// The device also carries kpartx mappings that must be removed before detaching.
    pub fn with_partition_mappings(mut self) -> Self {
        self.partition_mappings = true;
        self
    }

    pub fn device(&self) -> &str {
        &self.loop_device
    }

    /// Detach now and report the outcome. `report` sees each command that succeeded.
    pub fn detach(mut self, report: impl FnMut(&CommandTranscript)) -> HalResult<()> {
        self.active = false;
        detach_loop(
            self.hal.as_ref(),
            &self.loop_device,
            self.partition_mappings,
            report,
        )
    }
}

/// Remove partition mappings (if any), then detach the loop device if the kernel still has it.
///
/// Both steps are attempted; the first error wins.
fn detach_loop<H: LoopOps + ?Sized>(
    hal: &H,
    loop_device: &str,
    partition_mappings: bool,
    mut report: impl FnMut(&CommandTranscript),
) -> HalResult<()> {
    let mut first_err = None;

    if partition_mappings {
        match hal.kpartx_delete(loop_device) {
            Ok(transcript) => report(&transcript),
            Err(err) => {
                log::warn!("kpartx -d {} failed: {}", loop_device, err);
                first_err = Some(err);
            }
        }
    }

    // kpartx may already have released an autoclear loop device.
    let attached = hal.loop_is_attached(loop_device).unwrap_or(true);
    if attached {
        match hal.losetup_detach(loop_device) {
            Ok(transcript) => report(&transcript),
            Err(err) => {
                first_err.get_or_insert(err);
            }
        }
    } else {
        log::debug!("{} already detached", loop_device);
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl<H: LoopOps + ?Sized> fmt::Debug for LoopGuard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopGuard")
            .field("loop_device", &self.loop_device)
            .field("partition_mappings", &self.partition_mappings)
            .field("active", &self.active)
            .finish()
    }
}

impl<H: LoopOps + ?Sized> Drop for LoopGuard<H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let report = |t: &CommandTranscript| log::debug!("{}", t.command);
        if let Err(err) = detach_loop(
            self.hal.as_ref(),
            &self.loop_device,
            self.partition_mappings,
            report,
        ) {
            log::warn!("loop guard failed to detach {}: {}", self.loop_device, err);
        }
    }
}
