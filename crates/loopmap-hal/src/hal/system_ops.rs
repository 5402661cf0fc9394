//! System-level operations (udev settle).

use super::CommandTranscript;
use crate::HalResult;

/// System operations trait.
pub trait SystemOps {
    /// Best-effort udev settle (wait for block device events to quiesce).
    fn udev_settle(&self) -> HalResult<CommandTranscript>;
}
