//! loopmap host abstraction layer.
//!
//! Everything that touches the host (external commands, the loop device table,
//! device nodes under `/dev`) goes through the traits in [`hal`] so the mapping
//! step can be exercised with [`FakeHal`] without root or real hardware.

pub mod error;
pub mod hal;
pub mod sysfs;

pub use error::{HalError, HalResult};
pub use hal::{
    combined_output, render_command, CommandTranscript, DeviceOps, FakeHal, FakeResponse,
    LinuxHal, LoopGuard, LoopOps, MapperHal, Operation, ProcessOps, SystemOps,
};
