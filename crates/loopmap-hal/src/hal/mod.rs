//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for host operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod device_ops;
pub mod fake_hal;
pub mod guards;
pub mod linux_hal;
pub mod loop_ops;
pub mod process_ops;
pub mod system_ops;

pub use device_ops::DeviceOps;
pub use fake_hal::{FakeHal, FakeResponse, Operation};
pub use guards::LoopGuard;
pub use linux_hal::LinuxHal;
pub use loop_ops::LoopOps;
pub use process_ops::{combined_output, render_command, CommandTranscript, ProcessOps};
pub use system_ops::SystemOps;

/// Complete HAL combining all host operation traits needed to map an image.
pub trait MapperHal: ProcessOps + LoopOps + DeviceOps + SystemOps + Send + Sync {}

/// Automatically implement MapperHal for any type implementing all required traits.
impl<T> MapperHal for T where T: ProcessOps + LoopOps + DeviceOps + SystemOps + Send + Sync {}
