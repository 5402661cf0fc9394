//! loopmap: attach disk images to loop devices for the duration of a pipeline.
//!
//! [`steps::MapImageStep`] maps an image and publishes the device path in a
//! [`loopmap_workflow::StateBag`]; its cleanup detaches the device again.
//! Host access goes through [`loopmap_hal`].

pub mod cancel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod mapper;
pub mod steps;

pub use config::MapperConfig;
pub use errors::{MapError, MapResult};
pub use mapper::{AttachStrategy, DeviceNamespace, ImageMapper, MappedImage, PartitionDevice};
pub use steps::{MapImageStep, MapperState, RunCommandStep};
