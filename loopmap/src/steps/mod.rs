pub mod map_image;
pub mod run_command;

pub use map_image::{MapImageStep, MapperState};
pub use run_command::RunCommandStep;
