use crate::config::ConfigError;
use crate::mapper::parse::ParseError;
use loopmap_hal::HalError;
use std::path::PathBuf;
use thiserror::Error;

pub type MapResult<T> = Result<T, MapError>;

#[derive(Error, Debug)]
pub enum MapError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Image {} is not a readable regular file", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Step already ran (state: {0})")]
    AlreadyRan(String),

    #[error("Device {} did not appear within {waited_ms}ms", path.display())]
    DeviceTimeout { path: PathBuf, waited_ms: u64 },

    #[error("Host lock {}: {reason}", path.display())]
    Lock { path: PathBuf, reason: String },
}
