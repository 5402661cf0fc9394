use thiserror::Error;

pub type HalResult<T> = std::result::Result<T, HalError>;

/// Output fragments that identify loop table contention rather than a real failure.
const CONTENTION_MARKERS: &[&str] = &[
    "device or resource busy",
    "could not find any free loop device",
    "no free loop device",
];

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Device is busy: {0}")]
    DeviceBusy(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// True when a failed command reported loop table contention (another
    /// process claimed the device between the kernel's find and claim).
    pub fn is_contention(&self) -> bool {
        match self {
            HalError::DeviceBusy(_) => true,
            HalError::CommandFailed { output, .. } => {
                let output = output.to_ascii_lowercase();
                CONTENTION_MARKERS.iter().any(|m| output.contains(m))
            }
            _ => false,
        }
    }

    /// The target path was already taken (e.g. a symlink or node created by udev).
    pub fn is_already_exists(&self) -> bool {
        matches!(self, HalError::Io(err) if err.kind() == std::io::ErrorKind::AlreadyExists)
    }

    /// Combined command output attached to the error, if any.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            HalError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
