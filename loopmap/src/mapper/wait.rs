//! Bounded polling for device nodes that the kernel/udev create asynchronously.

use crate::errors::MapError;
use loopmap_hal::DeviceOps;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl DeviceWait {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Poll `path` every `wait.interval` until it exists or `wait.timeout` elapses.
///
/// Returns the time spent waiting.
pub fn wait_for_device<H: DeviceOps + ?Sized>(
    hal: &H,
    path: &Path,
    wait: DeviceWait,
) -> Result<Duration, MapError> {
    let start = Instant::now();
    loop {
        if hal.device_exists(path) {
            return Ok(start.elapsed());
        }
        let elapsed = start.elapsed();
        if elapsed >= wait.timeout {
            return Err(MapError::DeviceTimeout {
                path: path.to_path_buf(),
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        thread::sleep(wait.interval.min(wait.timeout - elapsed));
    }
}
