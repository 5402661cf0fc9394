//! Mapper configuration: TOML file with defaults, overridden by CLI flags.

use crate::mapper::wait::DeviceWait;
use crate::mapper::{AttachStrategy, DeviceNamespace};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RESULT_KEY: &str = "device";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("image_path is not set")]
    MissingImagePath,

    #[error("image {} is not a readable regular file", .0.display())]
    ImageNotFound(PathBuf),

    #[error("result_key must not be empty")]
    EmptyResultKey,

    #[error("command_timeout_secs must be greater than zero")]
    ZeroCommandTimeout,

    #[error("device_poll_interval_ms must be greater than zero")]
    ZeroPollInterval,

    #[error("device_poll_interval_ms ({interval_ms}) exceeds device_wait_ms ({wait_ms})")]
    PollIntervalExceedsWait { interval_ms: u64, wait_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapperConfig {
    pub image_path: Option<PathBuf>,
    /// Context key the published device path is stored under.
    pub result_key: String,
    pub strategy: AttachStrategy,
    pub namespace: DeviceNamespace,
    /// Link `/dev/loop<N>p<M>` to its mapper node (partition-aware only).
    pub create_symlinks: bool,
    pub dev_dir: PathBuf,
    pub command_timeout_secs: u64,
    pub device_wait_ms: u64,
    pub device_poll_interval_ms: u64,
    pub attach_retries: u32,
    pub attach_retry_delay_ms: u64,
    pub lock_file: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub diagnostics: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            result_key: DEFAULT_RESULT_KEY.to_string(),
            strategy: AttachStrategy::default(),
            namespace: DeviceNamespace::default(),
            create_symlinks: true,
            dev_dir: PathBuf::from("/dev"),
            command_timeout_secs: 60,
            device_wait_ms: 10_000,
            device_poll_interval_ms: 100,
            attach_retries: 2,
            attach_retry_delay_ms: 500,
            lock_file: None,
            lock_timeout_ms: 30_000,
            diagnostics: false,
        }
    }
}

impl MapperConfig {
    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image_path = Some(image.into());
        self
    }

    /// Read a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse mapper config TOML")
    }

    /// Check everything that must hold before any command runs.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let image = self
            .image_path
            .as_deref()
            .ok_or(ConfigError::MissingImagePath)?;
        if !is_regular_file(image) {
            return Err(ConfigError::ImageNotFound(image.to_path_buf()));
        }
        if self.result_key.trim().is_empty() {
            return Err(ConfigError::EmptyResultKey);
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::ZeroCommandTimeout);
        }
        if self.device_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.device_poll_interval_ms > self.device_wait_ms {
            return Err(ConfigError::PollIntervalExceedsWait {
                interval_ms: self.device_poll_interval_ms,
                wait_ms: self.device_wait_ms,
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn device_wait(&self) -> DeviceWait {
        DeviceWait::new(
            Duration::from_millis(self.device_wait_ms),
            Duration::from_millis(self.device_poll_interval_ms),
        )
    }

    pub fn attach_retry_delay(&self) -> Duration {
        Duration::from_millis(self.attach_retry_delay_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

pub(crate) fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
