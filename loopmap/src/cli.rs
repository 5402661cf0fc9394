//! CLI argument parsing for loopmap.

use crate::config::MapperConfig;
use crate::mapper::{AttachStrategy, DeviceNamespace};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loopmap")]
#[command(version)]
#[command(about = "Map disk images to loop devices and release them again")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file (CLI flags override its values)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Map an image, optionally run a command against it, then detach
    Map(MapArgs),

    /// Parse kpartx/losetup output from FILE (or stdin) and print it as JSON
    Parse {
        file: Option<PathBuf>,
    },

    /// Print the host loop table
    Status,
}

#[derive(Args, Debug, Default)]
pub struct MapArgs {
    /// Disk image to attach
    #[arg(long)]
    pub image: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub strategy: Option<AttachStrategy>,

    /// Published path for partition-aware mapping
    #[arg(long, value_enum)]
    pub namespace: Option<DeviceNamespace>,

    /// Context key for the device path
    #[arg(long)]
    pub result_key: Option<String>,

    /// Do not create /dev/loop<N>p<M> symlinks
    #[arg(long)]
    pub no_symlinks: bool,

    /// Serialize attach/detach with other loopmap runs through this file
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Print the loop table and /dev listing after attaching
    #[arg(long)]
    pub diagnostics: bool,

    /// Command to run while mapped; receives LOOPMAP_DEVICE
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl MapArgs {
    /// Apply flags on top of a file (or default) config.
    pub fn apply(&self, config: &mut MapperConfig) {
        if let Some(image) = &self.image {
            config.image_path = Some(image.clone());
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(key) = &self.result_key {
            config.result_key = key.clone();
        }
        if self.no_symlinks {
            config.create_symlinks = false;
        }
        if let Some(lock_file) = &self.lock_file {
            config.lock_file = Some(lock_file.clone());
        }
        if self.diagnostics {
            config.diagnostics = true;
        }
    }
}
