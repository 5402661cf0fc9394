//! Attach a disk image to a loop device and release it again.
//!
//! [`ImageMapper::attach`] returns an [`Attached`] handle that owns a [`LoopGuard`], so the
//! device is released exactly once: by [`ImageMapper::release`] or, failing that, on drop.

pub mod parse;
pub mod wait;

use crate::config::{is_regular_file, MapperConfig};
use crate::errors::{MapError, MapResult};
use crate::lock::HostLock;
use clap::ValueEnum;
use loopmap_hal::{CommandTranscript, HalResult, LoopGuard, MapperHal};
use loopmap_workflow::Ui;
use parse::{parse_attached_device, parse_partition_mapping, LoopIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use wait::DeviceWait;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum AttachStrategy {
    /// `losetup --find --partscan --show`; one device, no partition tracking
    WholeDisk,
    /// `kpartx -a`; device-mapper node per partition
    #[default]
    PartitionAware,
}

impl fmt::Display for AttachStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachStrategy::WholeDisk => write!(f, "whole-disk"),
            AttachStrategy::PartitionAware => write!(f, "partition-aware"),
        }
    }
}

/// Which path is published for a partition-aware attach.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceNamespace {
    /// `/dev/mapper/loop<N>`
    #[default]
    Mapper,
    /// `/dev/loop<N>`
    Flat,
}

impl fmt::Display for DeviceNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceNamespace::Mapper => write!(f, "mapper"),
            DeviceNamespace::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDevice {
    pub number: u32,
    pub mapper_path: PathBuf,
    /// Set only when this mapper created the `/dev/loop<N>p<M>` symlink.
    pub alias_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedImage {
    pub image: PathBuf,
    pub strategy: AttachStrategy,
    pub loop_index: LoopIndex,
    /// Flat loop node; the handle detach works on.
    pub loop_device: PathBuf,
    /// Path handed to downstream consumers.
    pub published: PathBuf,
    pub partitions: Vec<PartitionDevice>,
}

/// A live mapping. Dropping it detaches the device and leaves symlinks behind.
#[derive(Debug)]
pub struct Attached {
    pub mapped: MappedImage,
    guard: LoopGuard<dyn MapperHal>,
}

impl Attached {
    pub fn published(&self) -> &Path {
        &self.mapped.published
    }
}

pub struct ImageMapper {
    hal: Arc<dyn MapperHal>,
    config: MapperConfig,
}

impl ImageMapper {
    pub fn new(hal: Arc<dyn MapperHal>, config: MapperConfig) -> Self {
        Self { hal, config }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Attach `image` with the configured strategy and wait for its nodes.
    ///
    /// On any failure after the device was claimed, the device is released before the
    /// error is returned.
    pub fn attach(&self, image: &Path, ui: &dyn Ui) -> MapResult<Attached> {
        if !is_regular_file(image) {
            return Err(MapError::ImageNotFound(image.to_path_buf()));
        }

        let mut attached = {
            let _lock = self.host_lock()?;
            match self.config.strategy {
                AttachStrategy::WholeDisk => self.attach_whole_disk(image, ui)?,
                AttachStrategy::PartitionAware => self.attach_partitions(image, ui)?,
            }
        };

        match self.hal.udev_settle() {
            Ok(transcript) => echo(ui, &transcript),
            Err(err) => log::debug!("udevadm settle failed: {}", err),
        }

        if let Err(err) = self.wait_for_nodes(&attached.mapped) {
            ui.error(&format!("{}; releasing {}", err, attached.guard.device()));
            if let Err(detach_err) = self.release(attached, ui) {
                ui.error(&format!("Release after failed attach also failed: {}", detach_err));
            }
            return Err(err);
        }

        self.create_aliases(&mut attached.mapped, ui);

        if self.config.diagnostics {
            self.emit_diagnostics(ui);
        }

        ui.message(&format!(
            "Mapped {} to {}",
            image.display(),
            attached.mapped.published.display()
        ));
        Ok(attached)
    }

    /// Remove symlinks this mapper created, then drop partition mappings and detach.
    pub fn release(&self, attached: Attached, ui: &dyn Ui) -> MapResult<()> {
        let Attached { mapped, guard } = attached;

        for alias in mapped.partitions.iter().filter_map(|p| p.alias_path.as_deref()) {
            match self.hal.remove_symlink(alias) {
                Ok(()) => log::debug!("removed {}", alias.display()),
                Err(err) => ui.warn(&format!("Could not remove {}: {}", alias.display(), err)),
            }
        }

        let lock = match self.host_lock() {
            Ok(lock) => lock,
            Err(err) => {
                ui.warn(&format!("{}; detaching without it", err));
                None
            }
        };
        let device = guard.device().to_string();
        guard.detach(|transcript| echo(ui, transcript))?;
        drop(lock);

        ui.message(&format!("Detached {}", device));
        Ok(())
    }

    /// Loop table and `/dev` listing. Failures are reported as warnings only.
    pub fn emit_diagnostics(&self, ui: &dyn Ui) {
        match self.hal.losetup_list() {
            Ok(table) => ui.message(&format!("losetup --list:\n{}", table.trim_end())),
            Err(err) => ui.warn(&format!("losetup --list failed: {}", err)),
        }
        match self.hal.list_dir(&self.config.dev_dir) {
            Ok(entries) => ui.message(&format!(
                "{}: {}",
                self.config.dev_dir.display(),
                entries.join(" ")
            )),
            Err(err) => ui.warn(&format!(
                "Listing {} failed: {}",
                self.config.dev_dir.display(),
                err
            )),
        }
    }

    fn host_lock(&self) -> MapResult<Option<HostLock>> {
        match &self.config.lock_file {
            Some(path) => HostLock::acquire(path, self.config.lock_timeout()).map(Some),
            None => Ok(None),
        }
    }

    /// Run an attach command, retrying only while the loop table is contended.
    fn run_attach(
        &self,
        ui: &dyn Ui,
        attempt: impl Fn() -> HalResult<CommandTranscript>,
    ) -> MapResult<CommandTranscript> {
        let mut retries_left = self.config.attach_retries;
        loop {
            match attempt() {
                Ok(transcript) => {
                    echo(ui, &transcript);
                    return Ok(transcript);
                }
                Err(err) if err.is_contention() && retries_left > 0 => {
                    retries_left -= 1;
                    ui.warn(&format!(
                        "Loop device table busy, retrying ({} left): {}",
                        retries_left, err
                    ));
                    thread::sleep(self.config.attach_retry_delay());
                }
                Err(err) => {
                    ui.error(&format!("Attach failed: {}", err));
                    return Err(err.into());
                }
            }
        }
    }

    fn attach_whole_disk(&self, image: &Path, ui: &dyn Ui) -> MapResult<Attached> {
        let transcript = self.run_attach(ui, || self.hal.losetup_attach(image, true))?;
        let (device, loop_index) = parse_attached_device(&transcript.stdout).map_err(|err| {
            log::error!(
                "losetup gave no usable device for {}; check `losetup -j {}` for a leaked device",
                image.display(),
                image.display()
            );
            err
        })?;

        let guard = LoopGuard::new(Arc::clone(&self.hal), device.to_string_lossy());
        Ok(Attached {
            mapped: MappedImage {
                image: image.to_path_buf(),
                strategy: AttachStrategy::WholeDisk,
                loop_index,
                loop_device: device.clone(),
                published: device,
                partitions: Vec::new(),
            },
            guard,
        })
    }

    fn attach_partitions(&self, image: &Path, ui: &dyn Ui) -> MapResult<Attached> {
        let transcript = self.run_attach(ui, || self.hal.kpartx_add(image))?;
        let mapping = match parse_partition_mapping(&transcript.combined()) {
            Ok(mapping) => mapping,
            Err(err) => {
                // kpartx accepts the image path for -d and resolves the loop device itself.
                match self.hal.kpartx_delete(&image.to_string_lossy()) {
                    Ok(transcript) => echo(ui, &transcript),
                    Err(cleanup) => log::warn!("kpartx -d {} failed: {}", image.display(), cleanup),
                }
                return Err(err.into());
            }
        };

        for token in &mapping.foreign {
            ui.warn(&format!(
                "Ignoring {}p{}: expected partitions of {}",
                token.loop_index, token.number, mapping.loop_index
            ));
        }

        let dev_dir = &self.config.dev_dir;
        let index = mapping.loop_index;
        let loop_device = index.flat_path(dev_dir);
        let published = match self.config.namespace {
            DeviceNamespace::Mapper => index.mapper_path(dev_dir),
            DeviceNamespace::Flat => loop_device.clone(),
        };
        let partitions = mapping
            .partitions
            .iter()
            .map(|&number| PartitionDevice {
                number,
                mapper_path: index.partition_mapper_path(dev_dir, number),
                alias_path: None,
            })
            .collect();

        let guard = LoopGuard::new(Arc::clone(&self.hal), loop_device.to_string_lossy())
            .with_partition_mappings();
        Ok(Attached {
            mapped: MappedImage {
                image: image.to_path_buf(),
                strategy: AttachStrategy::PartitionAware,
                loop_index: index,
                loop_device,
                published,
                partitions,
            },
            guard,
        })
    }

    fn wait_for_nodes(&self, mapped: &MappedImage) -> MapResult<()> {
        let nodes: Vec<&Path> = match mapped.strategy {
            AttachStrategy::WholeDisk => vec![mapped.loop_device.as_path()],
            AttachStrategy::PartitionAware => mapped
                .partitions
                .iter()
                .map(|p| p.mapper_path.as_path())
                .collect(),
        };
        // One budget for all nodes, not one per node.
        let wait = self.config.device_wait();
        let deadline = Instant::now() + wait.timeout;
        for node in nodes {
            let remaining = DeviceWait::new(
                deadline.saturating_duration_since(Instant::now()),
                wait.interval,
            );
            let waited = wait::wait_for_device(self.hal.as_ref(), node, remaining)?;
            log::debug!("{} present after {}ms", node.display(), waited.as_millis());
        }
        Ok(())
    }

    fn create_aliases(&self, mapped: &mut MappedImage, ui: &dyn Ui) {
        if mapped.strategy != AttachStrategy::PartitionAware || !self.config.create_symlinks {
            return;
        }
        let index = mapped.loop_index;
        for part in &mut mapped.partitions {
            let alias = index.partition_flat_path(&self.config.dev_dir, part.number);
            match self.hal.create_symlink(&part.mapper_path, &alias) {
                Ok(()) => {
                    ui.message(&format!(
                        "Linked {} -> {}",
                        alias.display(),
                        part.mapper_path.display()
                    ));
                    part.alias_path = Some(alias);
                }
                Err(err) if err.is_already_exists() => {
                    log::debug!("{} already exists, leaving it alone", alias.display());
                }
                Err(err) => ui.warn(&format!(
                    "Could not link {} -> {}: {}",
                    alias.display(),
                    part.mapper_path.display(),
                    err
                )),
            }
        }
    }
}

/// Command line plus whatever it printed.
fn echo(ui: &dyn Ui, transcript: &CommandTranscript) {
    let output = transcript.combined();
    let output = output.trim_end();
    if output.is_empty() {
        ui.message(&transcript.command);
    } else {
        ui.message(&format!("{}\n{}", transcript.command, output));
    }
}
