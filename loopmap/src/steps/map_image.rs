//! Step that maps the configured image and publishes its device path.

use crate::config::{ConfigError, MapperConfig};
use crate::errors::{MapError, MapResult};
use crate::mapper::{Attached, ImageMapper, MappedImage};
use loopmap_hal::MapperHal;
use loopmap_workflow::{StateBag, Step, StepAction, Ui};
use std::fmt;
use std::sync::Arc;

pub const STEP_NAME: &str = "map-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperState {
    Idle,
    Attaching,
    Mapped,
    Failed,
    Detached,
}

impl fmt::Display for MapperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapperState::Idle => "idle",
            MapperState::Attaching => "attaching",
            MapperState::Mapped => "mapped",
            MapperState::Failed => "failed",
            MapperState::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// Attaches the image in `run`, detaches it in `cleanup`.
///
/// The context entry under `result_key` is written once, on success, and never touched
/// again by this step.
pub struct MapImageStep {
    mapper: ImageMapper,
    state: MapperState,
    attached: Option<Attached>,
}

impl MapImageStep {
    pub fn new(hal: Arc<dyn MapperHal>, config: MapperConfig) -> Self {
        Self {
            mapper: ImageMapper::new(hal, config),
            state: MapperState::Idle,
            attached: None,
        }
    }

    pub fn state(&self) -> MapperState {
        self.state
    }

    pub fn mapped(&self) -> Option<&MappedImage> {
        self.attached.as_ref().map(|a| &a.mapped)
    }

    fn try_run(&mut self, state: &mut StateBag, ui: &dyn Ui) -> MapResult<()> {
        if self.state != MapperState::Idle {
            return Err(MapError::AlreadyRan(self.state.to_string()));
        }

        let config = self.mapper.config();
        config.validate()?;
        let image = config
            .image_path
            .clone()
            .ok_or(ConfigError::MissingImagePath)?;
        let key = config.result_key.clone();

        self.state = MapperState::Attaching;
        let attached = match self.mapper.attach(&image, ui) {
            Ok(attached) => attached,
            Err(err) => {
                self.state = MapperState::Failed;
                return Err(err);
            }
        };

        let published = attached.published().display().to_string();
        if let Some(previous) = state.put(&key, published.as_str()) {
            log::warn!("context key {:?} replaced (was {:?})", key, previous);
        }
        log::info!("{} = {}", key, published);

        self.attached = Some(attached);
        self.state = MapperState::Mapped;
        Ok(())
    }
}

impl Step for MapImageStep {
    fn name(&self) -> &str {
        STEP_NAME
    }

    fn run(&mut self, state: &mut StateBag, ui: &dyn Ui) -> StepAction {
        match self.try_run(state, ui) {
            Ok(()) => StepAction::Continue,
            Err(err) => {
                let msg = format!("Error mapping image: {}", err);
                ui.error(&msg);
                state.record_error(STEP_NAME, msg);
                StepAction::Halt
            }
        }
    }

    fn cleanup(&mut self, _state: &mut StateBag, ui: &dyn Ui) {
        if let Some(attached) = self.attached.take() {
            if let Err(err) = self.mapper.release(attached, ui) {
                ui.error(&format!("Error detaching loop device: {}", err));
            }
        } else {
            log::debug!("{}: nothing to detach ({})", STEP_NAME, self.state);
        }
        self.state = MapperState::Detached;
    }
}
