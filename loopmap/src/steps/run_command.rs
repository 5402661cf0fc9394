//! Downstream consumer: runs a command against the mapped device.

use loopmap_hal::MapperHal;
use loopmap_workflow::{StateBag, Step, StepAction, Ui};
use std::sync::Arc;

pub const STEP_NAME: &str = "run-command";
pub const DEVICE_ENV: &str = "LOOPMAP_DEVICE";
pub const RESULT_KEY_ENV: &str = "LOOPMAP_RESULT_KEY";

/// Reads `key` from the context and runs `program` with the device path in its environment.
pub struct RunCommandStep {
    hal: Arc<dyn MapperHal>,
    key: String,
    program: String,
    args: Vec<String>,
}

impl RunCommandStep {
    pub fn new(
        hal: Arc<dyn MapperHal>,
        key: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            hal,
            key: key.into(),
            program: program.into(),
            args,
        }
    }

    fn halt(&self, state: &mut StateBag, ui: &dyn Ui, msg: String) -> StepAction {
        ui.error(&msg);
        state.record_error(STEP_NAME, msg);
        StepAction::Halt
    }
}

impl Step for RunCommandStep {
    fn name(&self) -> &str {
        STEP_NAME
    }

    fn run(&mut self, state: &mut StateBag, ui: &dyn Ui) -> StepAction {
        let Some(device) = state.get(&self.key).map(str::to_string) else {
            let msg = format!("No device published under {:?}", self.key);
            return self.halt(state, ui, msg);
        };

        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let env = [(DEVICE_ENV, device.as_str()), (RESULT_KEY_ENV, self.key.as_str())];
        ui.message(&format!(
            "Running {} with {}={}",
            loopmap_hal::render_command(&self.program, &args),
            DEVICE_ENV,
            device
        ));

        // User commands are not bounded by command_timeout_secs.
        match self
            .hal
            .command_status_with_env(&self.program, &args, &env, None)
        {
            Ok(()) => StepAction::Continue,
            Err(err) => self.halt(state, ui, format!("Command failed: {}", err)),
        }
    }

    fn cleanup(&mut self, _state: &mut StateBag, _ui: &dyn Ui) {}
}
