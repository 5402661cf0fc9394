use crate::{StateBag, Ui};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What the pipeline does after a step returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// A unit of work with a guaranteed teardown.
///
/// `cleanup` is called for every step whose `run` started, whatever `run` returned and
/// whatever later steps did. It must tolerate being called when `run` did nothing.
pub trait Step {
    fn name(&self) -> &str;

    fn run(&mut self, state: &mut StateBag, ui: &dyn Ui) -> StepAction;

    fn cleanup(&mut self, state: &mut StateBag, ui: &dyn Ui);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Halted { step: String },
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Runs steps in order and cleans up in reverse.
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    cancel: Option<Arc<AtomicBool>>,
}

impl StepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop before the next step once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn run(
        &self,
        steps: &mut [Box<dyn Step + '_>],
        state: &mut StateBag,
        ui: &dyn Ui,
    ) -> RunOutcome {
        let mut started = 0;
        let mut outcome = RunOutcome::Completed;

        for step in steps.iter_mut() {
            if self.cancelled() {
                ui.warn("Pipeline cancelled");
                outcome = RunOutcome::Cancelled;
                break;
            }

            started += 1;
            let name = step.name().to_string();
            log::debug!("step {}: run", name);

            let action = match panic::catch_unwind(AssertUnwindSafe(|| step.run(state, ui))) {
                Ok(action) => action,
                Err(_) => {
                    let msg = format!("step {} panicked", name);
                    ui.error(&msg);
                    state.record_error(&name, msg);
                    StepAction::Halt
                }
            };

            if action == StepAction::Halt {
                outcome = RunOutcome::Halted { step: name };
                break;
            }
        }

        for step in steps[..started].iter_mut().rev() {
            let name = step.name().to_string();
            log::debug!("step {}: cleanup", name);
            if panic::catch_unwind(AssertUnwindSafe(|| step.cleanup(state, ui))).is_err() {
                ui.error(&format!("cleanup of step {} panicked", name));
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryUi;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct TestStep {
        name: &'static str,
        action: StepAction,
        panic_in_run: bool,
        journal: Journal,
    }

    impl TestStep {
        fn boxed(name: &'static str, action: StepAction, journal: &Journal) -> Box<dyn Step> {
            Box::new(Self {
                name,
                action,
                panic_in_run: false,
                journal: Arc::clone(journal),
            })
        }
    }

    impl Step for TestStep {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&mut self, state: &mut StateBag, _ui: &dyn Ui) -> StepAction {
            self.journal.lock().unwrap().push(format!("run:{}", self.name));
            if self.panic_in_run {
                panic!("boom");
            }
            state.put(self.name, "done");
            self.action
        }

        fn cleanup(&mut self, _state: &mut StateBag, _ui: &dyn Ui) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("cleanup:{}", self.name));
        }
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn runs_in_order_and_cleans_up_in_reverse() {
        let j = journal();
        let mut steps = vec![
            TestStep::boxed("a", StepAction::Continue, &j),
            TestStep::boxed("b", StepAction::Continue, &j),
        ];
        let mut state = StateBag::new();
        let outcome = StepRunner::new().run(&mut steps, &mut state, &MemoryUi::new());

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            j.lock().unwrap().as_slice(),
            &["run:a", "run:b", "cleanup:b", "cleanup:a"]
        );
        assert_eq!(state.get("b"), Some("done"));
    }

    #[test]
    fn halt_stops_and_cleans_started_steps_only() {
        let j = journal();
        let mut steps = vec![
            TestStep::boxed("a", StepAction::Continue, &j),
            TestStep::boxed("b", StepAction::Halt, &j),
            TestStep::boxed("c", StepAction::Continue, &j),
        ];
        let mut state = StateBag::new();
        let outcome = StepRunner::new().run(&mut steps, &mut state, &MemoryUi::new());

        assert_eq!(
            outcome,
            RunOutcome::Halted {
                step: "b".to_string()
            }
        );
        assert_eq!(
            j.lock().unwrap().as_slice(),
            &["run:a", "run:b", "cleanup:b", "cleanup:a"]
        );
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let j = journal();
        let mut steps = vec![TestStep::boxed("a", StepAction::Continue, &j)];
        let flag = Arc::new(AtomicBool::new(true));
        let ui = MemoryUi::new();
        let outcome = StepRunner::new()
            .with_cancel_flag(flag)
            .run(&mut steps, &mut StateBag::new(), &ui);

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(j.lock().unwrap().is_empty());
        assert!(ui.contains(crate::UiLevel::Warn, "cancelled"));
    }

    #[test]
    fn panicking_step_halts_and_is_cleaned_up() {
        let j = journal();
        let mut steps: Vec<Box<dyn Step>> = vec![
            TestStep::boxed("a", StepAction::Continue, &j),
            Box::new(TestStep {
                name: "b",
                action: StepAction::Continue,
                panic_in_run: true,
                journal: Arc::clone(&j),
            }),
        ];
        let mut state = StateBag::new();
        let outcome = StepRunner::new().run(&mut steps, &mut state, &MemoryUi::new());

        assert!(!outcome.is_success());
        assert_eq!(state.errors()[0].step, "b");
        assert_eq!(
            j.lock().unwrap().as_slice(),
            &["run:a", "run:b", "cleanup:b", "cleanup:a"]
        );
    }
}
