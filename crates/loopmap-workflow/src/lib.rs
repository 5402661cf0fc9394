//! loopmap workflow orchestration.
//!
//! This crate holds the step execution primitives: the shared [`StateBag`] passed between
//! steps, the [`Ui`] message sink, and the [`StepRunner`] that guarantees every started step
//! gets its cleanup call. Higher-level crates provide the concrete steps.

pub mod state_bag;
pub mod step_runner;
pub mod ui;

pub use state_bag::{StateBag, StepError};
pub use step_runner::{RunOutcome, Step, StepAction, StepRunner};
pub use ui::{LogUi, MemoryUi, Ui, UiLevel, UiMessage};
