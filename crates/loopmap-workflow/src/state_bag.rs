//! Shared execution context passed between steps.

use serde::Serialize;
use std::collections::BTreeMap;

/// Reason a step halted the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepError {
    pub step: String,
    pub message: String,
}

/// String-keyed values handed from one step to the next.
///
/// Steps publish results under caller-chosen keys (e.g. the mapped device path) and
/// downstream steps read them back. Errors recorded by halting steps travel in the same bag
/// so the orchestrator can report them after cleanup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateBag {
    values: BTreeMap<String, String>,
    errors: Vec<StepError>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn record_error(&mut self, step: impl Into<String>, message: impl Into<String>) {
        self.errors.push(StepError {
            step: step.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[StepError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
