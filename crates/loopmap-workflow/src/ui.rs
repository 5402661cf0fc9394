//! User-facing message sink.

use std::sync::Mutex;

pub trait Ui: Send + Sync {
    fn message(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Forwards messages to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUi;

impl Ui for LogUi {
    fn message(&self, msg: &str) {
        log::info!(target: "loopmap::ui", "{}", msg);
    }

    fn warn(&self, msg: &str) {
        log::warn!(target: "loopmap::ui", "{}", msg);
    }

    fn error(&self, msg: &str) {
        log::error!(target: "loopmap::ui", "{}", msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLevel {
    Message,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiMessage {
    pub level: UiLevel,
    pub text: String,
}

/// Records messages in memory; used by tests to assert on diagnostics.
#[derive(Debug, Default)]
pub struct MemoryUi {
    messages: Mutex<Vec<UiMessage>>,
}

impl MemoryUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Texts recorded at `level`, in order.
    pub fn texts(&self, level: UiLevel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == level)
            .map(|m| m.text)
            .collect()
    }

    /// Whether any message at `level` contains `needle`.
    pub fn contains(&self, level: UiLevel, needle: &str) -> bool {
        self.texts(level).iter().any(|t| t.contains(needle))
    }

    fn push(&self, level: UiLevel, msg: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(UiMessage {
                level,
                text: msg.to_string(),
            });
    }
}

impl Ui for MemoryUi {
    fn message(&self, msg: &str) {
        self.push(UiLevel::Message, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(UiLevel::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(UiLevel::Error, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_ui_records_levels() {
        let ui = MemoryUi::new();
        ui.message("attaching");
        ui.warn("symlink failed");
        ui.error("detach failed");

        assert_eq!(ui.messages().len(), 3);
        assert_eq!(ui.texts(UiLevel::Warn), vec!["symlink failed".to_string()]);
        assert!(ui.contains(UiLevel::Error, "detach"));
        assert!(!ui.contains(UiLevel::Message, "detach"));
    }
}
