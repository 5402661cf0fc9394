//! Ctrl+C handling for the `map` pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static HANDLER_SET: OnceLock<()> = OnceLock::new();

/// Install a process-wide handler that sets `flag` on SIGINT, SIGTERM or SIGHUP.
///
/// The process keeps running, so the step runner can still clean up. A child started by a
/// step shares the foreground process group and receives the signal itself.
pub fn install_ctrlc_handler(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        log::info!("Cancellation requested; releasing devices before exit.");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}
