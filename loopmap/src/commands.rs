//! Subcommand handlers behind the `loopmap` binary.

use crate::cli::MapArgs;
use crate::config::MapperConfig;
use crate::mapper::parse::{parse_attached_device, parse_partition_mapping};
use crate::steps::{MapImageStep, RunCommandStep};
use anyhow::{bail, Context, Result};
use loopmap_hal::MapperHal;
use loopmap_workflow::{StateBag, Step, StepRunner, Ui};
use serde_json::json;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Load the config file (if any) and apply `map` flags on top of it.
pub fn resolve_config(config_path: Option<&Path>, args: &MapArgs) -> Result<MapperConfig> {
    let mut config = match config_path {
        Some(path) => MapperConfig::load(path)?,
        None => MapperConfig::default(),
    };
    args.apply(&mut config);
    Ok(config)
}

/// Map the image, run the optional command, then detach. Returns the published device.
///
/// Once `cancel` is set no further step starts, and every started step is still cleaned up.
pub fn map(
    hal: Arc<dyn MapperHal>,
    config: MapperConfig,
    command: &[String],
    cancel: Arc<AtomicBool>,
    ui: &dyn Ui,
) -> Result<String> {
    let result_key = config.result_key.clone();
    let mut steps: Vec<Box<dyn Step>> = vec![Box::new(MapImageStep::new(Arc::clone(&hal), config))];
    if let Some((program, args)) = command.split_first() {
        steps.push(Box::new(RunCommandStep::new(
            Arc::clone(&hal),
            result_key.clone(),
            program,
            args.to_vec(),
        )));
    }

    let mut state = StateBag::new();
    let outcome = StepRunner::new()
        .with_cancel_flag(cancel)
        .run(&mut steps, &mut state, ui);
    if !outcome.is_success() {
        let reasons: Vec<String> = state
            .errors()
            .iter()
            .map(|e| format!("{}: {}", e.step, e.message))
            .collect();
        bail!("pipeline {:?}: {}", outcome, reasons.join("; "));
    }

    state
        .get(&result_key)
        .map(str::to_string)
        .with_context(|| format!("no device published under {:?}", result_key))
}

/// Parse attach output and render it as JSON.
///
/// `losetup --show` output (a bare `/dev/loop<N>` line) is reported as a whole-disk result,
/// anything else goes through the partition parser.
pub fn parse(text: &str) -> Result<serde_json::Value> {
    if let Ok((device, index)) = parse_attached_device(text) {
        return Ok(json!({ "loop_index": index, "device": device }));
    }
    let mapping = parse_partition_mapping(text)?;
    Ok(serde_json::to_value(mapping)?)
}

pub fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

pub fn status(hal: &dyn MapperHal, out: &mut dyn Write) -> Result<()> {
    let table = hal.losetup_list().context("losetup --list failed")?;
    writeln!(out, "{}", table.trim_end())?;
    Ok(())
}
