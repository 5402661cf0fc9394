use anyhow::Result;
use clap::Parser;
use loopmap::cli::{Cli, Command};
use loopmap::{cancel, commands, logging};
use loopmap_hal::LinuxHal;
use loopmap_workflow::LogUi;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref());

    match &cli.command {
        Command::Map(args) => {
            let config = commands::resolve_config(cli.config.as_deref(), args)?;
            let hal = Arc::new(LinuxHal::new().with_command_timeout(config.command_timeout()));
            let cancel_flag = Arc::new(AtomicBool::new(false));
            cancel::install_ctrlc_handler(Arc::clone(&cancel_flag))?;
            let device = commands::map(hal, config, &args.command, cancel_flag, &LogUi)?;
            println!("{}", device);
        }
        Command::Parse { file } => {
            let text = commands::read_input(file.as_deref())?;
            let value = commands::parse(&text)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Status => {
            let config = match &cli.config {
                Some(path) => loopmap::MapperConfig::load(path)?,
                None => loopmap::MapperConfig::default(),
            };
            let hal = LinuxHal::new().with_command_timeout(config.command_timeout());
            commands::status(&hal, &mut io::stdout())?;
        }
    }
    Ok(())
}
