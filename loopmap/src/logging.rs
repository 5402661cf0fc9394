use env_logger::Target;
use log::LevelFilter;
use std::fs;
use std::io;
use std::path::Path;

/// Initialize `env_logger`. `RUST_LOG` still wins over the level chosen here.
///
/// If `log_file` cannot be opened (permissions, readonly FS, etc.) logs go to stderr.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let target = log_file
        .and_then(|path| match open_log_file(path) {
            Ok(file) => Some(Target::Pipe(Box::new(file))),
            Err(err) => {
                eprintln!("loopmap: cannot open log file {}: {}", path.display(), err);
                None
            }
        })
        .unwrap_or(Target::Stderr);

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(target)
        .try_init();
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}
