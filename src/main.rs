use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use regionpaint::cli::{self, CliArgs};
use regionpaint::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init_with_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    if let Some(path) = logger::log_path() {
        log::debug!("logging to {}", path.display());
    }
    cli::run(args)
}
