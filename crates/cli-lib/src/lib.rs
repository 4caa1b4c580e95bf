use clap::Parser as _;
use pbscan_lib::config::ScanConfig;

use crate::commands::{Cli, Commands};

pub mod commands;
mod commands_diff;
mod commands_report;
mod commands_runs;
mod commands_scan;
mod formatters;
mod logger;
mod reports;

pub fn run_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let _ = logger::init();
    let cli = Cli::parse_from(args);

    let config = match &cli.config {
        Some(path) => {
            if !path.is_file() {
                eprintln!("the specified config file '{}' does not exist", path.display());
                return 1;
            }
            match ScanConfig::from_file(path) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("{err}");
                    return 1;
                }
            }
        }
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
            match ScanConfig::from_root(&cwd) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("{err}");
                    return 1;
                }
            }
        }
    };

    match cli.command {
        Commands::Scan(args) => commands_scan::run_scan(args, config),
        Commands::Report(args) => commands_report::run_report(args),
        Commands::Diff(args) => commands_diff::run_diff(args),
        Commands::Runs(args) => commands_runs::run_runs(args),
    }
}
