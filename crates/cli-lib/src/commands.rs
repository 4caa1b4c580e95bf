use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use strum_macros::Display;

#[derive(Debug, Parser)]
#[command(name = "pbscan")]
#[command(about = "pbscan maps legacy visual-client sources: screens, events, calls, data grids and the tables they touch", long_about = None, version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Path to a configuration file (defaults to the nearest `.pbscan`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(name = "scan", about = "Analyze a source corpus into a new run")]
    Scan(ScanArgs),
    #[command(name = "report", about = "Render reports for a run from the IR store")]
    Report(ReportArgs),
    #[command(name = "diff", about = "Compare two runs as set differences")]
    Diff(DiffArgs),
    #[command(name = "runs", about = "List the runs recorded in the IR store")]
    Runs(RunsArgs),
}

#[derive(Debug, Parser)]
pub struct ScanArgs {
    /// Source corpus: a directory of exported sources, or a binary
    /// library for the binary extractor.
    pub input: PathBuf,
    /// IR store to write the run into.
    #[arg(long, default_value = "pbscan.db")]
    pub db: PathBuf,
    /// Working directory for extraction output.
    #[arg(long, default_value = "pbscan_out")]
    pub out: PathBuf,
    /// Which extractor to use.
    #[arg(long, default_value_t = ExtractorChoice::Auto)]
    pub extractor: ExtractorChoice,
    /// External exporter template for binary libraries, with `{input}`
    /// and `{output}` placeholders.
    #[arg(long)]
    pub extract_cmd: Option<String>,
    /// Override the generated run id.
    #[arg(long)]
    pub run_id: Option<String>,
    /// Record the analyzed source version on the run.
    #[arg(long)]
    pub source_version: Option<String>,
    /// Parser pool width (0 = CPU count).
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Debug, Parser)]
pub struct ReportArgs {
    /// IR store to read.
    #[arg(long, default_value = "pbscan.db")]
    pub db: PathBuf,
    /// Run to report on; defaults to the most recent run.
    #[arg(long)]
    pub run_id: Option<String>,
    #[arg(long, short, default_value_t = ReportFormat::Csv)]
    pub format: ReportFormat,
    /// Output directory for the rendered report files.
    #[arg(long, default_value = ".")]
    pub out: PathBuf,
    /// Row limit per query (10–2000).
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Parser)]
pub struct DiffArgs {
    pub run_old: String,
    pub run_new: String,
    #[arg(long, default_value = "pbscan.db")]
    pub db: PathBuf,
    #[arg(long, short, default_value_t = DiffFormat::Human)]
    pub format: DiffFormat,
}

#[derive(Debug, Parser)]
pub struct RunsArgs {
    #[arg(long, default_value = "pbscan.db")]
    pub db: PathBuf,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExtractorChoice {
    Auto,
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    Json,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DiffFormat {
    Human,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_declaration_is_consistent() {
        Cli::command().debug_assert();
    }
}
