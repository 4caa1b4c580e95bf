use std::io::IsTerminal;

use anstyle::{AnsiColor, Style};
use pbscan_lib::runner::Outcome;
use pbscan_lib_core::ir::RunStatus;

fn paint(style: Style, text: &str) -> String {
    if std::io::stderr().is_terminal() {
        format!("{style}{text}{style:#}")
    } else {
        text.to_owned()
    }
}

fn ok_tag() -> String {
    paint(Style::new().fg_color(Some(AnsiColor::Green.into())).bold(), "[OK]")
}

fn warn_tag() -> String {
    paint(Style::new().fg_color(Some(AnsiColor::Yellow.into())).bold(), "[WARN]")
}

fn error_tag() -> String {
    paint(Style::new().fg_color(Some(AnsiColor::Red.into())).bold(), "[ERROR]")
}

/// The human summary: one `[OK]` line on success or partial success,
/// one `[WARN]` line per aggregated failure.
pub(crate) fn print_outcome(outcome: &Outcome) {
    match outcome.status {
        RunStatus::Ok | RunStatus::Partial => {
            eprintln!(
                "{} run {} {}: {} objects, {} events, {} functions, {} relations, {} sql, {} data windows in {:.2}s",
                ok_tag(),
                outcome.run_id,
                outcome.status,
                outcome.objects_n,
                outcome.events_n,
                outcome.functions_n,
                outcome.relations_n,
                outcome.sql_n,
                outcome.dw_n,
                outcome.elapsed.as_secs_f64(),
            );
            for failure in &outcome.failures {
                match &failure.path {
                    Some(path) => {
                        eprintln!("{} {}: {} ({})", warn_tag(), failure.stage, failure.message, path)
                    }
                    None => eprintln!("{} {}: {}", warn_tag(), failure.stage, failure.message),
                }
            }
        }
        RunStatus::Failed | RunStatus::Running => {
            eprintln!(
                "{} run {} failed: {} failures",
                error_tag(),
                outcome.run_id,
                outcome.failures.len()
            );
        }
    }
}

/// The single fatal line: the failing stage plus one message.
pub(crate) fn print_fatal(stage: &str, message: &str) {
    eprintln!("{} {stage}: {message}", error_tag());
}
