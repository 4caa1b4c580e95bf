use pbscan_lib::store::Store;

use crate::commands::RunsArgs;
use crate::formatters;

pub(crate) fn run_runs(args: RunsArgs) -> i32 {
    let store = match Store::open(&args.db) {
        Ok(store) => store,
        Err(err) => {
            formatters::print_fatal("runs", &err.to_string());
            return 1;
        }
    };

    let runs = match store.runs(args.limit) {
        Ok(runs) => runs,
        Err(err) => {
            formatters::print_fatal("runs", &err.to_string());
            return 1;
        }
    };

    if runs.is_empty() {
        println!("no runs recorded");
        return 0;
    }
    for run in runs {
        println!(
            "{}  {}  started {}  finished {}  source {}",
            run.run_id,
            run.status,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
            run.source_version.as_deref().unwrap_or("-"),
        );
    }
    0
}
