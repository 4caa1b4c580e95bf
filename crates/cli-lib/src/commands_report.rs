use pbscan_lib::store::Store;

use crate::commands::{ReportArgs, ReportFormat};
use crate::formatters;
use crate::reports;

pub(crate) fn run_report(args: ReportArgs) -> i32 {
    let store = match Store::open(&args.db) {
        Ok(store) => store,
        Err(err) => {
            formatters::print_fatal("report", &err.to_string());
            return 1;
        }
    };

    let run = match resolve_run(&store, args.run_id.as_deref()) {
        Ok(run) => run,
        Err(message) => {
            formatters::print_fatal("report", &message);
            return 1;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&args.out) {
        formatters::print_fatal("report", &err.to_string());
        return 1;
    }

    let bundle = match reports::gather(&store, run, args.limit) {
        Ok(bundle) => bundle,
        Err(err) => {
            formatters::print_fatal("report", &err.to_string());
            return 1;
        }
    };

    let written = match args.format {
        ReportFormat::Json => reports::write_json(&bundle, &args.out).map_err(|e| e.to_string()),
        ReportFormat::Csv => reports::write_csv(&bundle, &args.out).map_err(|e| e.to_string()),
        ReportFormat::Html => reports::write_html(&bundle, &args.out).map_err(|e| e.to_string()),
    };
    match written {
        Ok(()) => {
            eprintln!(
                "[OK] report for run {} ({}) written to {}",
                bundle.run.run_id,
                args.format,
                args.out.display()
            );
            0
        }
        Err(message) => {
            formatters::print_fatal("report", &message);
            1
        }
    }
}

fn resolve_run(
    store: &Store,
    run_id: Option<&str>,
) -> Result<pbscan_lib::store::RunRow, String> {
    match run_id {
        Some(run_id) => store
            .run(run_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown run id {run_id}")),
        None => store
            .runs(None)
            .map_err(|e| e.to_string())?
            .into_iter()
            .next()
            .ok_or_else(|| "the store holds no runs yet".to_owned()),
    }
}
