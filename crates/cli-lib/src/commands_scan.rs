use pbscan_lib::config::ScanConfig;
use pbscan_lib::extract::{ExtractorKind, select_extractor};
use pbscan_lib::runner::{CancellationToken, RunOptions, Runner};
use pbscan_lib::store::Store;

use crate::commands::{ExtractorChoice, ScanArgs};
use crate::formatters;

pub(crate) fn run_scan(args: ScanArgs, mut config: ScanConfig) -> i32 {
    if let Some(threads) = args.threads {
        config.threads = threads;
    }

    let kind = match args.extractor {
        ExtractorChoice::Auto => ExtractorKind::Auto,
        ExtractorChoice::Text => ExtractorKind::Text,
        ExtractorChoice::Binary => ExtractorKind::Binary,
    };
    let extractor = match select_extractor(kind, &args.input, args.extract_cmd.as_deref()) {
        Ok(extractor) => extractor,
        Err(err) => {
            formatters::print_fatal("extract", &err.to_string());
            return 1;
        }
    };

    if let Some(parent) = args.db.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        formatters::print_fatal("persist", &err.to_string());
        return 1;
    }
    let mut store = match Store::open(&args.db) {
        Ok(store) => store,
        Err(err) => {
            formatters::print_fatal("persist", &err.to_string());
            return 1;
        }
    };

    let options = RunOptions {
        run_id: args.run_id,
        source_version: args.source_version,
    };
    let cancel = CancellationToken::new();

    let runner = Runner::new(config);
    match runner.run(
        extractor.as_ref(),
        &args.input,
        &args.out,
        &mut store,
        &options,
        &cancel,
    ) {
        Ok(outcome) => {
            formatters::print_outcome(&outcome);
            outcome.exit_code()
        }
        Err(err) => {
            formatters::print_fatal(&err.stage().to_string(), &err.to_string());
            1
        }
    }
}
