use pbscan_lib::store::{DiffReport, Store};

use crate::commands::{DiffArgs, DiffFormat};
use crate::formatters;

pub(crate) fn run_diff(args: DiffArgs) -> i32 {
    let store = match Store::open(&args.db) {
        Ok(store) => store,
        Err(err) => {
            formatters::print_fatal("diff", &err.to_string());
            return 1;
        }
    };

    let report = match store.diff(&args.run_old, &args.run_new) {
        Ok(report) => report,
        Err(err) => {
            formatters::print_fatal("diff", &err.to_string());
            return 1;
        }
    };

    match args.format {
        DiffFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                0
            }
            Err(err) => {
                formatters::print_fatal("diff", &err.to_string());
                1
            }
        },
        DiffFormat::Human => {
            print_human(&report);
            0
        }
    }
}

fn print_human(report: &DiffReport) {
    println!("diff {} -> {}", report.run_old, report.run_new);
    if report.is_empty() {
        println!("  no differences");
        return;
    }

    for object in &report.objects.added {
        println!("  + object {}:{}", object.kind, object.name);
    }
    for object in &report.objects.removed {
        println!("  - object {}:{}", object.kind, object.name);
    }
    for relation in &report.relations.added {
        println!(
            "  + relation {} -[{}]-> {}",
            relation.src, relation.relation_type, relation.dst
        );
    }
    for relation in &report.relations.removed {
        println!(
            "  - relation {} -[{}]-> {}",
            relation.src, relation.relation_type, relation.dst
        );
    }
    for sql in &report.sql_statements.added {
        println!("  + sql [{}] {} on {}", sql.sql_kind, truncated(&sql.sql_text_norm), sql.owner);
    }
    for sql in &report.sql_statements.removed {
        println!("  - sql [{}] {} on {}", sql.sql_kind, truncated(&sql.sql_text_norm), sql.owner);
    }
    for dw in &report.datawindows.added {
        println!("  + data window {} on {}", dw.dw_name, dw.owner);
    }
    for dw in &report.datawindows.removed {
        println!("  - data window {} on {}", dw.dw_name, dw.owner);
    }
}

fn truncated(text: &str) -> String {
    const MAX: usize = 60;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
