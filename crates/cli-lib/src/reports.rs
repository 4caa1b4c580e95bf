use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use pbscan_lib::store::{
    CallGraphRow, DataWindowRow, EventFunctionRow, ObjectRow, RunRow, Store, StoreError,
    TableImpactRow,
};
use serde::Serialize;

/// Everything the report renderers consume, gathered once from the IR
/// query surface. The renderers below only format; they never query.
#[derive(Debug, Serialize)]
pub(crate) struct ReportBundle {
    pub run: RunRow,
    pub objects: Vec<ObjectRow>,
    pub event_function_map: Vec<EventFunctionRow>,
    pub table_impact: Vec<TableImpactRow>,
    pub screen_call_graph: Vec<CallGraphRow>,
    pub unused_object_candidates: Vec<ObjectRow>,
    pub data_windows: Vec<DataWindowRow>,
}

pub(crate) fn gather(
    store: &Store,
    run: RunRow,
    limit: Option<usize>,
) -> Result<ReportBundle, StoreError> {
    let run_id = run.run_id.clone();
    Ok(ReportBundle {
        objects: store.list_objects(&run_id, None, None, limit)?,
        event_function_map: store.event_function_map(&run_id, limit)?,
        table_impact: store.table_impact(&run_id, None, limit)?,
        screen_call_graph: store.screen_call_graph(&run_id, None, limit)?,
        unused_object_candidates: store.unused_object_candidates(&run_id, limit)?,
        data_windows: store.data_windows(&run_id, None, limit)?,
        run,
    })
}

pub(crate) fn write_json(bundle: &ReportBundle, out_dir: &Path) -> std::io::Result<()> {
    let path = out_dir.join("report.json");
    let file = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(file, bundle)?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub(crate) fn write_csv(bundle: &ReportBundle, out_dir: &Path) -> csv::Result<()> {
    csv_file(out_dir, "objects.csv", &["kind", "name", "module", "source_path"], |w| {
        for o in &bundle.objects {
            w.write_record([
                o.kind.as_str(),
                o.name.as_str(),
                o.module.as_deref().unwrap_or(""),
                o.source_path.as_deref().unwrap_or(""),
            ])?;
        }
        Ok(())
    })?;

    csv_file(out_dir, "events.csv", &["object", "object_kind", "event", "calls"], |w| {
        for e in &bundle.event_function_map {
            w.write_record([
                e.object.as_str(),
                e.object_kind.as_str(),
                e.event_name.as_str(),
                e.calls.join(";").as_str(),
            ])?;
        }
        Ok(())
    })?;

    csv_file(
        out_dir,
        "table_impact.csv",
        &["table", "object", "rw_type", "sql_kind"],
        |w| {
            for t in &bundle.table_impact {
                w.write_record([
                    t.table_name.as_str(),
                    t.object.as_str(),
                    t.rw_type.as_str(),
                    t.sql_kind.as_str(),
                ])?;
            }
            Ok(())
        },
    )?;

    csv_file(
        out_dir,
        "call_graph.csv",
        &["src", "src_kind", "dst", "dst_kind", "relation_type", "confidence"],
        |w| {
            for r in &bundle.screen_call_graph {
                w.write_record([
                    r.src.as_str(),
                    r.src_kind.as_str(),
                    r.dst.as_str(),
                    r.dst_kind.as_str(),
                    r.relation_type.as_str(),
                    format!("{:.3}", r.confidence).as_str(),
                ])?;
            }
            Ok(())
        },
    )?;

    csv_file(
        out_dir,
        "unused_objects.csv",
        &["kind", "name", "module", "source_path"],
        |w| {
            for o in &bundle.unused_object_candidates {
                w.write_record([
                    o.kind.as_str(),
                    o.name.as_str(),
                    o.module.as_deref().unwrap_or(""),
                    o.source_path.as_deref().unwrap_or(""),
                ])?;
            }
            Ok(())
        },
    )?;

    csv_file(
        out_dir,
        "data_windows.csv",
        &["object", "dw_name", "base_table", "sql_select"],
        |w| {
            for d in &bundle.data_windows {
                w.write_record([
                    d.object.as_str(),
                    d.dw_name.as_str(),
                    d.base_table.as_deref().unwrap_or(""),
                    d.sql_select.as_deref().unwrap_or(""),
                ])?;
            }
            Ok(())
        },
    )?;

    Ok(())
}

fn csv_file(
    out_dir: &Path,
    name: &str,
    header: &[&str],
    write_rows: impl FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
) -> csv::Result<()> {
    let path = out_dir.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(header)?;
    write_rows(&mut writer)?;
    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// A single self-contained page. Deliberately plain: the dashboard, not
/// this file, is the place for interactive views.
pub(crate) fn write_html(bundle: &ReportBundle, out_dir: &Path) -> std::io::Result<()> {
    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>pbscan report</h1>\
         <p>run <code>{}</code> &mdash; status {}, started {}</p>",
        escape(&bundle.run.run_id),
        escape(&bundle.run.status),
        escape(&bundle.run.started_at),
    );

    html_table(
        &mut body,
        "Objects",
        &["kind", "name", "module", "source"],
        bundle.objects.iter().map(|o| {
            vec![
                o.kind.clone(),
                o.name.clone(),
                o.module.clone().unwrap_or_default(),
                o.source_path.clone().unwrap_or_default(),
            ]
        }),
    );
    html_table(
        &mut body,
        "Events",
        &["object", "event", "calls"],
        bundle
            .event_function_map
            .iter()
            .map(|e| vec![e.object.clone(), e.event_name.clone(), e.calls.join(", ")]),
    );
    html_table(
        &mut body,
        "Table impact",
        &["table", "object", "rw", "kind"],
        bundle.table_impact.iter().map(|t| {
            vec![
                t.table_name.clone(),
                t.object.clone(),
                t.rw_type.clone(),
                t.sql_kind.clone(),
            ]
        }),
    );
    html_table(
        &mut body,
        "Call graph",
        &["src", "dst", "relation", "confidence"],
        bundle.screen_call_graph.iter().map(|r| {
            vec![
                r.src.clone(),
                r.dst.clone(),
                r.relation_type.clone(),
                format!("{:.3}", r.confidence),
            ]
        }),
    );
    html_table(
        &mut body,
        "Unused object candidates",
        &["kind", "name"],
        bundle
            .unused_object_candidates
            .iter()
            .map(|o| vec![o.kind.clone(), o.name.clone()]),
    );
    html_table(
        &mut body,
        "Data windows",
        &["object", "name", "base table"],
        bundle.data_windows.iter().map(|d| {
            vec![
                d.object.clone(),
                d.dw_name.clone(),
                d.base_table.clone().unwrap_or_default(),
            ]
        }),
    );

    let path = out_dir.join("report.html");
    let mut file = BufWriter::new(File::create(&path)?);
    write!(
        file,
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>pbscan report</title>\
         <style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse;margin-bottom:2em}}\
         th,td{{border:1px solid #ccc;padding:4px 8px;text-align:left}}th{{background:#eee}}</style>\
         </head><body>{body}</body></html>"
    )?;
    file.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn html_table(
    body: &mut String,
    title: &str,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) {
    let _ = write!(body, "<h2>{}</h2><table><tr>", escape(title));
    for column in header {
        let _ = write!(body, "<th>{}</th>", escape(column));
    }
    body.push_str("</tr>");
    for row in rows {
        body.push_str("<tr>");
        for cell in row {
            let _ = write!(body, "<td>{}</td>", escape(&cell));
        }
        body.push_str("</tr>");
    }
    body.push_str("</table>");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
