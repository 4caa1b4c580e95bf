//! End-to-end runs over small on-disk corpora: extractor → parse pool →
//! analyzer → store, checked through the query surface.

use std::path::Path;

use pbscan_lib::config::ScanConfig;
use pbscan_lib::extract::TextExtractor;
use pbscan_lib::runner::{CancellationToken, RunOptions, Runner};
use pbscan_lib::store::Store;
use pbscan_lib_core::ir::{ObjectKind, RunStatus};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Corpus {
    dir: TempDir,
}

impl Corpus {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn file(self, name: &str, content: &str) -> Self {
        std::fs::write(self.dir.path().join(name), content).unwrap();
        self
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn run_with_options(corpus: &Corpus, store: &mut Store, options: RunOptions) -> pbscan_lib::runner::Outcome {
    let runner = Runner::new(ScanConfig::default());
    runner
        .run(
            &TextExtractor,
            corpus.path(),
            corpus.path(),
            store,
            &options,
            &CancellationToken::new(),
        )
        .unwrap()
}

fn run(corpus: &Corpus, store: &mut Store) -> pbscan_lib::runner::Outcome {
    run_with_options(corpus, store, RunOptions::default())
}

#[test]
fn screen_with_write_sql_produces_tables_and_relations() {
    let corpus = Corpus::new().file(
        "s1.srw",
        "\
global type s1 from window
end type
event save;
UPDATE tb_x SET a = 1 WHERE k = :k;
INSERT INTO tb_y(a) VALUES(1);
end event
",
    );
    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.objects_n, 3);
    assert_eq!(outcome.sql_n, 2);

    let objects = store.list_objects(&outcome.run_id, None, None, None).unwrap();
    let names: Vec<_> = objects.iter().map(|o| (o.kind.as_str(), o.name.as_str())).collect();
    assert_eq!(
        names,
        vec![("screen", "s1"), ("table", "tb_x"), ("table", "tb_y")]
    );

    let impact = store.table_impact(&outcome.run_id, None, None).unwrap();
    let rows: Vec<_> = impact
        .iter()
        .map(|r| (r.table_name.as_str(), r.rw_type.as_str(), r.sql_kind.as_str()))
        .collect();
    assert_eq!(
        rows,
        vec![("tb_x", "WRITE", "UPDATE"), ("tb_y", "WRITE", "INSERT")]
    );
}

#[test]
fn open_and_trigger_resolve_across_the_run() {
    let corpus = Corpus::new()
        .file(
            "s1.srw",
            "\
global type s1 from window
end type
event ue_save;
return
end event
event clicked;
open(s2)
triggerevent(\"ue_save\")
end event
",
        )
        .file("s2.srw", "global type s2 from window\nend type\n");
    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);

    assert_eq!(outcome.status, RunStatus::Ok);
    let graph = store.screen_call_graph(&outcome.run_id, Some("s1"), None).unwrap();
    assert_eq!(graph.len(), 1);
    assert_eq!(graph[0].dst, "s2");
    assert_eq!(graph[0].relation_type, "opens");
    assert_eq!(graph[0].confidence, 0.95);
}

#[test]
fn descriptor_yields_grid_tables_and_base_table_write() {
    let corpus = Corpus::new().file(
        "dw_a.srd",
        r#"release 12;
datawindow(units=0)
table( retrieve="SELECT a.x FROM tb_a a JOIN tb_b b ON a.k = b.k" update="tb_a" )
"#,
    );
    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.dw_n, 1);

    let objects = store.list_objects(&outcome.run_id, None, None, None).unwrap();
    let names: Vec<_> = objects.iter().map(|o| (o.kind.as_str(), o.name.as_str())).collect();
    assert_eq!(
        names,
        vec![("data_window", "dw_a"), ("table", "tb_a"), ("table", "tb_b")]
    );

    let impact = store.table_impact(&outcome.run_id, Some("tb_b"), None).unwrap();
    assert_eq!(impact[0].rw_type, "READ");
    assert_eq!(impact[0].sql_kind, "SELECT");

    let dws = store.data_windows(&outcome.run_id, None, None).unwrap();
    assert_eq!(dws[0].base_table.as_deref(), Some("tb_a"));
}

#[test]
fn diff_between_two_corpus_versions() {
    let old = Corpus::new()
        .file("s1.srw", "global type s1 from window\nend type\n")
        .file("dw_old.srd", "release 12;\ndatawindow(units=0)\n");
    let new = Corpus::new()
        .file("s1.srw", "global type s1 from window\nend type\n")
        .file("s3.srw", "global type s3 from window\nend type\n");

    let mut store = Store::open_in_memory().unwrap();
    let first = run(&old, &mut store);
    let second = run(&new, &mut store);

    let report = store.diff(&first.run_id, &second.run_id).unwrap();
    let added: Vec<_> = report.objects.added.iter().map(|o| o.name.as_str()).collect();
    let removed: Vec<_> = report.objects.removed.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(added, vec!["s3"]);
    assert_eq!(removed, vec!["dw_old"]);
}

#[test]
fn analyzing_the_same_corpus_twice_diffs_empty() {
    let corpus = Corpus::new()
        .file(
            "s1.srw",
            "\
global type s1 from window
end type
event ue_save;
UPDATE tb_x SET a = 1;
open(s2)
end event
",
        )
        .file("s2.srw", "global type s2 from window\nend type\n");

    let mut store = Store::open_in_memory().unwrap();
    let first = run(&corpus, &mut store);
    let second = run(&corpus, &mut store);

    assert_eq!(first.status, RunStatus::Ok);
    let report = store.diff(&first.run_id, &second.run_id).unwrap();
    assert!(report.is_empty(), "{report:?}");
}

#[test]
fn error_cap_abandons_one_file_and_keeps_the_rest() {
    let mut broken = String::new();
    for _ in 0..101 {
        broken.push_str("event ;\n");
    }
    let corpus = Corpus::new()
        .file("w_bad.srw", &broken)
        .file("s1.srw", "global type s1 from window\nend type\n");

    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].message.contains("abandoned"));
    assert_eq!(
        outcome.failures[0].path.as_deref().map(|p| p.ends_with("w_bad.srw")),
        Some(true)
    );

    let objects = store
        .list_objects(&outcome.run_id, Some(ObjectKind::Screen), None, None)
        .unwrap();
    let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["s1"]);
}

#[test]
fn ambiguous_function_yields_two_half_confidence_relations() {
    let corpus = Corpus::new()
        .file(
            "w_caller.srw",
            "\
global type w_caller from window
end type
event clicked;
f(1)
end event
",
        )
        .file(
            "u_one.sru",
            "\
global type u_one from nonvisualobject
end type
function integer f (integer a);
return a
end function
",
        )
        .file(
            "u_two.sru",
            "\
global type u_two from nonvisualobject
end type
function integer f (integer a);
return a + 1
end function
",
        );

    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);
    assert_eq!(outcome.status, RunStatus::Ok);

    let graph = store.screen_call_graph(&outcome.run_id, Some("w_caller"), None).unwrap();
    let calls: Vec<_> = graph
        .iter()
        .filter(|r| r.relation_type == "calls")
        .map(|r| (r.dst.as_str(), r.confidence))
        .collect();
    assert_eq!(calls, vec![("u_one", 0.425), ("u_two", 0.425)]);
}

#[test]
fn empty_corpus_closes_ok_with_zero_records() {
    let corpus = Corpus::new();
    let mut store = Store::open_in_memory().unwrap();
    let outcome = run(&corpus, &mut store);

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.objects_n, 0);
    assert!(outcome.failures.is_empty());

    let runs = store.runs(None).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "ok");
}

#[test]
fn cancellation_finalizes_failed_with_nothing_persisted() {
    let corpus = Corpus::new().file("s1.srw", "global type s1 from window\nend type\n");
    let mut store = Store::open_in_memory().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let runner = Runner::new(ScanConfig::default());
    let outcome = runner
        .run(
            &TextExtractor,
            corpus.path(),
            corpus.path(),
            &mut store,
            &RunOptions::default(),
            &cancel,
        )
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code(), 1);
    let objects = store.list_objects(&outcome.run_id, None, None, None).unwrap();
    assert!(objects.is_empty());
}

#[test]
fn run_id_and_source_version_overrides_are_respected() {
    let corpus = Corpus::new().file("s1.srw", "global type s1 from window\nend type\n");
    let mut store = Store::open_in_memory().unwrap();
    let outcome = run_with_options(
        &corpus,
        &mut store,
        RunOptions {
            run_id: Some("release-42".into()),
            source_version: Some("42.0".into()),
        },
    );

    assert_eq!(outcome.run_id, "release-42");
    let runs = store.runs(None).unwrap();
    assert_eq!(runs[0].run_id, "release-42");
    assert_eq!(runs[0].source_version.as_deref(), Some("42.0"));
}
