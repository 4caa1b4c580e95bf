use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use pbscan_lib_core::ir::{AnalysisIr, InvariantViolation, RunStatus};
use rusqlite::{Connection, params};

mod diff;
mod queries;
mod schema;

pub use diff::{DataWindowKey, DiffReport, DiffSection, ObjectKey, RelationKey, SqlKey};
pub use queries::{
    CallGraphRow, DataWindowRow, EventFunctionRow, ObjectRow, RunRow, TableImpactRow,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub source_version: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("another run is active against store {0}")]
    LeaseHeld(String),
    #[error("unknown run id {0}")]
    UnknownRun(String),
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Process-wide leases, keyed by canonical store path. Concurrent runs
/// against the same store are rejected instead of serialized: the second
/// caller gets an error it can surface immediately.
static LEASES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

#[derive(Debug)]
struct Lease {
    key: String,
}

impl Lease {
    fn acquire(key: String) -> Result<Self, StoreError> {
        let leases = LEASES.get_or_init(Mutex::default);
        let mut held = leases.lock().expect("lease registry poisoned");
        if !held.insert(key.clone()) {
            return Err(StoreError::LeaseHeld(key));
        }
        Ok(Self { key })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(leases) = LEASES.get() {
            leases
                .lock()
                .expect("lease registry poisoned")
                .remove(&self.key);
        }
    }
}

/// Stable lease key for a database path. The file may not exist yet on
/// first open, so canonicalize the parent directory instead.
fn lease_key(path: &Path) -> String {
    if let Ok(canonical) = path.canonicalize() {
        return canonical.display().to_string();
    }
    let canonical_parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .and_then(|p| p.canonicalize().ok());
    match (canonical_parent, path.file_name()) {
        (Some(parent), Some(name)) => parent.join(name).display().to_string(),
        _ => path.display().to_string(),
    }
}

/// The IR store: one SQLite database holding any number of closed runs.
/// A run is applied atomically; within the transaction writes follow the
/// dependency order runs → objects → events/functions/data windows →
/// statements → statement tables → relations.
pub struct Store {
    conn: Connection,
    _lease: Option<Lease>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let lease = Lease::acquire(lease_key(path))?;
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn,
            _lease: Some(lease),
        })
    }

    /// An unleased in-memory store. Each call opens a distinct database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn, _lease: None })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM runs WHERE run_id = ?1")?;
        Ok(stmt.exists(params![run_id])?)
    }

    /// Write the run row with `status = running`. The row is committed
    /// immediately so observers can see the run in flight; the records
    /// themselves land later in a single transaction.
    pub fn begin_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO runs (run_id, started_at, finished_at, status, source_version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.run_id,
                run.started_at,
                run.finished_at,
                run.status.to_string(),
                run.source_version,
            ],
        )?;
        Ok(())
    }

    pub fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?2, finished_at = ?3 WHERE run_id = ?1",
            params![run_id, status.to_string(), finished_at],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownRun(run_id.to_owned()));
        }
        Ok(())
    }

    /// Apply a run's records atomically. The bundle is validated first so
    /// an invariant violation aborts before any write; a mid-transaction
    /// constraint failure rolls the whole run back.
    pub fn persist(&mut self, run_id: &str, ir: &AnalysisIr) -> Result<(), StoreError> {
        ir.validate()?;
        if !self.run_exists(run_id)? {
            return Err(StoreError::UnknownRun(run_id.to_owned()));
        }

        let tx = self.conn.transaction()?;

        let mut object_rows = Vec::with_capacity(ir.objects.len());
        {
            let mut insert = tx.prepare(
                "INSERT INTO objects (run_id, kind, name, module, source_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for object in &ir.objects {
                insert.execute(params![
                    run_id,
                    object.kind.to_string(),
                    object.name,
                    object.module,
                    object.source_path,
                ])?;
                object_rows.push(tx.last_insert_rowid());
            }

            let mut insert = tx.prepare(
                "INSERT INTO events (run_id, object_id, event_name, script_ref)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in &ir.events {
                insert.execute(params![
                    run_id,
                    object_rows[event.object.0 as usize],
                    event.name,
                    event.script_ref,
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO functions (run_id, object_id, function_name, signature)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for function in &ir.functions {
                insert.execute(params![
                    run_id,
                    object_rows[function.object.0 as usize],
                    function.name,
                    function.signature,
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO data_windows (run_id, object_id, dw_name, base_table, sql_select)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for dw in &ir.datawindows {
                insert.execute(params![
                    run_id,
                    object_rows[dw.object.0 as usize],
                    dw.dw_name,
                    dw.base_table,
                    dw.sql_select,
                ])?;
            }

            let mut sql_rows = Vec::with_capacity(ir.sql_statements.len());
            let mut insert = tx.prepare(
                "INSERT INTO sql_statements (run_id, owner_id, sql_kind, sql_text_norm)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for statement in &ir.sql_statements {
                insert.execute(params![
                    run_id,
                    object_rows[statement.owner.0 as usize],
                    statement.kind.to_string(),
                    statement.text_norm,
                ])?;
                sql_rows.push(tx.last_insert_rowid());
            }

            let mut insert = tx.prepare(
                "INSERT INTO sql_tables (run_id, sql_id, table_name, rw_type)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in &ir.sql_tables {
                insert.execute(params![
                    run_id,
                    sql_rows[row.sql.0 as usize],
                    row.table_name,
                    row.rw.to_string(),
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO relations (run_id, src_id, dst_id, relation_type, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for relation in &ir.relations {
                insert.execute(params![
                    run_id,
                    object_rows[relation.src.0 as usize],
                    object_rows[relation.dst.0 as usize],
                    relation.kind.to_string(),
                    relation.confidence,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pbscan_lib_core::ir::{
        ObjectId, ObjectKind, ObjectRecord, RelationKind, RelationRecord, RwType, SqlId, SqlKind,
        SqlStatementRecord, SqlTableRecord,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn run_record(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            source_version: None,
        }
    }

    fn object(id: u32, kind: ObjectKind, name: &str) -> ObjectRecord {
        ObjectRecord {
            id: ObjectId(id),
            kind,
            name: name.into(),
            module: None,
            source_path: None,
        }
    }

    fn sample_ir() -> AnalysisIr {
        AnalysisIr {
            objects: vec![
                object(0, ObjectKind::Screen, "w_main"),
                object(1, ObjectKind::Table, "tb_x"),
            ],
            sql_statements: vec![SqlStatementRecord {
                id: SqlId(0),
                owner: ObjectId(0),
                kind: SqlKind::Update,
                text_norm: "UPDATE TB_X SET A = 1".into(),
            }],
            sql_tables: vec![SqlTableRecord {
                sql: SqlId(0),
                table_name: "tb_x".into(),
                rw: RwType::Write,
            }],
            relations: vec![RelationRecord {
                src: ObjectId(0),
                dst: ObjectId(1),
                kind: RelationKind::WritesTable,
                confidence: 0.9,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn persist_and_finalize_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        store.persist("r1", &sample_ir()).unwrap();
        store.finalize_run("r1", RunStatus::Ok, Utc::now()).unwrap();

        let objects: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM objects WHERE run_id = 'r1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(objects, 2);

        let status: String = store
            .conn()
            .query_row("SELECT status FROM runs WHERE run_id = 'r1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "ok");
    }

    #[test]
    fn invalid_bundle_leaves_no_rows_behind() {
        let mut store = Store::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();

        let mut ir = sample_ir();
        ir.relations[0].confidence = 7.0;
        assert!(matches!(
            store.persist("r1", &ir),
            Err(StoreError::Invariant(_))
        ));

        let objects: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM objects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(objects, 0);
    }

    #[test]
    fn schema_rejects_bad_enum_values() {
        let store = Store::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO objects (run_id, kind, name) VALUES ('r1', 'screen', 'w_x')",
                [],
            )
            .unwrap();

        let bad_relation = store.conn().execute(
            "INSERT INTO relations (run_id, src_id, dst_id, relation_type, confidence)
             VALUES ('r1', 1, 1, 'summons', 0.5)",
            [],
        );
        assert!(bad_relation.is_err());

        let bad_confidence = store.conn().execute(
            "INSERT INTO relations (run_id, src_id, dst_id, relation_type, confidence)
             VALUES ('r1', 1, 1, 'calls', 1.5)",
            [],
        );
        assert!(bad_confidence.is_err());
    }

    #[test]
    fn duplicate_object_key_is_rejected_by_schema() {
        let store = Store::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        let insert = "INSERT INTO objects (run_id, kind, name) VALUES ('r1', 'screen', 'w_x')";
        store.conn().execute(insert, []).unwrap();
        assert!(store.conn().execute(insert, []).is_err());
    }

    #[test]
    fn store_lease_rejects_concurrent_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.db");
        let first = Store::open(&path).unwrap();
        assert!(matches!(Store::open(&path), Err(StoreError::LeaseHeld(_))));
        drop(first);
        assert!(Store::open(&path).is_ok());
    }

    #[test]
    fn finalize_unknown_run_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.finalize_run("nope", RunStatus::Failed, Utc::now()),
            Err(StoreError::UnknownRun(_))
        ));
    }
}
