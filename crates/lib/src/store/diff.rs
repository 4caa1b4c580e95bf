use std::collections::BTreeSet;

use rusqlite::params;
use serde::Serialize;

use super::{Store, StoreError};

/// Deterministic identity keys for cross-run comparison. Database row ids
/// are meaningless across runs, so each record family is keyed by the
/// names that survive re-analysis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ObjectKey {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelationKey {
    pub src: String,
    pub dst: String,
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SqlKey {
    pub owner: String,
    pub sql_kind: String,
    pub sql_text_norm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DataWindowKey {
    pub owner: String,
    pub dw_name: String,
    pub base_table: Option<String>,
}

/// One family's set difference. `changed` is always empty: a record whose
/// key differs in any component shows up as one removal plus one
/// addition, and per-field change tracking is deliberately not attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffSection<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub changed: Vec<T>,
}

impl<T: Ord + Clone> DiffSection<T> {
    fn between(old: &BTreeSet<T>, new: &BTreeSet<T>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
            changed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub run_old: String,
    pub run_new: String,
    pub objects: DiffSection<ObjectKey>,
    pub relations: DiffSection<RelationKey>,
    pub sql_statements: DiffSection<SqlKey>,
    pub datawindows: DiffSection<DataWindowKey>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.objects.added.is_empty()
            && self.objects.removed.is_empty()
            && self.relations.added.is_empty()
            && self.relations.removed.is_empty()
            && self.sql_statements.added.is_empty()
            && self.sql_statements.removed.is_empty()
            && self.datawindows.added.is_empty()
            && self.datawindows.removed.is_empty()
    }
}

impl Store {
    /// Compare two closed runs as set differences over the four record
    /// families.
    pub fn diff(&self, run_old: &str, run_new: &str) -> Result<DiffReport, StoreError> {
        for run_id in [run_old, run_new] {
            if !self.run_exists(run_id)? {
                return Err(StoreError::UnknownRun(run_id.to_owned()));
            }
        }

        Ok(DiffReport {
            run_old: run_old.to_owned(),
            run_new: run_new.to_owned(),
            objects: DiffSection::between(&self.object_keys(run_old)?, &self.object_keys(run_new)?),
            relations: DiffSection::between(
                &self.relation_keys(run_old)?,
                &self.relation_keys(run_new)?,
            ),
            sql_statements: DiffSection::between(&self.sql_keys(run_old)?, &self.sql_keys(run_new)?),
            datawindows: DiffSection::between(
                &self.datawindow_keys(run_old)?,
                &self.datawindow_keys(run_new)?,
            ),
        })
    }

    fn object_keys(&self, run_id: &str) -> Result<BTreeSet<ObjectKey>, StoreError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT kind, name FROM objects WHERE run_id = ?1")?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ObjectKey {
                kind: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn relation_keys(&self, run_id: &str) -> Result<BTreeSet<RelationKey>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT s.kind || ':' || s.name, d.kind || ':' || d.name, r.relation_type
             FROM relations r
             JOIN objects s ON s.id = r.src_id
             JOIN objects d ON d.id = r.dst_id
             WHERE r.run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RelationKey {
                src: row.get(0)?,
                dst: row.get(1)?,
                relation_type: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn sql_keys(&self, run_id: &str) -> Result<BTreeSet<SqlKey>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT o.name, s.sql_kind, s.sql_text_norm
             FROM sql_statements s JOIN objects o ON o.id = s.owner_id
             WHERE s.run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(SqlKey {
                owner: row.get(0)?,
                sql_kind: row.get(1)?,
                sql_text_norm: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn datawindow_keys(&self, run_id: &str) -> Result<BTreeSet<DataWindowKey>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT o.name, dw.dw_name, dw.base_table
             FROM data_windows dw JOIN objects o ON o.id = dw.object_id
             WHERE dw.run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(DataWindowKey {
                owner: row.get(0)?,
                dw_name: row.get(1)?,
                base_table: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pbscan_lib_core::ir::{
        AnalysisIr, ObjectId, ObjectKind, ObjectRecord, RelationKind, RelationRecord, RunStatus,
    };
    use pretty_assertions::assert_eq;

    use super::super::RunRecord;
    use super::*;

    fn begin(store: &Store, run_id: &str) {
        store
            .begin_run(&RunRecord {
                run_id: run_id.into(),
                started_at: Utc::now(),
                finished_at: None,
                status: RunStatus::Running,
                source_version: None,
            })
            .unwrap();
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

    #[test]
    fn added_and_removed_objects_with_their_relations() {
        let mut store = Store::open_in_memory().unwrap();

        // r1: w_main opens w_old. r2: w_old is gone, w_new appears.
        let old = AnalysisIr {
            objects: vec![
                object(0, ObjectKind::Screen, "w_main"),
                object(1, ObjectKind::Screen, "w_old"),
            ],
            relations: vec![RelationRecord {
                src: ObjectId(0),
                dst: ObjectId(1),
                kind: RelationKind::Opens,
                confidence: 0.95,
            }],
            ..Default::default()
        };
        let new = AnalysisIr {
            objects: vec![
                object(0, ObjectKind::Screen, "w_main"),
                object(1, ObjectKind::Screen, "w_new"),
            ],
            relations: vec![RelationRecord {
                src: ObjectId(0),
                dst: ObjectId(1),
                kind: RelationKind::Opens,
                confidence: 0.95,
            }],
            ..Default::default()
        };

        begin(&store, "r1");
        store.persist("r1", &old).unwrap();
        begin(&store, "r2");
        store.persist("r2", &new).unwrap();

        let report = store.diff("r1", "r2").unwrap();
        assert_eq!(
            report.objects.added,
            vec![ObjectKey {
                kind: "screen".into(),
                name: "w_new".into()
            }]
        );
        assert_eq!(
            report.objects.removed,
            vec![ObjectKey {
                kind: "screen".into(),
                name: "w_old".into()
            }]
        );
        assert_eq!(
            report.relations.added,
            vec![RelationKey {
                src: "screen:w_main".into(),
                dst: "screen:w_new".into(),
                relation_type: "opens".into()
            }]
        );
        assert_eq!(report.relations.removed.len(), 1);
        assert!(report.objects.changed.is_empty());
    }

    #[test]
    fn identical_runs_diff_empty() {
        let mut store = Store::open_in_memory().unwrap();
        let ir = AnalysisIr {
            objects: vec![object(0, ObjectKind::Screen, "w_main")],
            ..Default::default()
        };
        begin(&store, "r1");
        store.persist("r1", &ir).unwrap();
        begin(&store, "r2");
        store.persist("r2", &ir).unwrap();

        let report = store.diff("r1", "r2").unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn unknown_run_is_an_input_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.diff("a", "b"),
            Err(StoreError::UnknownRun(_))
        ));
    }
}
