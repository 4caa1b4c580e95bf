use pbscan_lib_core::ir::ObjectKind;
use rusqlite::params;
use serde::Serialize;

use super::{Store, StoreError};

/// Row limits on the query surface: callers may ask for 10–2000 rows,
/// with 200 when unspecified.
pub(crate) const DEFAULT_ROW_LIMIT: usize = 200;

fn clamp_limit(limit: Option<usize>) -> i64 {
    limit.unwrap_or(DEFAULT_ROW_LIMIT).clamp(10, 2000) as i64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRow {
    pub kind: String,
    pub name: String,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFunctionRow {
    pub object: String,
    pub object_kind: String,
    pub event_name: String,
    /// Names of the objects this object `calls` — the function owners an
    /// event's script can reach, resolved at the object level.
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableImpactRow {
    pub table_name: String,
    pub object: String,
    pub rw_type: String,
    pub sql_kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallGraphRow {
    pub src: String,
    pub src_kind: String,
    pub dst: String,
    pub dst_kind: String,
    pub relation_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataWindowRow {
    pub object: String,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub source_version: Option<String>,
}

/// Read-side of the store: the queries the report writers and the
/// dashboard consume. Everything is scoped by `run_id` and bounded by a
/// clamped row limit.
impl Store {
    pub fn list_objects(
        &self,
        run_id: &str,
        kind: Option<ObjectKind>,
        name_search: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ObjectRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT kind, name, module, source_path FROM objects
             WHERE run_id = ?1
               AND (?2 IS NULL OR kind = ?2)
               AND (?3 IS NULL OR name LIKE '%' || ?3 || '%')
             ORDER BY kind, name
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                run_id,
                kind.map(|k| k.to_string()),
                name_search,
                clamp_limit(limit)
            ],
            |row| {
                Ok(ObjectRow {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    module: row.get(2)?,
                    source_path: row.get(3)?,
                })
            },
        )?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// For each object: its events, with the objects its scripts call.
    pub fn event_function_map(
        &self,
        run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventFunctionRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT o.name, o.kind, e.event_name,
                    (SELECT GROUP_CONCAT(d.name, ',')
                       FROM relations r JOIN objects d ON d.id = r.dst_id
                      WHERE r.run_id = ?1 AND r.src_id = o.id AND r.relation_type = 'calls'
                      ORDER BY d.name)
             FROM events e JOIN objects o ON o.id = e.object_id
             WHERE e.run_id = ?1
             ORDER BY o.name, e.event_name
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run_id, clamp_limit(limit)], |row| {
            let calls: Option<String> = row.get(3)?;
            Ok(EventFunctionRow {
                object: row.get(0)?,
                object_kind: row.get(1)?,
                event_name: row.get(2)?,
                calls: calls
                    .map(|joined| joined.split(',').map(str::to_owned).collect())
                    .unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Which objects touch which tables, and how.
    pub fn table_impact(
        &self,
        run_id: &str,
        table_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TableImpactRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT st.table_name, o.name, st.rw_type, s.sql_kind
             FROM sql_tables st
             JOIN sql_statements s ON s.id = st.sql_id
             JOIN objects o ON o.id = s.owner_id
             WHERE st.run_id = ?1 AND (?2 IS NULL OR st.table_name = ?2)
             ORDER BY st.table_name, o.name, st.rw_type, s.sql_kind
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![run_id, table_name, clamp_limit(limit)], |row| {
            Ok(TableImpactRow {
                table_name: row.get(0)?,
                object: row.get(1)?,
                rw_type: row.get(2)?,
                sql_kind: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// The `opens`/`calls` navigation edges between objects.
    pub fn screen_call_graph(
        &self,
        run_id: &str,
        src_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CallGraphRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT s.name, s.kind, d.name, d.kind, r.relation_type, r.confidence
             FROM relations r
             JOIN objects s ON s.id = r.src_id
             JOIN objects d ON d.id = r.dst_id
             WHERE r.run_id = ?1
               AND r.relation_type IN ('opens', 'calls')
               AND (?2 IS NULL OR s.name = ?2)
             ORDER BY s.name, d.name, r.relation_type
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![run_id, src_name, clamp_limit(limit)], |row| {
            Ok(CallGraphRow {
                src: row.get(0)?,
                src_kind: row.get(1)?,
                dst: row.get(2)?,
                dst_kind: row.get(3)?,
                relation_type: row.get(4)?,
                confidence: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Objects that take part in no relation and own no event or
    /// function: removal candidates, subject to human review.
    pub fn unused_object_candidates(
        &self,
        run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ObjectRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT o.kind, o.name, o.module, o.source_path
             FROM objects o
             WHERE o.run_id = ?1
               AND NOT EXISTS (SELECT 1 FROM relations r
                                WHERE r.run_id = ?1 AND (r.src_id = o.id OR r.dst_id = o.id))
               AND NOT EXISTS (SELECT 1 FROM events e
                                WHERE e.run_id = ?1 AND e.object_id = o.id)
               AND NOT EXISTS (SELECT 1 FROM functions f
                                WHERE f.run_id = ?1 AND f.object_id = o.id)
             ORDER BY o.kind, o.name
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run_id, clamp_limit(limit)], |row| {
            Ok(ObjectRow {
                kind: row.get(0)?,
                name: row.get(1)?,
                module: row.get(2)?,
                source_path: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn data_windows(
        &self,
        run_id: &str,
        object_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<DataWindowRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT o.name, dw.dw_name, dw.base_table, dw.sql_select
             FROM data_windows dw JOIN objects o ON o.id = dw.object_id
             WHERE dw.run_id = ?1 AND (?2 IS NULL OR o.name = ?2)
             ORDER BY o.name, dw.dw_name
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![run_id, object_name, clamp_limit(limit)], |row| {
            Ok(DataWindowRow {
                object: row.get(0)?,
                dw_name: row.get(1)?,
                base_table: row.get(2)?,
                sql_select: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn run(&self, run_id: &str) -> Result<Option<RunRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT run_id, started_at, finished_at, status, source_version
             FROM runs WHERE run_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![run_id], |row| {
            Ok(RunRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                status: row.get(3)?,
                source_version: row.get(4)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn runs(&self, limit: Option<usize>) -> Result<Vec<RunRow>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT run_id, started_at, finished_at, status, source_version
             FROM runs ORDER BY started_at DESC, run_id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![clamp_limit(limit)], |row| {
            Ok(RunRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                status: row.get(3)?,
                source_version: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
