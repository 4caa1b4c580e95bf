use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// Lifecycle of a run record.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    Partial,
    Failed,
}

/// The kind of a source object. Every record in the IR hangs off one of
/// these; `Table` objects are materialized from SQL references and carry
/// no source path.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Screen,
    UserObject,
    Menu,
    DataWindow,
    Function,
    Script,
    Library,
    Sql,
    Table,
}

#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    Opens,
    UsesDw,
    ReadsTable,
    WritesTable,
    TriggersEvent,
}

/// Statement classification. The textual form is upper-case to match the
/// normalized SQL it is derived from.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Other,
}

#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RwType {
    Read,
    Write,
}

/// Index of an object within an [`AnalysisIr`]. The persistence layer maps
/// these to database row ids when a run is applied.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(pub u32);

/// Index of a SQL statement within an [`AnalysisIr`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Serialize)]
pub struct SqlId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub name: String,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub object: ObjectId,
    pub name: String,
    pub script_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionRecord {
    pub object: ObjectId,
    pub name: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationRecord {
    pub src: ObjectId,
    pub dst: ObjectId,
    pub kind: RelationKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatementRecord {
    pub id: SqlId,
    pub owner: ObjectId,
    pub kind: SqlKind,
    pub text_norm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlTableRecord {
    pub sql: SqlId,
    pub table_name: String,
    pub rw: RwType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataWindowRecord {
    pub object: ObjectId,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
}

/// The complete in-memory IR of one analyzed run, before persistence.
/// A value-object layer: no I/O, no interior mutability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisIr {
    pub objects: Vec<ObjectRecord>,
    pub events: Vec<EventRecord>,
    pub functions: Vec<FunctionRecord>,
    pub relations: Vec<RelationRecord>,
    pub sql_statements: Vec<SqlStatementRecord>,
    pub sql_tables: Vec<SqlTableRecord>,
    pub datawindows: Vec<DataWindowRecord>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvariantViolation {
    #[error("record references unknown object id {0:?}")]
    UnknownObject(ObjectId),
    #[error("sql table row references unknown statement id {0:?}")]
    UnknownStatement(SqlId),
    #[error("relation confidence {0} outside [0, 1]")]
    ConfidenceRange(f64),
    #[error("duplicate object key ({kind}, {name})")]
    DuplicateObject { kind: ObjectKind, name: String },
    #[error("duplicate datawindow key (object {object:?}, {dw_name})")]
    DuplicateDataWindow { object: ObjectId, dw_name: String },
    #[error("SELECT statement {0:?} owns a WRITE table row")]
    SelectWithWrite(SqlId),
    #[error("{kind} statement {id:?} has no WRITE table row")]
    WriteKindWithoutWrite { id: SqlId, kind: SqlKind },
    #[error("{kind} relation to table '{table}' backed by no matching sql reference")]
    UnbackedTableRelation { kind: RelationKind, table: String },
}

impl AnalysisIr {
    fn object(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(id.0 as usize).filter(|o| o.id == id)
    }

    fn statement(&self, id: SqlId) -> Option<&SqlStatementRecord> {
        self.sql_statements.get(id.0 as usize).filter(|s| s.id == id)
    }

    /// Application-side enforcement of the schema invariants. The store
    /// runs this before opening a transaction so that a violating bundle
    /// never touches the database; the schema CHECK/UNIQUE constraints
    /// back it up.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut object_keys = AHashSet::with_capacity(self.objects.len());
        for object in &self.objects {
            if !object_keys.insert((object.kind, object.name.as_str())) {
                return Err(InvariantViolation::DuplicateObject {
                    kind: object.kind,
                    name: object.name.clone(),
                });
            }
        }

        let check_object = |id: ObjectId| {
            self.object(id)
                .map(|_| ())
                .ok_or(InvariantViolation::UnknownObject(id))
        };

        for event in &self.events {
            check_object(event.object)?;
        }
        for function in &self.functions {
            check_object(function.object)?;
        }

        for relation in &self.relations {
            check_object(relation.src)?;
            check_object(relation.dst)?;
            if !(0.0..=1.0).contains(&relation.confidence) {
                return Err(InvariantViolation::ConfidenceRange(relation.confidence));
            }
        }

        let mut tables_by_statement: AHashMap<SqlId, Vec<&SqlTableRecord>> = AHashMap::new();
        for row in &self.sql_tables {
            if self.statement(row.sql).is_none() {
                return Err(InvariantViolation::UnknownStatement(row.sql));
            }
            tables_by_statement.entry(row.sql).or_default().push(row);
        }

        for statement in &self.sql_statements {
            check_object(statement.owner)?;
            let rows = tables_by_statement
                .get(&statement.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            match statement.kind {
                SqlKind::Select => {
                    if rows.iter().any(|r| r.rw == RwType::Write) {
                        return Err(InvariantViolation::SelectWithWrite(statement.id));
                    }
                }
                SqlKind::Insert | SqlKind::Update | SqlKind::Delete | SqlKind::Merge => {
                    // A write-kind statement with table rows must name its
                    // primary target among them. No rows at all is allowed:
                    // the target can be suppressed by the exception list or
                    // be unextractable (a host-variable table).
                    if !rows.is_empty() && !rows.iter().any(|r| r.rw == RwType::Write) {
                        return Err(InvariantViolation::WriteKindWithoutWrite {
                            id: statement.id,
                            kind: statement.kind,
                        });
                    }
                }
                SqlKind::Other => {}
            }
        }

        let mut dw_keys = AHashSet::with_capacity(self.datawindows.len());
        for dw in &self.datawindows {
            check_object(dw.object)?;
            if !dw_keys.insert((dw.object, dw.dw_name.as_str())) {
                return Err(InvariantViolation::DuplicateDataWindow {
                    object: dw.object,
                    dw_name: dw.dw_name.clone(),
                });
            }
        }

        self.validate_table_relations()?;

        Ok(())
    }

    /// A `reads_table`/`writes_table` relation must be witnessed by a SQL
    /// reference of the matching direction owned by the source object. The
    /// one exception is the write edge a data-grid descriptor derives from
    /// its `update=` base table, which has no statement of its own.
    fn validate_table_relations(&self) -> Result<(), InvariantViolation> {
        let mut witnessed: AHashSet<(ObjectId, &str, RwType)> = AHashSet::new();
        for row in &self.sql_tables {
            if let Some(statement) = self.statement(row.sql) {
                witnessed.insert((statement.owner, row.table_name.as_str(), row.rw));
            }
        }

        let mut base_tables: AHashSet<(ObjectId, &str)> = AHashSet::new();
        for dw in &self.datawindows {
            if let Some(base) = &dw.base_table {
                base_tables.insert((dw.object, base.as_str()));
            }
        }

        for relation in &self.relations {
            let rw = match relation.kind {
                RelationKind::ReadsTable => RwType::Read,
                RelationKind::WritesTable => RwType::Write,
                _ => continue,
            };
            let Some(table) = self.object(relation.dst) else {
                continue;
            };
            if witnessed.contains(&(relation.src, table.name.as_str(), rw)) {
                continue;
            }
            if rw == RwType::Write && base_tables.contains(&(relation.src, table.name.as_str())) {
                continue;
            }
            return Err(InvariantViolation::UnbackedTableRelation {
                kind: relation.kind,
                table: table.name.clone(),
            });
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
