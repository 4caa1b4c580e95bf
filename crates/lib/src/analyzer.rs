use ahash::AHashMap;
use itertools::Itertools;
use pbscan_lib_core::descriptor::ParsedDataWindow;
use pbscan_lib_core::ir::{
    AnalysisIr, DataWindowRecord, EventRecord, FunctionRecord, ObjectId, ObjectKind, ObjectRecord,
    RelationKind, RelationRecord, SqlId, SqlStatementRecord, SqlTableRecord,
};
use pbscan_lib_core::parser::{CallSiteKind, ParsedFile};
use pbscan_lib_core::sql;

use crate::config::ScanConfig;

/// A parsed script source plus its manifest metadata.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub parsed: ParsedFile,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

/// A parsed data-grid descriptor plus its manifest metadata.
#[derive(Debug, Clone)]
pub struct DescriptorUnit {
    pub parsed: ParsedDataWindow,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

/// An object that carries no parseable content (libraries, loose SQL
/// files) but still belongs in the inventory.
#[derive(Debug, Clone)]
pub struct ObjectStub {
    pub kind: ObjectKind,
    pub name: String,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    pub files: Vec<ParsedUnit>,
    pub descriptors: Vec<DescriptorUnit>,
    pub stubs: Vec<ObjectStub>,
}

/// A non-fatal analysis note: an unresolved callee. Logged and counted,
/// never a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub object: String,
    pub callee: String,
    pub kind: CallSiteKind,
    pub line: usize,
}

/// A source object dropped because another file already claimed its
/// `(kind, name)` key. Reported as a file-level failure by the runner so
/// the uniqueness invariant holds at persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateObject {
    pub kind: ObjectKind,
    pub name: String,
    pub source_path: Option<String>,
}

#[derive(Debug, Default)]
pub struct AnalysisOutput {
    pub ir: AnalysisIr,
    pub unresolved: Vec<Unresolved>,
    pub duplicates: Vec<DuplicateObject>,
}

/// Walks all parsed sources of a run and derives the IR: objects, events,
/// functions, SQL statements with their table references, and typed
/// relations. Callee resolution is name-based through a single set of
/// directories built from the whole run; ambiguity splits the confidence
/// across candidates.
pub struct Analyzer<'a> {
    config: &'a ScanConfig,
}

struct Builder {
    ir: AnalysisIr,
    object_index: AHashMap<(ObjectKind, String), ObjectId>,
    relations: AHashMap<(ObjectId, ObjectId, RelationKind), f64>,
    unresolved: Vec<Unresolved>,
    duplicates: Vec<DuplicateObject>,
}

impl Builder {
    fn intern_object(
        &mut self,
        kind: ObjectKind,
        name: &str,
        module: Option<&str>,
        source_path: Option<&str>,
    ) -> Option<ObjectId> {
        if self.object_index.contains_key(&(kind, name.to_owned())) {
            return None;
        }
        let id = ObjectId(self.ir.objects.len() as u32);
        self.ir.objects.push(ObjectRecord {
            id,
            kind,
            name: name.to_owned(),
            module: module.map(str::to_owned),
            source_path: source_path.map(str::to_owned),
        });
        self.object_index.insert((kind, name.to_owned()), id);
        Some(id)
    }

    /// Table objects are shared across the run and materialize on first
    /// reference.
    fn table_object(&mut self, name: &str) -> ObjectId {
        if let Some(&id) = self.object_index.get(&(ObjectKind::Table, name.to_owned())) {
            return id;
        }
        self.intern_object(ObjectKind::Table, name, None, None)
            .expect("table object cannot already exist")
    }

    fn relate(&mut self, src: ObjectId, dst: ObjectId, kind: RelationKind, confidence: f64) {
        let slot = self.relations.entry((src, dst, kind)).or_insert(0.0);
        if confidence > *slot {
            *slot = confidence;
        }
    }

    fn statement(
        &mut self,
        owner: ObjectId,
        kind: pbscan_lib_core::ir::SqlKind,
        text_norm: String,
    ) -> SqlId {
        let id = SqlId(self.ir.sql_statements.len() as u32);
        self.ir.sql_statements.push(SqlStatementRecord {
            id,
            owner,
            kind,
            text_norm,
        });
        id
    }
}

impl<'a> Analyzer<'a> {
    pub fn new(config: &'a ScanConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, input: &AnalysisInput) -> AnalysisOutput {
        let mut b = Builder {
            ir: AnalysisIr::default(),
            object_index: AHashMap::new(),
            relations: AHashMap::new(),
            unresolved: Vec::new(),
            duplicates: Vec::new(),
        };

        // Object inventory first; every later phase resolves against it.
        let mut file_objects: Vec<Option<ObjectId>> = Vec::with_capacity(input.files.len());
        for unit in &input.files {
            let id = b.intern_object(
                unit.parsed.object_kind,
                &unit.parsed.object_name,
                unit.module.as_deref(),
                unit.source_path.as_deref(),
            );
            if id.is_none() {
                b.duplicates.push(DuplicateObject {
                    kind: unit.parsed.object_kind,
                    name: unit.parsed.object_name.clone(),
                    source_path: unit.source_path.clone(),
                });
            }
            file_objects.push(id);
        }

        let mut descriptor_objects: Vec<Option<ObjectId>> =
            Vec::with_capacity(input.descriptors.len());
        for unit in &input.descriptors {
            let id = b.intern_object(
                ObjectKind::DataWindow,
                &unit.parsed.object_name,
                unit.module.as_deref(),
                unit.source_path.as_deref(),
            );
            if id.is_none() {
                b.duplicates.push(DuplicateObject {
                    kind: ObjectKind::DataWindow,
                    name: unit.parsed.object_name.clone(),
                    source_path: unit.source_path.clone(),
                });
            }
            descriptor_objects.push(id);
        }

        for stub in &input.stubs {
            if b.intern_object(
                stub.kind,
                &stub.name,
                stub.module.as_deref(),
                stub.source_path.as_deref(),
            )
            .is_none()
            {
                b.duplicates.push(DuplicateObject {
                    kind: stub.kind,
                    name: stub.name.clone(),
                    source_path: stub.source_path.clone(),
                });
            }
        }

        // Declared events and functions, and the name directories callee
        // resolution runs against.
        let mut functions_by_name: AHashMap<&str, Vec<ObjectId>> = AHashMap::new();
        let mut events_by_name: AHashMap<&str, Vec<ObjectId>> = AHashMap::new();

        for (unit, &object) in input.files.iter().zip(&file_objects) {
            let Some(object) = object else { continue };
            for event in &unit.parsed.events {
                b.ir.events.push(EventRecord {
                    object,
                    name: event.name.clone(),
                    script_ref: unit
                        .source_path
                        .as_deref()
                        .map(|p| format!("{p}:{}", event.line)),
                });
                let owners = events_by_name.entry(event.name.as_str()).or_default();
                if !owners.contains(&object) {
                    owners.push(object);
                }
            }
            for function in &unit.parsed.functions {
                b.ir.functions.push(FunctionRecord {
                    object,
                    name: function.name.clone(),
                    signature: function.signature.clone(),
                });
                let owners = functions_by_name.entry(function.name.as_str()).or_default();
                if !owners.contains(&object) {
                    owners.push(object);
                }
            }
        }

        let conf = &self.config.confidences;

        // Call sites become relations. A function-call site is only a
        // candidate: with no declaration anywhere in the run it is
        // dropped without noise, since most such sites are calls into
        // the runtime library.
        for (unit, &object) in input.files.iter().zip(&file_objects) {
            let Some(src) = object else { continue };
            for site in &unit.parsed.call_sites {
                match site.kind {
                    CallSiteKind::FunctionCall => {
                        if let Some(owners) = functions_by_name.get(site.callee.as_str()) {
                            let split = conf.calls / owners.len() as f64;
                            for &dst in owners {
                                b.relate(src, dst, RelationKind::Calls, split);
                            }
                        }
                    }
                    CallSiteKind::ScreenOpen => {
                        let dst = b
                            .object_index
                            .get(&(ObjectKind::Screen, site.callee.clone()))
                            .copied();
                        match dst {
                            Some(dst) => b.relate(src, dst, RelationKind::Opens, conf.opens),
                            None => b.unresolved.push(Unresolved {
                                object: unit.parsed.object_name.clone(),
                                callee: site.callee.clone(),
                                kind: site.kind,
                                line: site.line,
                            }),
                        }
                    }
                    CallSiteKind::EventTrigger => {
                        match events_by_name.get(site.callee.as_str()) {
                            Some(owners) => {
                                let split = conf.triggers_event / owners.len() as f64;
                                for &dst in owners {
                                    b.relate(src, dst, RelationKind::TriggersEvent, split);
                                }
                            }
                            None => b.unresolved.push(Unresolved {
                                object: unit.parsed.object_name.clone(),
                                callee: site.callee.clone(),
                                kind: site.kind,
                                line: site.line,
                            }),
                        }
                    }
                    CallSiteKind::DataWindowUse => {
                        let dst = b
                            .object_index
                            .get(&(ObjectKind::DataWindow, site.callee.clone()))
                            .copied();
                        match dst {
                            Some(dst) => b.relate(src, dst, RelationKind::UsesDw, conf.uses_dw),
                            None => b.unresolved.push(Unresolved {
                                object: unit.parsed.object_name.clone(),
                                callee: site.callee.clone(),
                                kind: site.kind,
                                line: site.line,
                            }),
                        }
                    }
                }
            }
        }

        // Embedded SQL. The statement owner is the enclosing object, not
        // the event or function: the object is the unit of relational
        // reasoning.
        for (unit, &object) in input.files.iter().zip(&file_objects) {
            let Some(owner) = object else { continue };
            for embedded in &unit.parsed.sql {
                self.emit_sql(&mut b, owner, &embedded.text);
            }
        }

        // Descriptors: the retrieve SQL runs through the same pipeline
        // with the grid object as owner; the update base table adds a
        // write edge of its own.
        for (unit, &object) in input.descriptors.iter().zip(&descriptor_objects) {
            let Some(owner) = object else { continue };
            if let Some(select) = &unit.parsed.sql_select {
                self.emit_sql(&mut b, owner, select);
            }
            if let Some(base) = &unit.parsed.base_table {
                if !self.config.table_exceptions.contains(base) {
                    let table = b.table_object(base);
                    b.relate(owner, table, RelationKind::WritesTable, conf.table_io);
                }
            }
            b.ir.datawindows.push(DataWindowRecord {
                object: owner,
                dw_name: unit.parsed.dw_name.clone(),
                base_table: unit.parsed.base_table.clone(),
                sql_select: unit.parsed.sql_select.clone(),
            });
        }

        for unresolved in &b.unresolved {
            log::debug!(
                "unresolved {} callee '{}' in {} (line {})",
                unresolved.kind,
                unresolved.callee,
                unresolved.object,
                unresolved.line
            );
        }

        // Deduplicated relations in a deterministic order: identical
        // (src, dst, kind) keys keep the maximum observed confidence.
        b.ir.relations = b
            .relations
            .iter()
            .map(|(&(src, dst, kind), &confidence)| RelationRecord {
                src,
                dst,
                kind,
                confidence,
            })
            .sorted_by_key(|r| (r.src, r.dst, r.kind))
            .collect();

        AnalysisOutput {
            ir: b.ir,
            unresolved: b.unresolved,
            duplicates: b.duplicates,
        }
    }

    fn emit_sql(&self, b: &mut Builder, owner: ObjectId, raw: &str) {
        let norm = sql::normalize(raw);
        if norm.is_empty() {
            return;
        }
        let kind = sql::infer_kind(&norm);
        let refs = sql::extract_tables(&norm, kind, &self.config.table_exceptions);
        let id = b.statement(owner, kind, norm);

        for (table_name, rw) in refs {
            b.ir.sql_tables.push(SqlTableRecord {
                sql: id,
                table_name: table_name.clone(),
                rw,
            });
            let table = b.table_object(&table_name);
            let relation = match rw {
                pbscan_lib_core::ir::RwType::Read => RelationKind::ReadsTable,
                pbscan_lib_core::ir::RwType::Write => RelationKind::WritesTable,
            };
            b.relate(owner, table, relation, self.config.confidences.table_io);
        }
    }
}
