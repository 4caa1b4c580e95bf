use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use pbscan_lib_core::descriptor;
use pbscan_lib_core::encoding::decode_source;
use pbscan_lib_core::ir::{ObjectKind, RunStatus};
use pbscan_lib_core::parser::Parser;
use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::analyzer::{AnalysisInput, Analyzer, DescriptorUnit, ObjectStub, ParsedUnit};
use crate::config::ScanConfig;
use crate::extract::{ExtractError, Extractor, ManifestEntry};
use crate::store::{RunRecord, Store, StoreError};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Parse,
    Analyze,
    Persist,
}

/// One aggregated failure. The orchestrator reports all of them even when
/// the run ends `ok`-adjacent; an empty list is what `ok` means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub stage: Stage,
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub run_id: String,
    pub status: RunStatus,
    pub objects_n: usize,
    pub events_n: usize,
    pub functions_n: usize,
    pub relations_n: usize,
    pub sql_n: usize,
    pub dw_n: usize,
    pub failures: Vec<Failure>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Ok => 0,
            RunStatus::Partial => 2,
            RunStatus::Running | RunStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub source_version: Option<String>,
}

/// Cooperative cancellation, observed at file boundaries in the parse
/// pool and again between analysis and persistence. A cancelled run
/// finalizes `failed` with nothing persisted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error("could not build parser pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl RunError {
    /// The stage to name in the single fatal-error line.
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Extract(_) => Stage::Extract,
            RunError::Store(_) => Stage::Persist,
            RunError::Pool(_) => Stage::Parse,
        }
    }
}

enum FileOutcome {
    /// A usable parse, possibly with a failure entry when errors had to
    /// be recovered along the way.
    File(ParsedUnit, Option<Failure>),
    Descriptor(DescriptorUnit),
    Failed(Failure),
    Cancelled,
}

/// The run orchestrator. Owns the fail-soft policy: extraction and parse
/// failures degrade the outcome, only persistence errors and cancellation
/// fail a run outright.
pub struct Runner {
    config: ScanConfig,
}

impl Runner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn run(
        &self,
        extractor: &dyn Extractor,
        input: &Path,
        out_dir: &Path,
        store: &mut Store,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<Outcome, RunError> {
        let clock = Instant::now();
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        store.begin_run(&RunRecord {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            source_version: options.source_version.clone(),
        })?;

        let manifest = match extractor.extract(input, out_dir) {
            Ok(manifest) => manifest,
            Err(err) => {
                store.finalize_run(&run_id, RunStatus::Failed, Utc::now())?;
                return Err(err.into());
            }
        };
        log::info!(
            "run {run_id}: manifest with {} objects, {} extraction failures",
            manifest.entries.len(),
            manifest.failures.len()
        );

        let mut failures: Vec<Failure> = manifest
            .failures
            .iter()
            .map(|f| Failure {
                stage: Stage::Extract,
                path: Some(f.path.clone()),
                message: f.reason.clone(),
            })
            .collect();

        // Containers and loose SQL carry no parseable script; they enter
        // the inventory as-is.
        let (stub_entries, parse_entries): (Vec<_>, Vec<_>) = manifest
            .entries
            .iter()
            .partition(|e| matches!(e.kind, ObjectKind::Library | ObjectKind::Sql | ObjectKind::Table));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.effective_threads())
            .build()?;
        let outcomes: Vec<FileOutcome> = pool.install(|| {
            parse_entries
                .par_iter()
                .map(|entry| self.parse_entry(entry, cancel))
                .collect()
        });

        if cancel.is_cancelled() {
            store.finalize_run(&run_id, RunStatus::Failed, Utc::now())?;
            return Ok(self.outcome(run_id, RunStatus::Failed, None, failures, clock));
        }

        let mut analysis_input = AnalysisInput::default();
        let mut parsed_any = false;
        for outcome in outcomes {
            match outcome {
                FileOutcome::File(unit, failure) => {
                    parsed_any = true;
                    analysis_input.files.push(unit);
                    failures.extend(failure);
                }
                FileOutcome::Descriptor(unit) => {
                    parsed_any = true;
                    analysis_input.descriptors.push(unit);
                }
                FileOutcome::Failed(failure) => failures.push(failure),
                FileOutcome::Cancelled => {}
            }
        }
        for entry in stub_entries {
            analysis_input.stubs.push(ObjectStub {
                kind: entry.kind,
                name: entry.name.clone(),
                module: entry.module.clone(),
                source_path: Some(entry.source_path.display().to_string()),
            });
        }

        // Every file failing is fatal; an empty manifest is a legitimate
        // (if unhelpful) run that closes `ok` with zero records.
        if !parse_entries.is_empty() && !parsed_any {
            store.finalize_run(&run_id, RunStatus::Failed, Utc::now())?;
            return Ok(self.outcome(run_id, RunStatus::Failed, None, failures, clock));
        }

        let analysis = Analyzer::new(&self.config).analyze(&analysis_input);
        for duplicate in &analysis.duplicates {
            failures.push(Failure {
                stage: Stage::Analyze,
                path: duplicate.source_path.clone(),
                message: format!(
                    "duplicate object ({}, {}) skipped",
                    duplicate.kind, duplicate.name
                ),
            });
        }
        if !analysis.unresolved.is_empty() {
            log::info!(
                "run {run_id}: {} unresolved callees",
                analysis.unresolved.len()
            );
        }

        if cancel.is_cancelled() {
            store.finalize_run(&run_id, RunStatus::Failed, Utc::now())?;
            return Ok(self.outcome(run_id, RunStatus::Failed, None, failures, clock));
        }

        if let Err(err) = store.persist(&run_id, &analysis.ir) {
            store.finalize_run(&run_id, RunStatus::Failed, Utc::now())?;
            return Err(err.into());
        }

        let status = if failures.is_empty() {
            RunStatus::Ok
        } else if analysis.ir.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };
        store.finalize_run(&run_id, status, Utc::now())?;

        Ok(self.outcome(run_id, status, Some(&analysis.ir), failures, clock))
    }

    fn outcome(
        &self,
        run_id: String,
        status: RunStatus,
        ir: Option<&pbscan_lib_core::ir::AnalysisIr>,
        failures: Vec<Failure>,
        clock: Instant,
    ) -> Outcome {
        Outcome {
            run_id,
            status,
            objects_n: ir.map_or(0, |ir| ir.objects.len()),
            events_n: ir.map_or(0, |ir| ir.events.len()),
            functions_n: ir.map_or(0, |ir| ir.functions.len()),
            relations_n: ir.map_or(0, |ir| ir.relations.len()),
            sql_n: ir.map_or(0, |ir| ir.sql_statements.len()),
            dw_n: ir.map_or(0, |ir| ir.datawindows.len()),
            failures,
            elapsed: clock.elapsed(),
        }
    }

    fn parse_entry(&self, entry: &ManifestEntry, cancel: &CancellationToken) -> FileOutcome {
        if cancel.is_cancelled() {
            return FileOutcome::Cancelled;
        }

        let path_text = entry.source_path.display().to_string();
        let bytes = match std::fs::read(&entry.source_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return FileOutcome::Failed(Failure {
                    stage: Stage::Parse,
                    path: Some(path_text),
                    message: format!("cannot read source: {err}"),
                });
            }
        };
        let (text, encoding) = decode_source(&bytes);
        log::debug!("{path_text}: decoded as {encoding}");

        if entry.kind == ObjectKind::DataWindow || descriptor::is_descriptor(&text) {
            return FileOutcome::Descriptor(DescriptorUnit {
                parsed: descriptor::parse_descriptor(&text, &entry.name),
                module: entry.module.clone(),
                source_path: Some(path_text),
            });
        }

        let parsed = Parser::new(self.config.max_errors_per_file).parse(&text, entry.kind, &entry.name);
        if parsed.abandoned {
            return FileOutcome::Failed(Failure {
                stage: Stage::Parse,
                path: Some(path_text),
                message: format!("abandoned after {} parse errors", parsed.issues.len()),
            });
        }
        let failure = (!parsed.issues.is_empty()).then(|| {
            for issue in &parsed.issues {
                log::debug!("{path_text}:{issue}");
            }
            Failure {
                stage: Stage::Parse,
                path: Some(path_text.clone()),
                message: format!("{} parse errors recovered", parsed.issues.len()),
            }
        });

        FileOutcome::File(
            ParsedUnit {
                parsed,
                module: entry.module.clone(),
                source_path: Some(path_text),
            },
            failure,
        )
    }
}
