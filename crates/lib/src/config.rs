use std::path::{Path, PathBuf};

use ahash::AHashSet;
use configparser::ini::Ini;

/// Default confidences per relation source, overridable from the
/// `[pbscan:confidence]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct Confidences {
    pub calls: f64,
    pub opens: f64,
    pub triggers_event: f64,
    pub uses_dw: f64,
    /// reads_table/writes_table edges derived from SQL references and
    /// descriptor base tables.
    pub table_io: f64,
}

impl Default for Confidences {
    fn default() -> Self {
        Self {
            calls: 0.85,
            opens: 0.95,
            triggers_event: 0.70,
            uses_dw: 0.90,
            table_io: 0.90,
        }
    }
}

/// Engine configuration, injected as a value at orchestrator
/// construction. Layered: built-in defaults, then a `.pbscan` INI file,
/// then caller overrides. No process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub max_errors_per_file: usize,
    /// Parser pool width; 0 means the number of available CPUs.
    pub threads: usize,
    /// Default row limit for the query surface.
    pub row_limit: usize,
    /// Table names (lower-case) never emitted as references, e.g. `dual`.
    pub table_exceptions: AHashSet<String>,
    pub confidences: Confidences,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_errors_per_file: 100,
            threads: 0,
            row_limit: 200,
            table_exceptions: ["dual".to_owned()].into_iter().collect(),
            confidences: Confidences::default(),
        }
    }
}

pub const CONFIG_FILE_NAME: &str = ".pbscan";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("invalid value for {section}.{key}: {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

impl ScanConfig {
    /// Load from an explicit INI file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        let map = ini
            .load(path)
            .map_err(|message| ConfigError::Unreadable {
                path: path.to_owned(),
                message,
            })?;

        let mut config = Self::default();
        for (section, values) in &map {
            for (key, value) in values {
                let Some(value) = value else { continue };
                config.apply(section, key, value)?;
            }
        }
        Ok(config)
    }

    /// Search `dir` and its ancestors for a `.pbscan` file; fall back to
    /// the defaults when none exists.
    pub fn from_root(dir: &Path) -> Result<Self, ConfigError> {
        for ancestor in dir.ancestors() {
            let candidate = ancestor.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn apply(&mut self, section: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            section: section.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
        };

        match (section, key) {
            ("pbscan", "max_errors_per_file") => {
                self.max_errors_per_file = value.parse().map_err(|_| invalid())?;
            }
            ("pbscan", "threads") => {
                self.threads = value.parse().map_err(|_| invalid())?;
            }
            ("pbscan", "row_limit") => {
                self.row_limit = value.parse().map_err(|_| invalid())?;
            }
            ("pbscan:tables", "exclude") => {
                self.table_exceptions = value
                    .split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            ("pbscan:confidence", key) => {
                let parsed: f64 = value.parse().map_err(|_| invalid())?;
                if !(0.0..=1.0).contains(&parsed) {
                    return Err(invalid());
                }
                match key {
                    "calls" => self.confidences.calls = parsed,
                    "opens" => self.confidences.opens = parsed,
                    "triggers_event" => self.confidences.triggers_event = parsed,
                    "uses_dw" => self.confidences.uses_dw = parsed,
                    "table_io" => self.confidences.table_io = parsed,
                    _ => return Err(invalid()),
                }
            }
            // Unknown sections and keys are tolerated so configs can be
            // shared across tool versions.
            _ => {}
        }
        Ok(())
    }

    pub fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }
}
