use std::path::{Path, PathBuf};
use std::process::Command;

use pbscan_lib_core::ir::ObjectKind;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// One extracted source object, ready for parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: ObjectKind,
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractFailure {
    pub path: String,
    pub reason: String,
}

/// What an extractor hands to the engine: the object inventory plus any
/// per-object failures. Failures degrade the run to `partial` but never
/// abort it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub source_version: Option<String>,
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub failures: Vec<ExtractFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("input path {0} does not exist or is not readable")]
    MissingInput(PathBuf),
    #[error("binary extraction needs an extractor command template")]
    MissingCommand,
    #[error("extractor command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("manifest {path}: {source}")]
    BadManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Extractor {
    fn extract(&self, input: &Path, out_dir: &Path) -> Result<Manifest, ExtractError>;
}

/// Map a file extension to the object kind it declares. Descriptor files
/// keep their own kind so the orchestrator can route them to the
/// descriptor parser.
pub fn kind_for_extension(ext: &str) -> Option<ObjectKind> {
    match ext.to_ascii_lowercase().as_str() {
        "srw" => Some(ObjectKind::Screen),
        "sru" => Some(ObjectKind::UserObject),
        "srm" => Some(ObjectKind::Menu),
        "srd" => Some(ObjectKind::DataWindow),
        "srf" => Some(ObjectKind::Function),
        "srs" => Some(ObjectKind::Script),
        "sql" => Some(ObjectKind::Sql),
        "pbl" => Some(ObjectKind::Library),
        _ => None,
    }
}

/// Walks a directory of already-exported sources. Objects are named by
/// their file stem; the module is the path of the containing directory
/// relative to the input root.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, input: &Path, _out_dir: &Path) -> Result<Manifest, ExtractError> {
        if !input.exists() {
            return Err(ExtractError::MissingInput(input.to_owned()));
        }

        let mut manifest = Manifest::default();
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    manifest.failures.push(ExtractFailure {
                        path: err
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(kind) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(kind_for_extension)
            else {
                continue;
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                manifest.failures.push(ExtractFailure {
                    path: path.display().to_string(),
                    reason: "file name is not valid unicode".into(),
                });
                continue;
            };

            let module = path
                .parent()
                .and_then(|p| p.strip_prefix(input).ok())
                .map(|p| p.display().to_string())
                .filter(|m| !m.is_empty());

            manifest.entries.push(ManifestEntry {
                kind,
                name: stem.to_lowercase(),
                module,
                source_path: path.to_owned(),
            });
        }

        Ok(manifest)
    }
}

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Runs an external exporter over a binary library, then inventories its
/// output directory. The command template substitutes `{input}` and
/// `{output}` per whitespace-separated argument; if the exporter wrote a
/// `manifest.json` it is trusted, otherwise the output tree is walked
/// like a text corpus.
#[derive(Debug)]
pub struct CommandExtractor {
    template: String,
}

impl CommandExtractor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, input: &Path, out_dir: &Path) -> Result<Manifest, ExtractError> {
        if !input.exists() {
            return Err(ExtractError::MissingInput(input.to_owned()));
        }
        std::fs::create_dir_all(out_dir)?;

        let mut parts = self.template.split_whitespace().map(|part| {
            part.replace("{input}", &input.display().to_string())
                .replace("{output}", &out_dir.display().to_string())
        });
        let Some(program) = parts.next() else {
            return Err(ExtractError::MissingCommand);
        };

        let output = Command::new(&program).args(parts).output()?;
        if !output.status.success() {
            return Err(ExtractError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let manifest_path = out_dir.join(MANIFEST_FILE_NAME);
        if manifest_path.is_file() {
            let raw = std::fs::read_to_string(&manifest_path)?;
            let manifest = serde_json::from_str(&raw).map_err(|source| ExtractError::BadManifest {
                path: manifest_path,
                source,
            })?;
            return Ok(manifest);
        }

        TextExtractor.extract(out_dir, out_dir)
    }
}

/// The CLI-facing selector. `Auto` picks the text extractor for
/// directories and the command extractor for binary library files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExtractorKind {
    Auto,
    Text,
    Binary,
}

pub fn select_extractor(
    kind: ExtractorKind,
    input: &Path,
    command_template: Option<&str>,
) -> Result<Box<dyn Extractor>, ExtractError> {
    let binary = match kind {
        ExtractorKind::Text => false,
        ExtractorKind::Binary => true,
        ExtractorKind::Auto => {
            input
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pbl"))
        }
    };

    if binary {
        let template = command_template.ok_or(ExtractError::MissingCommand)?;
        Ok(Box::new(CommandExtractor::new(template)))
    } else {
        Ok(Box::new(TextExtractor))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn text_extractor_inventories_sources() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("sales");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("W_Main.srw"), "global type w_main from window\nend type\n")
            .unwrap();
        std::fs::write(module.join("dw_list.srd"), "release 12;\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifest = TextExtractor.extract(dir.path(), dir.path()).unwrap();
        let mut entries: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| (e.kind, e.name.as_str(), e.module.as_deref()))
            .collect();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                (ObjectKind::Screen, "w_main", Some("sales")),
                (ObjectKind::DataWindow, "dw_list", Some("sales")),
            ]
        );
        assert!(manifest.failures.is_empty());
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = TextExtractor
            .extract(Path::new("/no/such/corpus"), Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingInput(_)));
    }

    #[test]
    fn manifest_round_trips_as_json() {
        let manifest = Manifest {
            source_version: Some("r42".into()),
            entries: vec![ManifestEntry {
                kind: ObjectKind::Screen,
                name: "w_main".into(),
                module: None,
                source_path: "w_main.srw".into(),
            }],
            failures: vec![],
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert_eq!(serde_json::from_str::<Manifest>(&json).unwrap(), manifest);
    }

    #[test]
    fn binary_selector_requires_template() {
        let err = select_extractor(ExtractorKind::Binary, Path::new("lib.pbl"), None).err().unwrap();
        assert!(matches!(err, ExtractError::MissingCommand));
    }
}
