//! Operation batches: the typed form the engine runs and the loose JSON form
//! callers hand in.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::fs_ops::is_internal_artifact;
use crate::links::to_slash;

/// One requested mutation. Paths are relative to the managed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    Write { target: PathBuf, content: Vec<u8> },
    Move { source: PathBuf, target: PathBuf },
    Delete { source: PathBuf },
}

impl FileOperation {
    pub fn write(target: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        FileOperation::Write {
            target: target.into(),
            content: content.into(),
        }
    }

    pub fn move_file(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        FileOperation::Move {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn delete(source: impl Into<PathBuf>) -> Self {
        FileOperation::Delete {
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileOperation::Write { .. } => "write",
            FileOperation::Move { .. } => "move",
            FileOperation::Delete { .. } => "delete",
        }
    }

    pub fn source(&self) -> Option<&Path> {
        match self {
            FileOperation::Move { source, .. } | FileOperation::Delete { source } => Some(source),
            FileOperation::Write { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&Path> {
        match self {
            FileOperation::Move { target, .. } | FileOperation::Write { target, .. } => Some(target),
            FileOperation::Delete { .. } => None,
        }
    }

    /// Every root-relative path this operation reads or replaces.
    pub fn touched_paths(&self) -> impl Iterator<Item = &Path> {
        self.source().into_iter().chain(self.target())
    }

    pub fn describe(&self) -> String {
        match self {
            FileOperation::Write { target, content } => {
                format!("write {} ({} bytes)", to_slash(target), content.len())
            }
            FileOperation::Move { source, target } => {
                format!("move {} -> {}", to_slash(source), to_slash(target))
            }
            FileOperation::Delete { source } => format!("delete {}", to_slash(source)),
        }
    }
}

/// Wire form of an operation. Anything can be missing; [`FileOperation::try_from`]
/// decides whether the combination makes sense.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TryFrom<OperationSpec> for FileOperation {
    type Error = Error;

    fn try_from(spec: OperationSpec) -> Result<Self> {
        let kind = spec
            .kind
            .as_deref()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| Error::Validation("operation is missing 'kind'".into()))?;
        let need = |field: Option<String>, name: &str| {
            field
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| Error::Validation(format!("{kind} operation requires '{name}'")))
        };
        match kind.as_str() {
            "write" => {
                if spec.source.is_some() {
                    return Err(Error::Validation("write operation takes no 'source'".into()));
                }
                Ok(FileOperation::Write {
                    target: need(spec.target, "target")?,
                    content: spec.content.unwrap_or_default().into_bytes(),
                })
            }
            "move" => {
                if spec.content.is_some() {
                    return Err(Error::Validation("move operation takes no 'content'".into()));
                }
                Ok(FileOperation::Move {
                    source: need(spec.source, "source")?,
                    target: need(spec.target, "target")?,
                })
            }
            "delete" => {
                if spec.target.is_some() || spec.content.is_some() {
                    return Err(Error::Validation(
                        "delete operation takes only 'source'".into(),
                    ));
                }
                Ok(FileOperation::Delete {
                    source: need(spec.source, "source")?,
                })
            }
            other => Err(Error::Validation(format!("unknown operation kind '{other}'"))),
        }
    }
}

impl From<&FileOperation> for OperationSpec {
    fn from(op: &FileOperation) -> Self {
        let slash = |p: &Path| Some(to_slash(p));
        match op {
            FileOperation::Write { target, content } => OperationSpec {
                kind: Some("write".into()),
                target: slash(target),
                content: Some(String::from_utf8_lossy(content).into_owned()),
                ..Default::default()
            },
            FileOperation::Move { source, target } => OperationSpec {
                kind: Some("move".into()),
                source: slash(source),
                target: slash(target),
                ..Default::default()
            },
            FileOperation::Delete { source } => OperationSpec {
                kind: Some("delete".into()),
                source: slash(source),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchFile {
    operations: Vec<OperationSpec>,
}

/// Ordered list of operations, consumed by one `apply` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationBatch {
    operations: Vec<FileOperation>,
}

impl OperationBatch {
    pub fn new(operations: Vec<FileOperation>) -> Self {
        Self { operations }
    }

    pub fn push(&mut self, op: FileOperation) {
        self.operations.push(op);
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// `{"operations": [{"kind": "move", "source": "...", "target": "..."}, ...]}`
    pub fn from_json(text: &str) -> Result<Self> {
        let file: BatchFile = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("batch file is not valid JSON: {e}")))?;
        let operations = file
            .operations
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                FileOperation::try_from(spec).map_err(|e| match e {
                    Error::Validation(msg) => Error::Validation(format!("operation #{}: {msg}", i + 1)),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { operations })
    }

    pub fn to_json(&self) -> Result<String> {
        let file = BatchFile {
            operations: self.operations.iter().map(OperationSpec::from).collect(),
        };
        serde_json::to_string_pretty(&file)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| Error::Validation(format!("cannot serialize batch: {e}")))
    }
}

impl From<Vec<FileOperation>> for OperationBatch {
    fn from(operations: Vec<FileOperation>) -> Self {
        Self::new(operations)
    }
}

impl IntoIterator for OperationBatch {
    type Item = FileOperation;
    type IntoIter = std::vec::IntoIter<FileOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

/// Reject paths that are empty, absolute, climb with `..`, or name an engine artifact.
pub(crate) fn check_relative(path: &Path) -> Result<()> {
    let shown = path.display();
    if path.as_os_str().is_empty() {
        return Err(Error::Validation("empty path".into()));
    }
    for comp in path.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Validation(format!(
                    "'{shown}' escapes the managed root"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Validation(format!(
                    "'{shown}' must be relative to the managed root"
                )));
            }
        }
    }
    if is_internal_artifact(path) {
        return Err(Error::Validation(format!(
            "'{shown}' is reserved for kb_migrate's own files"
        )));
    }
    Ok(())
}

/// Drop `.` components so `./a.md` and `a.md` compare equal.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
