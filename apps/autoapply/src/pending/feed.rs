use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::pending::{write_atomic, PendingError};

/// Where candidate answers come from while a session waits.
#[async_trait]
pub trait AnswerFeed: Send + Sync {
    /// Everything currently supplied, keyed by field id.
    async fn fetch(&self) -> Result<BTreeMap<String, Value>, PendingError>;

    /// Clears answers that could not be used so the wait does not end on them.
    async fn reject(&self, field_ids: &[String]) -> Result<(), PendingError>;
}

/// The `answers.json` template, edited in place by a person or through the
/// HTTP API.
#[derive(Debug, Clone)]
pub struct FileAnswerFeed {
    path: PathBuf,
}

impl FileAnswerFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AnswerFeed for FileAnswerFeed {
    async fn fetch(&self) -> Result<BTreeMap<String, Value>, PendingError> {
        Ok(read_answers(&self.path)?.unwrap_or_default())
    }

    async fn reject(&self, field_ids: &[String]) -> Result<(), PendingError> {
        let Some(mut answers) = read_answers(&self.path)? else {
            return Ok(());
        };
        for id in field_ids {
            answers.insert(id.clone(), Value::Null);
        }
        write_answers(&self.path, &answers)
    }
}

/// The answers file as a map. `None` when it is missing or not a JSON
/// object; a half-edited file is never an error.
pub fn read_answers(path: &Path) -> Result<Option<BTreeMap<String, Value>>, PendingError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PendingError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    match serde_json::from_str::<Map<String, Value>>(&raw) {
        Ok(map) => Ok(Some(map.into_iter().collect())),
        Err(e) => {
            warn!("Ignoring unreadable answers file {}: {e}", path.display());
            Ok(None)
        }
    }
}

pub fn write_answers(path: &Path, answers: &BTreeMap<String, Value>) -> Result<(), PendingError> {
    let body = serde_json::to_vec_pretty(answers).map_err(|source| PendingError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &body)
}

/// Merges supplied answers into the answers file, creating it if needed.
/// A file that is not a JSON object is refused rather than replaced.
pub fn merge_into_file(path: &Path, supplied: &BTreeMap<String, Value>) -> Result<usize, PendingError> {
    let mut answers = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| PendingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str::<Map<String, Value>>(&raw)
            .map_err(|source| PendingError::Json {
                path: path.to_path_buf(),
                source,
            })?
            .into_iter()
            .collect()
    } else {
        BTreeMap::new()
    };
    for (id, value) in supplied {
        answers.insert(id.clone(), value.clone());
    }
    write_answers(path, &answers)?;
    Ok(supplied.len())
}
