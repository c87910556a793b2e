// Execution Records
// Per-step checkpoints mapping scope value to last outcome code, persisted as YAML

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default directory holding one record per step
pub const DEFAULT_STATE_DIR: &str = ".pesto";

/// Errors that can occur reading or writing records
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt record {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unable to serialize record: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Last outcome of every scope value of one step (0 = success)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionRecord {
    outcomes: BTreeMap<String, i32>,
}

impl ExecutionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, value: &str) -> Option<i32> {
        self.outcomes.get(value).copied()
    }

    /// Whether `value` last ended in success
    pub fn succeeded(&self, value: &str) -> bool {
        self.get(value) == Some(0)
    }

    pub fn set(&mut self, value: impl Into<String>, code: i32) {
        self.outcomes.insert(value.into(), code);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, i32)> for ExecutionRecord {
    fn from_iter<I: IntoIterator<Item = (K, i32)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Reads and writes records under a state directory
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record of `node`.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, so distinct
    /// names never share a file.
    pub fn path_for(&self, node: &str) -> PathBuf {
        let mut file_name = String::with_capacity(node.len());
        for byte in node.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("%{:02X}", byte));
            }
        }
        self.dir.join(format!("{}.yaml", file_name))
    }

    /// Load the record of `node`; a missing file is an empty record
    pub fn load(&self, node: &str) -> Result<ExecutionRecord, RecordError> {
        let path = self.path_for(node);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ExecutionRecord::new()),
            Err(source) => return Err(RecordError::Io { path, source }),
        };

        if content.trim().is_empty() {
            return Ok(ExecutionRecord::new());
        }

        serde_yaml::from_str(&content).map_err(|source| RecordError::Corrupt { path, source })
    }

    /// Persist the whole record; the previous file stays intact if the write fails
    pub fn save(&self, node: &str, record: &ExecutionRecord) -> Result<(), RecordError> {
        fs::create_dir_all(&self.dir).map_err(|source| RecordError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(node);
        let tmp = path.with_extension("yaml.tmp");
        let content = serde_yaml::to_string(record)?;

        fs::write(&tmp, content).map_err(|source| RecordError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| RecordError::Io { path, source })
    }

    /// Delete the state directory; returns whether it existed
    pub fn clean(&self) -> Result<bool, RecordError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(RecordError::Io {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}
