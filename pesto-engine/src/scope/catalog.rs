// Scope Catalog
// Scans the root directory once and derives the distinct values of every declared scope

use crate::config::Configuration;
use crate::template::{EvaluationError, Evaluator};

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("bad regular expression r'{pattern}' for scope {scope}: {source}")]
    BadPattern {
        scope: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("error in __SCOPES__ definition for {scope}: {source}")]
    Evaluation {
        scope: String,
        #[source]
        source: EvaluationError,
    },

    #[error("unable to scan {}: {source}", .root.display())]
    Io {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A scope with its final pattern and the values found under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub name: String,
    /// Expression with every static placeholder resolved
    pub pattern: String,
    /// Distinct matches, regex-escaped and sorted
    pub values: Vec<String>,
}

/// Every file under the root and every resolved scope
#[derive(Debug, Clone)]
pub struct ScopeCatalog {
    files: Vec<String>,
    scopes: BTreeMap<String, Arc<ResolvedScope>>,
}

impl ScopeCatalog {
    /// Scan the configured root and resolve every declared scope
    pub fn build(config: &Configuration) -> Result<Self, ScopeError> {
        let files = scan(config.root()).map_err(|source| ScopeError::Io {
            root: config.root().to_path_buf(),
            source,
        })?;
        debug!(root = %config.root().display(), files = files.len(), "scanned root");
        Self::from_files(config, files)
    }

    /// Resolve every declared scope against an already collected file list
    pub fn from_files(config: &Configuration, mut files: Vec<String>) -> Result<Self, ScopeError> {
        files.sort();
        files.dedup();

        let evaluator = Evaluator::new(config);
        let mut scopes = BTreeMap::new();

        for definition in config.scopes() {
            let pattern = evaluator
                .resolve(&definition.expression, None)
                .map_err(|source| ScopeError::Evaluation {
                    scope: definition.name.clone(),
                    source,
                })?;

            // Grouped so an alternation cannot escape the lazy prefix
            let search = Regex::new(&format!(".*?(?:{})", pattern)).map_err(|source| {
                ScopeError::BadPattern {
                    scope: definition.name.clone(),
                    pattern: pattern.clone(),
                    source,
                }
            })?;

            let values: BTreeSet<String> = files
                .iter()
                .filter_map(|file| search.find(file))
                .map(|m| regex::escape(m.as_str()))
                .collect();

            debug!(scope = %definition.name, %pattern, values = values.len(), "resolved scope");
            scopes.insert(
                definition.name.clone(),
                Arc::new(ResolvedScope {
                    name: definition.name.clone(),
                    pattern,
                    values: values.into_iter().collect(),
                }),
            );
        }

        Ok(Self { files, scopes })
    }

    pub fn scope(&self, name: &str) -> Option<&Arc<ResolvedScope>> {
        self.scopes.get(name)
    }

    /// All resolved scopes, by name
    pub fn scopes(&self) -> impl Iterator<Item = &Arc<ResolvedScope>> {
        self.scopes.values()
    }

    /// Root-relative, `/`-separated paths of every file, sorted
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// Collect every file under `root`; symlinked directories are not descended
pub fn scan(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() || path.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(to_slash(relative));
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
