// Data-Structure Document
// The immutable key/value configuration every placeholder is resolved against

use crate::config::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::config::models::{scalar_to_string, value_kind, ScopeDefinition, ROOT_KEY, SCOPES_KEY};
use crate::template::Evaluator;

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// The first document of a pipeline: root directory, scopes and helper values
#[derive(Debug, Clone)]
pub struct Configuration {
    document: Mapping,
    root: PathBuf,
    scopes: Vec<ScopeDefinition>,
}

impl Configuration {
    /// Build the configuration from a parsed document.
    ///
    /// `__ROOT__` may reference other keys with `${...}`; a relative root is
    /// resolved against `base_dir` and must name an existing directory.
    pub fn from_value(value: Value, base_dir: &Path) -> ConfigResult<Self> {
        let document = match value {
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(ConfigError::new(format!(
                    "the data-structure document must be a mapping, found {}",
                    value_kind(&other)
                )))
            }
        };

        let raw_root = match document.get(ROOT_KEY) {
            Some(value) => scalar_to_string(value).ok_or_else(|| {
                ConfigError::new(format!("'{}' must be a string", ROOT_KEY))
                    .with_kind(ConfigErrorKind::InvalidValue)
            })?,
            None => return Err(ConfigError::missing_key(ROOT_KEY)),
        };

        let scopes = match document.get(SCOPES_KEY) {
            Some(Value::Mapping(scopes)) => Self::scope_definitions(scopes)?,
            Some(other) => {
                return Err(ConfigError::new(format!(
                    "'{}' must be a mapping of scope name to expression, found {}",
                    SCOPES_KEY,
                    value_kind(other)
                ))
                .with_kind(ConfigErrorKind::InvalidValue))
            }
            None => return Err(ConfigError::missing_key(SCOPES_KEY)),
        };

        let mut configuration = Self {
            document,
            root: PathBuf::new(),
            scopes,
        };

        let resolved = Evaluator::new(&configuration)
            .resolve(&raw_root, None)
            .map_err(|e| {
                ConfigError::new(format!("unable to resolve '{}': {}", ROOT_KEY, e))
                    .with_kind(ConfigErrorKind::InvalidValue)
            })?;

        let root = base_dir.join(resolved);
        if !root.is_dir() {
            return Err(ConfigError::new(format!(
                "{} does not exist ({} given)",
                root.display(),
                raw_root
            ))
            .with_kind(ConfigErrorKind::RootNotFound)
            .with_suggestion("a relative root is resolved against the directory of the pipeline file"));
        }

        configuration.root = root;
        Ok(configuration)
    }

    fn scope_definitions(scopes: &Mapping) -> ConfigResult<Vec<ScopeDefinition>> {
        scopes
            .iter()
            .map(|(name, expression)| {
                let name = scalar_to_string(name).ok_or_else(|| {
                    ConfigError::new(format!("scope names in '{}' must be strings", SCOPES_KEY))
                        .with_kind(ConfigErrorKind::InvalidValue)
                })?;
                let expression = scalar_to_string(expression).ok_or_else(|| {
                    ConfigError::new(format!(
                        "error in '{}' definition for {}: expected an expression, found {}",
                        SCOPES_KEY,
                        name,
                        value_kind(expression)
                    ))
                    .with_kind(ConfigErrorKind::InvalidValue)
                })?;
                Ok(ScopeDefinition { name, expression })
            })
            .collect()
    }

    /// Look up a raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    /// Root directory every scope is matched under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scope declarations in document order
    pub fn scopes(&self) -> &[ScopeDefinition] {
        &self.scopes
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeDefinition> {
        self.scopes.iter().find(|scope| scope.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn document(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_relative_root_resolves_against_base_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();

        let config = Configuration::from_value(
            document("__ROOT__: data\n__SCOPES__:\n  SUBJECT: 'subject_\\d+/'"),
            dir.path(),
        )
        .unwrap();

        assert_eq!(config.root(), dir.path().join("data"));
        assert_eq!(config.scopes().len(), 1);
        assert_eq!(config.scope("SUBJECT").unwrap().expression, "subject_\\d+/");
    }

    #[test]
    fn test_root_with_static_placeholder() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("study/raw")).unwrap();

        let config = Configuration::from_value(
            document("STUDY: study\n__ROOT__: '${STUDY}/raw'\n__SCOPES__: {}"),
            dir.path(),
        )
        .unwrap();

        assert_eq!(config.root(), dir.path().join("study/raw"));
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = Configuration::from_value(document("__SCOPES__: {}"), dir.path()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::MissingKey);
        assert!(err.message.contains("__ROOT__"));
    }

    #[test]
    fn test_missing_scopes() {
        let dir = TempDir::new().unwrap();
        let err = Configuration::from_value(document("__ROOT__: ."), dir.path()).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::MissingKey);
        assert!(err.message.contains("__SCOPES__"));
    }

    #[test]
    fn test_unreachable_root() {
        let dir = TempDir::new().unwrap();
        let err = Configuration::from_value(
            document("__ROOT__: nowhere\n__SCOPES__: {}"),
            dir.path(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::RootNotFound);
    }

    #[test]
    fn test_non_mapping_document() {
        let dir = TempDir::new().unwrap();
        let err = Configuration::from_value(document("- a\n- b"), dir.path()).unwrap_err();
        assert!(err.message.contains("a list"));
    }
}
