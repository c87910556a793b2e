// Pipeline Loader
// Reads multi-document YAML pipeline files into a configuration and a step sequence

use crate::config::document::Configuration;
use crate::config::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::config::models::{scalar_to_string, StepDefinition, StepSpec, FILE_KEY};

use serde::Deserialize;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything read from the pipeline files passed on the command line
#[derive(Debug, Clone)]
pub struct PipelineDocument {
    pub configuration: Configuration,
    /// Step specs in order, includes not yet expanded
    pub steps: Vec<StepSpec>,
}

pub struct PipelineLoader;

impl PipelineLoader {
    /// Load the data-structure document and every step spec.
    ///
    /// The first document of the first file is the configuration; every other
    /// document of every file is a step spec.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> ConfigResult<PipelineDocument> {
        let mut configuration = None;
        let mut steps = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let mut documents = Self::read_documents(path)?.into_iter();
            let base_dir = base_dir_of(path);

            if configuration.is_none() {
                let Some(first) = documents.next() else {
                    return Err(ConfigError::new("the first pipeline file holds no document")
                        .with_kind(ConfigErrorKind::Empty)
                        .with_path(path));
                };
                configuration = Some(
                    Configuration::from_value(first, &base_dir).map_err(|e| e.with_path(path))?,
                );
            }

            let offset = steps.len();
            let specs = Self::step_specs(documents.collect(), &base_dir, offset)
                .map_err(|e| e.with_path(path))?;
            debug!(file = %path.display(), steps = specs.len(), "loaded step documents");
            steps.extend(specs);
        }

        let configuration = configuration.ok_or_else(|| {
            ConfigError::new("no pipeline file given").with_kind(ConfigErrorKind::Empty)
        })?;

        Ok(PipelineDocument {
            configuration,
            steps,
        })
    }

    /// Read every non-empty document of a YAML stream
    pub fn read_documents(path: &Path) -> ConfigResult<Vec<Value>> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::parse_documents(&source).map_err(|e| e.with_path(path))
    }

    pub fn parse_documents(source: &str) -> ConfigResult<Vec<Value>> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(source) {
            let value = Value::deserialize(document)
                .map_err(|e| ConfigError::from_yaml_error(&e, source))?;
            if !value.is_null() {
                documents.push(value);
            }
        }
        Ok(documents)
    }

    /// Read a file whose documents are all step specs
    pub fn read_step_specs(path: &Path) -> ConfigResult<Vec<StepSpec>> {
        let documents = Self::read_documents(path)?;
        Self::step_specs(documents, &base_dir_of(path), 0).map_err(|e| e.with_path(path))
    }

    /// Turn documents into step specs; `offset` numbers documents in messages
    pub fn step_specs(
        documents: Vec<Value>,
        base_dir: &Path,
        offset: usize,
    ) -> ConfigResult<Vec<StepSpec>> {
        documents
            .into_iter()
            .enumerate()
            .map(|(i, document)| Self::step_spec(document, base_dir, offset + i))
            .collect()
    }

    fn step_spec(document: Value, base_dir: &Path, index: usize) -> ConfigResult<StepSpec> {
        if let Some(mapping) = document.as_mapping() {
            if let Some(include) = mapping.get(FILE_KEY) {
                if mapping.len() > 1 {
                    return Err(ConfigError::new(format!(
                        "step document #{}: '{}' cannot be combined with other keys",
                        index + 1,
                        FILE_KEY
                    )));
                }
                let path = scalar_to_string(include).ok_or_else(|| {
                    ConfigError::new(format!(
                        "step document #{}: '{}' must be a path",
                        index + 1,
                        FILE_KEY
                    ))
                    .with_kind(ConfigErrorKind::InvalidValue)
                })?;
                return Ok(StepSpec::Include {
                    path,
                    base_dir: base_dir.to_path_buf(),
                });
            }
        }

        let step: StepDefinition = serde_yaml::from_value(document)
            .map_err(|e| ConfigError::from_step_error(&e, index))?;
        step.validate().map_err(|message| {
            ConfigError::new(format!("step '{}': {}", step.name, message))
                .with_kind(ConfigErrorKind::InvalidValue)
        })?;
        Ok(StepSpec::Step(step))
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
