// Pipeline Data Models
// Serde models for step documents and the scope declarations of the data-structure document

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::path::PathBuf;

/// Key holding the root directory in the data-structure document
pub const ROOT_KEY: &str = "__ROOT__";
/// Key holding the scope declarations in the data-structure document
pub const SCOPES_KEY: &str = "__SCOPES__";
/// Key of a step document that splices in another file of step documents
pub const FILE_KEY: &str = "__FILE__";

/// A scope as declared in `__SCOPES__`, before its placeholders are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDefinition {
    pub name: String,
    pub expression: String,
}

// =============================================================================
// Step
// =============================================================================

/// One step document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Unique step name
    #[serde(rename = "__NAME__")]
    pub name: String,

    /// Human readable description
    #[serde(rename = "__DESCRIPTION__")]
    pub description: String,

    /// Name of the scope the step runs over
    #[serde(rename = "__SCOPE__")]
    pub scope: String,

    /// Program and arguments, each possibly holding placeholders
    #[serde(rename = "__CMD__", deserialize_with = "deserialize_command")]
    pub command: Vec<String>,

    /// Declared parents; absent means "the previous step"
    #[serde(rename = "__DEPENDENCIES__", default)]
    pub dependencies: Option<Dependencies>,

    /// Multiplier applied to the worker budget for this step
    #[serde(
        rename = "__WORKERS_MODIFIER__",
        default = "default_workers_modifier"
    )]
    pub workers_modifier: f64,
}

fn default_workers_modifier() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependencies {
    /// Single parent
    Single(String),
    /// Any number of parents; an empty list attaches the step to the root
    Multiple(Vec<String>),
}

impl Dependencies {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Dependencies::Single(s) => vec![s.clone()],
            Dependencies::Multiple(v) => v.clone(),
        }
    }
}

/// Command arguments may be written as any YAML scalar
fn deserialize_command<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    values
        .iter()
        .map(|value| {
            scalar_to_string(value).ok_or_else(|| {
                serde::de::Error::custom(format!(
                    "__CMD__ arguments must be scalars, found {}",
                    value_kind(value)
                ))
            })
        })
        .collect()
}

impl StepDefinition {
    /// Reject steps that deserialized but cannot run
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("__NAME__", &self.name),
            ("__DESCRIPTION__", &self.description),
            ("__SCOPE__", &self.scope),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(format!("'{}' must not be empty", key));
            }
        }

        if self.command.is_empty() {
            return Err("'__CMD__' must hold at least the program to run".to_string());
        }

        if !self.workers_modifier.is_finite() || self.workers_modifier < 0.0 {
            return Err(format!(
                "'__WORKERS_MODIFIER__' must be a number >= 0, found {}",
                self.workers_modifier
            ));
        }

        Ok(())
    }
}

/// An entry of the step sequence, before includes are expanded
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    Step(StepDefinition),
    Include {
        /// Raw path expression, may hold static placeholders
        path: String,
        /// Directory a relative path is resolved against
        base_dir: PathBuf,
    },
}

impl StepSpec {
    pub fn name(&self) -> Option<&str> {
        match self {
            StepSpec::Step(step) => Some(&step.name),
            StepSpec::Include { .. } => None,
        }
    }
}

/// Render a scalar as the text substituted into templates
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        _ => None,
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_definition_defaults() {
        let yaml = r#"
__NAME__: merge
__DESCRIPTION__: merge the runs
__SCOPE__: SUBJECT
__CMD__: ["merge", "?{RUN}", 3, true]
"#;
        let step: StepDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.name, "merge");
        assert_eq!(step.command, vec!["merge", "?{RUN}", "3", "true"]);
        assert!(step.dependencies.is_none());
        assert_eq!(step.workers_modifier, 1.0);
        assert!(step.validate().is_ok());
    }

    #[test]
    fn test_dependencies_single_or_many() {
        let single: StepDefinition = serde_yaml::from_str(
            "__NAME__: b\n__DESCRIPTION__: d\n__SCOPE__: S\n__CMD__: [x]\n__DEPENDENCIES__: a",
        )
        .unwrap();
        assert_eq!(single.dependencies.unwrap().as_vec(), vec!["a"]);

        let many: StepDefinition = serde_yaml::from_str(
            "__NAME__: c\n__DESCRIPTION__: d\n__SCOPE__: S\n__CMD__: [x]\n__DEPENDENCIES__: [a, b]\n__WORKERS_MODIFIER__: 2",
        )
        .unwrap();
        assert_eq!(many.dependencies.unwrap().as_vec(), vec!["a", "b"]);
        assert_eq!(many.workers_modifier, 2.0);
    }

    #[test]
    fn test_command_rejects_nested_values() {
        let result: Result<StepDefinition, _> = serde_yaml::from_str(
            "__NAME__: a\n__DESCRIPTION__: d\n__SCOPE__: S\n__CMD__: [echo, {x: 1}]",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_negative_modifier() {
        let step = StepDefinition {
            name: "a".to_string(),
            description: "d".to_string(),
            scope: "S".to_string(),
            command: vec!["true".to_string()],
            dependencies: None,
            workers_modifier: -0.5,
        };
        assert!(step.validate().unwrap_err().contains("__WORKERS_MODIFIER__"));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let step = StepDefinition {
            name: "a".to_string(),
            description: " ".to_string(),
            scope: "S".to_string(),
            command: vec![],
            dependencies: None,
            workers_modifier: 1.0,
        };
        assert!(step.validate().unwrap_err().contains("__DESCRIPTION__"));
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&Value::from(4)), Some("4".to_string()));
        assert_eq!(scalar_to_string(&Value::from(false)), Some("false".to_string()));
        assert_eq!(scalar_to_string(&Value::Null), None);
    }
}
