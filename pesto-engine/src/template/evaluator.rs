// Template Evaluator
// Resolves ${static} placeholders from the configuration and ?{dynamic} ones from the filesystem

use crate::config::models::value_kind;
use crate::config::{scalar_to_string, Configuration};
use crate::scope::ScopeCatalog;
use crate::template::lexer::{extract_placeholders, first_static, DynamicRef, Segment};

use regex::Regex;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while resolving a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("unable to find any key '{key}' in the configuration")]
    MissingKey { key: String },

    #[error("key '{key}' holds {kind}, expected a string, number or boolean")]
    NotScalar { key: String, kind: &'static str },

    #[error("placeholder cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("bad evaluation of '{key}' within '{template}', expected one match, found {}: {matches:?}", .matches.len())]
    MatchCount {
        key: String,
        template: String,
        matches: Vec<String>,
    },

    #[error("bad regular expression r'{pattern}' for {key}: {message}")]
    BadPattern {
        key: String,
        pattern: String,
        message: String,
    },

    #[error("'?{{{key}->{scope}}}' redirects to an unknown scope")]
    UnknownScope { key: String, scope: String },

    #[error("'?{{{key}}}' cannot be resolved before the root directory is scanned")]
    NoFilesystem { key: String },
}

impl EvaluationError {
    /// The key the error is about, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            EvaluationError::MissingKey { key }
            | EvaluationError::NotScalar { key, .. }
            | EvaluationError::MatchCount { key, .. }
            | EvaluationError::BadPattern { key, .. }
            | EvaluationError::UnknownScope { key, .. }
            | EvaluationError::NoFilesystem { key } => Some(key),
            EvaluationError::Cycle { .. } => None,
        }
    }
}

pub type EvaluationResult<T> = Result<T, EvaluationError>;

/// Resolves placeholders against a configuration and, once built, the scope catalog.
///
/// Static placeholders are substituted first, over the whole string, so they
/// may build the key of a dynamic placeholder (`?{${KEY}}`). Each referenced
/// value is resolved depth-first before it is substituted. Text produced by a
/// dynamic match is literal and is not scanned again.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    config: &'a Configuration,
    catalog: Option<&'a ScopeCatalog>,
}

impl<'a> Evaluator<'a> {
    /// Evaluator for static placeholders only
    pub fn new(config: &'a Configuration) -> Self {
        Self {
            config,
            catalog: None,
        }
    }

    /// Evaluator that also searches the scanned filesystem
    pub fn with_catalog(config: &'a Configuration, catalog: &'a ScopeCatalog) -> Self {
        Self {
            config,
            catalog: Some(catalog),
        }
    }

    /// Resolve every placeholder of `template`.
    ///
    /// `current` is the scope value the template is evaluated for; dynamic
    /// placeholders only search the files under that value.
    pub fn resolve(&self, template: &str, current: Option<&str>) -> EvaluationResult<String> {
        let mut stack = Vec::new();
        self.expand(template, template, current, &mut stack)
    }

    /// Resolve each argument of a command template
    pub fn resolve_command(
        &self,
        command: &[String],
        current: Option<&str>,
    ) -> EvaluationResult<Vec<String>> {
        command
            .iter()
            .map(|arg| self.resolve(arg, current))
            .collect()
    }

    /// Substitute every static placeholder, rescanning the whole string after
    /// each substitution, then resolve the dynamic placeholders left over.
    fn expand(
        &self,
        input: &str,
        origin: &str,
        current: Option<&str>,
        stack: &mut Vec<String>,
    ) -> EvaluationResult<String> {
        let mut value = input.to_string();
        while let Some(key) = first_static(&value).map(str::to_string) {
            let marker = format!("${{{}}}", key);
            let resolved = self.nested_value(&key, origin, current, stack)?;
            if resolved.contains(&marker) {
                return Err(EvaluationError::Cycle {
                    chain: vec![key.clone(), key],
                });
            }
            value = value.replace(&marker, &resolved);
        }

        let mut output = String::with_capacity(value.len());
        for segment in extract_placeholders(&value) {
            match segment {
                Segment::Text(text) => output.push_str(&text),
                Segment::Static(key) => {
                    output.push_str(&self.nested_value(&key, origin, current, stack)?)
                }
                Segment::Dynamic(reference) => {
                    output.push_str(&self.dynamic_value(&reference, origin, current, stack)?)
                }
            }
        }
        Ok(output)
    }

    /// Resolve the value stored under `key`, guarding against reference cycles
    fn nested_value(
        &self,
        key: &str,
        origin: &str,
        current: Option<&str>,
        stack: &mut Vec<String>,
    ) -> EvaluationResult<String> {
        if stack.iter().any(|k| k == key) {
            let mut chain = stack.clone();
            chain.push(key.to_string());
            return Err(EvaluationError::Cycle { chain });
        }

        let raw = self.lookup(key)?;
        stack.push(key.to_string());
        let resolved = self.expand(&raw, origin, current, stack);
        stack.pop();
        resolved
    }

    fn dynamic_value(
        &self,
        reference: &DynamicRef,
        origin: &str,
        current: Option<&str>,
        stack: &mut Vec<String>,
    ) -> EvaluationResult<String> {
        let key = &reference.key;
        let catalog = self
            .catalog
            .ok_or_else(|| EvaluationError::NoFilesystem { key: key.clone() })?;

        let context = match &reference.scope {
            Some(scope) => Some(self.redirect_pattern(key, scope, origin, current, stack)?),
            None => current.map(|value| format!("^{}", value)),
        };
        let context = context
            .map(|pattern| compile(key, &pattern))
            .transpose()?;

        let pattern = self.nested_value(key, origin, current, stack)?;
        let expression = compile(key, &pattern)?;

        let matches: BTreeSet<&str> = catalog
            .files()
            .iter()
            .filter(|file| context.as_ref().map_or(true, |re| re.is_match(file)))
            .filter_map(|file| expression.find(file).map(|m| m.as_str()))
            .collect();

        if matches.len() == 1 {
            if let Some(found) = matches.iter().next() {
                return Ok(found.to_string());
            }
        }

        Err(EvaluationError::MatchCount {
            key: key.clone(),
            template: origin.to_string(),
            matches: matches.into_iter().map(str::to_string).collect(),
        })
    }

    /// Pattern selecting the files a redirected placeholder searches
    fn redirect_pattern(
        &self,
        key: &str,
        scope: &str,
        origin: &str,
        current: Option<&str>,
        stack: &mut Vec<String>,
    ) -> EvaluationResult<String> {
        if let Some(resolved) = self.catalog.and_then(|catalog| catalog.scope(scope)) {
            return Ok(resolved.pattern.clone());
        }
        if self.config.get(scope).is_some() {
            return self.nested_value(scope, origin, current, stack);
        }
        Err(EvaluationError::UnknownScope {
            key: key.to_string(),
            scope: scope.to_string(),
        })
    }

    fn lookup(&self, key: &str) -> EvaluationResult<String> {
        let value = self
            .config
            .get(key)
            .ok_or_else(|| EvaluationError::MissingKey {
                key: key.to_string(),
            })?;
        scalar_to_string(value).ok_or_else(|| EvaluationError::NotScalar {
            key: key.to_string(),
            kind: value_kind(value),
        })
    }
}

fn compile(key: &str, pattern: &str) -> EvaluationResult<Regex> {
    Regex::new(pattern).map_err(|e| EvaluationError::BadPattern {
        key: key.to_string(),
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"
__ROOT__: .
__SCOPES__:
  SCOPE_2: '${SCOPE_2}'
SCOPE_1: 'scope_1.*?/'
SCOPE_2: '(${SCOPE_2_DIGIT}|${SCOPE_2_LETTER})'
SCOPE_2_DIGIT: 'scope_2_\d/'
SCOPE_2_LETTER: 'scope_2_[a-zA-Z]/'
SCOPE2_DYNAMIC: '?{SCOPE_2}'
LETTER_FROM_DIGIT: '?{SCOPE_2_LETTER->SCOPE_2_DIGIT}'
A: x
B: '${A}y'
COUNT: 3
LOOP_A: '${LOOP_B}'
LOOP_B: '${LOOP_A}'
SELF: '?{SELF}'
LIST: [1, 2]
BROKEN: '(unclosed'
"#;

    const FILES: [&str; 3] = [
        "data/scope_1/scope_2_1/scope_3-b_scope_4_a",
        "data/scope_1/scope_2_a/scope_3-b_scope_4_a",
        "data/scope_1/scope_2_b/scope_3-b_scope_4_a",
    ];

    const CURRENT: &str = "data/scope_1/scope_2_b/";

    fn fixture() -> (TempDir, Configuration, ScopeCatalog) {
        let dir = TempDir::new().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(DOCUMENT).unwrap();
        let config = Configuration::from_value(value, dir.path()).unwrap();
        let files = FILES.iter().map(|f| f.to_string()).collect();
        let catalog = ScopeCatalog::from_files(&config, files).unwrap();
        (dir, config, catalog)
    }

    #[test]
    fn test_plain_text_unchanged() {
        let (_dir, config, _) = fixture();
        let evaluator = Evaluator::new(&config);
        assert_eq!(evaluator.resolve("plain text", None).unwrap(), "plain text");
    }

    #[test]
    fn test_nested_static() {
        let (_dir, config, _) = fixture();
        let evaluator = Evaluator::new(&config);
        assert_eq!(evaluator.resolve("${B}", None).unwrap(), "xy");
        assert_eq!(
            evaluator.resolve("${SCOPE_2} is nested", None).unwrap(),
            r"(scope_2_\d/|scope_2_[a-zA-Z]/) is nested"
        );
    }

    #[test]
    fn test_number_substitutes_as_text() {
        let (_dir, config, _) = fixture();
        let evaluator = Evaluator::new(&config);
        assert_eq!(evaluator.resolve("-n ${COUNT}", None).unwrap(), "-n 3");
    }

    #[test]
    fn test_missing_key() {
        let (_dir, config, _) = fixture();
        let err = Evaluator::new(&config).resolve("${NOPE}", None).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::MissingKey {
                key: "NOPE".to_string()
            }
        );
    }

    #[test]
    fn test_non_scalar_value() {
        let (_dir, config, _) = fixture();
        let err = Evaluator::new(&config).resolve("${LIST}", None).unwrap_err();
        assert!(matches!(err, EvaluationError::NotScalar { kind: "a list", .. }));
    }

    #[test]
    fn test_static_cycle_is_rejected() {
        let (_dir, config, _) = fixture();
        let err = Evaluator::new(&config).resolve("${LOOP_A}", None).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::Cycle {
                chain: vec![
                    "LOOP_A".to_string(),
                    "LOOP_B".to_string(),
                    "LOOP_A".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_dynamic_cycle_is_rejected() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        let err = evaluator.resolve("?{SELF}", Some(CURRENT)).unwrap_err();
        assert!(matches!(err, EvaluationError::Cycle { .. }));
    }

    #[test]
    fn test_dynamic_within_current_value() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        assert_eq!(
            evaluator
                .resolve("?{SCOPE_2_LETTER} is dynamic", Some(CURRENT))
                .unwrap(),
            "scope_2_b/ is dynamic"
        );
    }

    #[test]
    fn test_static_nested_in_dynamic() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        assert_eq!(
            evaluator.resolve("?{SCOPE_2}", Some(CURRENT)).unwrap(),
            "scope_2_b/"
        );
    }

    #[test]
    fn test_dynamic_nested_in_static() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        assert_eq!(
            evaluator
                .resolve("${SCOPE2_DYNAMIC} is static", Some(CURRENT))
                .unwrap(),
            "scope_2_b/ is static"
        );
    }

    #[test]
    fn test_ambiguous_dynamic_match() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);

        // Without a current value every file is searched
        let err = evaluator.resolve("?{SCOPE_2}", None).unwrap_err();
        match err {
            EvaluationError::MatchCount {
                key,
                template,
                matches,
            } => {
                assert_eq!(key, "SCOPE_2");
                assert_eq!(template, "?{SCOPE_2}");
                assert_eq!(matches, vec!["scope_2_1/", "scope_2_a/", "scope_2_b/"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_dynamic_match() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        let err = evaluator
            .resolve("?{SCOPE_2_DIGIT}", Some(CURRENT))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::MatchCount { ref matches, .. } if matches.is_empty()));
    }

    #[test]
    fn test_redirect_replaces_context() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);

        // Only the file under scope_2_1/ matches the digit pattern, and it has no letter dir
        let err = evaluator.resolve("${LETTER_FROM_DIGIT}", Some(CURRENT)).unwrap_err();
        assert!(matches!(err, EvaluationError::MatchCount { .. }));

        assert_eq!(
            evaluator
                .resolve("?{SCOPE_2_DIGIT->SCOPE_2_DIGIT}", Some(CURRENT))
                .unwrap(),
            "scope_2_1/"
        );
    }

    #[test]
    fn test_static_builds_dynamic_key() {
        let dir = TempDir::new().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(
            "__ROOT__: .\n__SCOPES__: {}\nK: A_PAT\nA_PAT: 'a\\d'\nGLUE: '?{${K}->${S}}'\nS: SUBJECTS\nSUBJECTS: 's\\d/'\n",
        )
        .unwrap();
        let config = Configuration::from_value(value, dir.path()).unwrap();
        let files = vec!["s1/a1".to_string(), "s2/a2".to_string()];
        let catalog = ScopeCatalog::from_files(&config, files).unwrap();
        let evaluator = Evaluator::with_catalog(&config, &catalog);

        assert_eq!(evaluator.resolve("?{${K}}", Some("s1/")).unwrap(), "a1");
        assert_eq!(evaluator.resolve("-i ?{${K}} -o x", Some("s2/")).unwrap(), "-i a2 -o x");

        // Both the key and the redirect come from static placeholders
        let err = evaluator.resolve("${GLUE}", Some("s1/")).unwrap_err();
        assert!(matches!(err, EvaluationError::MatchCount { ref key, .. } if key == "A_PAT"));
    }

    #[test]
    fn test_static_formed_by_substitution() {
        let dir = TempDir::new().unwrap();
        let value: serde_yaml::Value =
            serde_yaml::from_str("__ROOT__: .\n__SCOPES__: {}\nDOLLAR: '$'\nC: z\n").unwrap();
        let config = Configuration::from_value(value, dir.path()).unwrap();
        let evaluator = Evaluator::new(&config);
        assert_eq!(evaluator.resolve("${DOLLAR}{C}", None).unwrap(), "z");
    }

    #[test]
    fn test_redirect_to_unknown_scope() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        let err = evaluator.resolve("?{SCOPE_1->MISSING}", None).unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownScope { .. }));
    }

    #[test]
    fn test_bad_pattern() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        let err = evaluator.resolve("?{BROKEN}", None).unwrap_err();
        assert!(matches!(err, EvaluationError::BadPattern { .. }));
    }

    #[test]
    fn test_dynamic_without_catalog() {
        let (_dir, config, _) = fixture();
        let err = Evaluator::new(&config).resolve("?{SCOPE_1}", None).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::NoFilesystem {
                key: "SCOPE_1".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_command() {
        let (_dir, config, catalog) = fixture();
        let evaluator = Evaluator::with_catalog(&config, &catalog);
        let command = vec!["echo".to_string(), "${A}".to_string(), "?{SCOPE_1}".to_string()];
        assert_eq!(
            evaluator.resolve_command(&command, Some(CURRENT)).unwrap(),
            vec!["echo", "x", "scope_1/"]
        );
    }
}
