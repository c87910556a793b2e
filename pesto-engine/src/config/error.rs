// Configuration error types with helpful error messages
// Carries the offending file, line/column info and suggestions for common mistakes

use std::fmt;
use std::path::{Path, PathBuf};

/// Detailed configuration error with location and context
#[derive(Debug, Clone)]
pub struct ConfigError {
    /// Error message
    pub message: String,
    /// File the error was found in, if any
    pub path: Option<PathBuf>,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// Surrounding context (a few lines around the error)
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ConfigErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Invalid schema (wrong types, missing fields)
    InvalidSchema,
    /// A required key is absent from the data-structure document
    MissingKey,
    /// Invalid value
    InvalidValue,
    /// `__ROOT__` does not point to an existing directory
    RootNotFound,
    /// IO error (file not found, etc.)
    IoError,
    /// No configuration document was given
    Empty,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            line: 0,
            column: 0,
            context: String::new(),
            suggestion: None,
            kind: ConfigErrorKind::InvalidSchema,
        }
    }

    pub fn yaml_error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            kind: ConfigErrorKind::YamlSyntax,
            ..Self::new(message)
        }
    }

    pub fn missing_key(key: &str) -> Self {
        Self::new(format!("configuration must have a '{}' attribute", key))
            .with_kind(ConfigErrorKind::MissingKey)
    }

    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(format!("unable to read {}: {}", path.display(), err))
            .with_kind(ConfigErrorKind::IoError)
            .with_path(path)
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ConfigErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column + 7) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Create from a serde_yaml error raised while reading `source`
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));

        let message = format_yaml_error_message(err);
        let suggestion = suggest_yaml_fix(err, source, line);

        let mut error = ConfigError::yaml_error(message, line, column);
        if line > 0 {
            error = error.with_source_context(source, 2);
        }
        error.suggestion = suggestion;
        error
    }

    /// Create from a serde_yaml error raised while decoding one step document
    pub fn from_step_error(err: &serde_yaml::Error, index: usize) -> Self {
        let mut error = ConfigError::new(format!(
            "step document #{}: {}",
            index + 1,
            format_yaml_error_message(err)
        ));
        error.suggestion = suggest_yaml_fix(err, "", 0);
        error
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        match (&self.path, self.line) {
            (Some(path), 0) => writeln!(f, "  --> {}", path.display())?,
            (Some(path), line) => {
                writeln!(f, "  --> {}:{}:{}", path.display(), line, self.column)?
            }
            (None, 0) => {}
            (None, line) => writeln!(f, "  --> line {}:{}", line, self.column)?,
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ConfigError {}

/// Format serde_yaml error message into something more readable
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if msg.contains("missing field") {
        if let Some(field) = extract_field_name(&msg, "missing field `", "`") {
            return format!("missing required key '{}'", field);
        }
    }

    if msg.contains("unknown field") {
        if let Some(field) = extract_field_name(&msg, "unknown field `", "`") {
            if let Some(expected) = extract_expected_fields(&msg) {
                return format!(
                    "unknown key '{}', expected one of: {}",
                    field,
                    expected.join(", ")
                );
            }
            return format!("unknown key '{}'", field);
        }
    }

    if msg.contains("invalid type") {
        return format_invalid_type_error(&msg);
    }

    msg
}

fn extract_field_name(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

fn extract_expected_fields(msg: &str) -> Option<Vec<String>> {
    let start = msg.find("expected one of ")? + "expected one of ".len();
    let fields_str = &msg[start..];
    let end = fields_str.find(" at").unwrap_or(fields_str.len());
    let fields: Vec<String> = fields_str[..end]
        .split(", ")
        .map(|s| s.trim_matches('`').to_string())
        .collect();
    Some(fields)
}

fn format_invalid_type_error(msg: &str) -> String {
    if let (Some(found), Some(expected)) = (
        extract_field_name(msg, "invalid type: ", ","),
        extract_field_name(msg, "expected ", "\u{0}").or_else(|| {
            msg.find("expected ")
                .map(|i| msg[i + "expected ".len()..].trim().to_string())
        }),
    ) {
        let expected = expected
            .split(" at line")
            .next()
            .unwrap_or(&expected)
            .to_string();
        return format!("expected {}, but found {}", expected, found);
    }
    msg.to_string()
}

/// Suggest fixes for common YAML errors
fn suggest_yaml_fix(err: &serde_yaml::Error, source: &str, line: usize) -> Option<String> {
    let msg = err.to_string();
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).unwrap_or(&"");

    if msg.contains("missing field `__CMD__`") {
        return Some(
            "each step needs '__CMD__:', a list holding the program and its arguments".to_string(),
        );
    }

    if msg.contains("missing field `__SCOPE__`") {
        return Some("each step must name the scope it runs over with '__SCOPE__:'".to_string());
    }

    if msg.contains("invalid type") && msg.contains("__CMD__") {
        return Some("'__CMD__' must be a list, e.g. [\"echo\", \"?{FILE}\"]".to_string());
    }

    if msg.contains("expected") && msg.contains("found") && error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    let typo_suggestions = [
        ("__DEPENDENCY__", "__DEPENDENCIES__"),
        ("__DEPENDS__", "__DEPENDENCIES__"),
        ("__COMMAND__", "__CMD__"),
        ("__WORKER_MODIFIER__", "__WORKERS_MODIFIER__"),
        ("__WORKERS__", "__WORKERS_MODIFIER__"),
        ("__DESC__", "__DESCRIPTION__"),
        ("__SCOPES__", "__SCOPE__"),
    ];

    for (typo, correct) in typo_suggestions {
        if msg.contains(&format!("`{}`", typo)) || error_line.contains(typo) {
            return Some(format!("did you mean '{}'?", correct));
        }
    }

    None
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
