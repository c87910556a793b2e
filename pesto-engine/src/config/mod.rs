// Pipeline Configuration Module
// Loads the data-structure document and the step specs from YAML streams

pub mod document;
pub mod error;
pub mod loader;
pub mod models;

// Re-export key types
pub use document::Configuration;
pub use error::{ConfigError, ConfigErrorKind, ConfigResult};
pub use loader::{PipelineDocument, PipelineLoader};
pub use models::{
    scalar_to_string, Dependencies, ScopeDefinition, StepDefinition, StepSpec, FILE_KEY,
    ROOT_KEY, SCOPES_KEY,
};
