// Pesto Engine Library
// Core library for loading, resolving and executing file-driven batch pipelines

pub mod config;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod runners;
pub mod scope;
pub mod template;

// Re-export commonly used types
pub use error::{PestoError, PestoResult};
pub use pipeline::Pipeline;

// Re-export configuration types
pub use config::{
    ConfigError, ConfigErrorKind, ConfigResult, Configuration, PipelineDocument, PipelineLoader,
    StepDefinition, StepSpec,
};

// Re-export resolution types
pub use scope::{ResolvedScope, ScopeCatalog, ScopeError};
pub use template::{EvaluationError, Evaluator};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionRecord, ExecutionResult, ExecutorConfig,
    GraphError, GraphErrorKind, NodeStatus, PipelineExecutor, PipelineGraph, ProgressSender,
    RecordStore, TaskState,
};

// Re-export runner types
pub use runners::{CommandRunner, ProcessRunner};
