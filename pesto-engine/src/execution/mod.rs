// Execution Engine Module
// Handles DAG construction, checkpointed execution and progress reporting

pub mod events;
pub mod executor;
pub mod graph;
pub mod models;
pub mod record;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{effective_workers, ExecutorConfig, PipelineExecutor, PlannedNode, PlannedTask};
pub use graph::{GraphError, GraphErrorKind, Node, NodeKind, PipelineGraph, ROOT_NODE};
pub use models::{ExecutionResult, FailureKind, NodeResult, NodeStatus, TaskResult, TaskState};
pub use record::{ExecutionRecord, RecordError, RecordStore, DEFAULT_STATE_DIR};
