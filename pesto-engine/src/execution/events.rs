// Execution Events
// Progress reporting and event types for pipeline execution

use crate::execution::models::{NodeStatus, TaskState};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline execution started
    PipelineStarted { total_nodes: usize },

    /// Pipeline execution completed
    PipelineCompleted { success: bool, duration: Duration },

    /// Node execution started
    NodeStarted {
        node_name: String,
        description: String,
        total_values: usize,
        workers: usize,
    },

    /// Node execution completed
    NodeCompleted {
        node_name: String,
        status: NodeStatus,
        duration: Duration,
    },

    /// Scope value skipped because a previous run succeeded
    TaskSkipped { node_name: String, value: String },

    /// Scope value finished; counters cover the whole node so far
    TaskCompleted {
        node_name: String,
        value: String,
        state: TaskState,
        /// Resolved command line, when evaluation succeeded
        command: Option<Vec<String>>,
        completed: usize,
        failed: usize,
        total: usize,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        node_name: Option<String>,
    },

    /// Execution error occurred
    Error {
        message: String,
        node_name: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a pipeline started event
    pub fn pipeline_started(total_nodes: usize) -> Self {
        Self::PipelineStarted { total_nodes }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(success: bool, duration: Duration) -> Self {
        Self::PipelineCompleted { success, duration }
    }

    /// Create a node started event
    pub fn node_started(
        name: impl Into<String>,
        description: impl Into<String>,
        total_values: usize,
        workers: usize,
    ) -> Self {
        Self::NodeStarted {
            node_name: name.into(),
            description: description.into(),
            total_values,
            workers,
        }
    }

    /// Create a node completed event
    pub fn node_completed(name: impl Into<String>, status: NodeStatus, duration: Duration) -> Self {
        Self::NodeCompleted {
            node_name: name.into(),
            status,
            duration,
        }
    }

    /// Create a task skipped event
    pub fn task_skipped(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::TaskSkipped {
            node_name: name.into(),
            value: value.into(),
        }
    }

    /// Create a log event
    pub fn log(level: LogLevel, message: impl Into<String>, node_name: Option<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
            node_name,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, node_name: Option<String>) -> Self {
        Self::log(LogLevel::Warning, message, node_name)
    }

    /// Create an execution error event
    pub fn execution_error(message: impl Into<String>, node_name: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            node_name,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::pipeline_started(2));
        tx.send_event(ExecutionEvent::node_started("merge", "merge runs", 4, 2));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::PipelineStarted { total_nodes: 2 }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::NodeStarted { workers: 2, .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::node_completed(
            "merge",
            NodeStatus::Failed,
            Duration::from_secs(30),
        );

        if let ExecutionEvent::NodeCompleted {
            node_name,
            status,
            duration,
        } = event
        {
            assert_eq!(node_name, "merge");
            assert_eq!(status, NodeStatus::Failed);
            assert_eq!(duration, Duration::from_secs(30));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::warning("test", None));
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::pipeline_started(0));
    }
}
