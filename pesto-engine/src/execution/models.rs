// Execution Models
// Task outcomes and per-node / per-run results

use std::fmt;
use std::time::Duration;

/// Why a task ended in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A placeholder could not be resolved; nothing was spawned
    Evaluation(String),
    /// The program exists but may not be executed
    PermissionDenied,
    /// The program could not be found
    CommandNotFound,
    /// The process exited with a non-zero status (`None` when killed by a signal)
    NonZeroExit(Option<i32>),
    /// The process output is not valid UTF-8
    OutputDecode,
    /// Any other spawn failure
    Launch(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Evaluation(message) => write!(f, "evaluation error: {}", message),
            FailureKind::PermissionDenied => write!(f, "permission denied"),
            FailureKind::CommandNotFound => write!(f, "command not found"),
            FailureKind::NonZeroExit(Some(code)) => write!(f, "exited with status {}", code),
            FailureKind::NonZeroExit(None) => write!(f, "terminated by a signal"),
            FailureKind::OutputDecode => write!(f, "output is not valid UTF-8"),
            FailureKind::Launch(message) => write!(f, "unable to launch: {}", message),
        }
    }
}

/// Final state of one (node, scope value) task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// A previous run already succeeded
    Skipped,
    Succeeded,
    Failed(FailureKind),
}

impl TaskState {
    /// Code stored in the execution record
    pub fn code(&self) -> i32 {
        match self {
            TaskState::Skipped | TaskState::Succeeded => 0,
            TaskState::Failed(FailureKind::NonZeroExit(Some(code))) if *code != 0 => *code,
            TaskState::Failed(FailureKind::CommandNotFound) => 127,
            TaskState::Failed(FailureKind::PermissionDenied) => 126,
            TaskState::Failed(_) => -1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Skipped | TaskState::Succeeded)
    }
}

/// Outcome of a single task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub value: String,
    pub state: TaskState,
    /// Resolved command line, when evaluation succeeded
    pub command: Option<Vec<String>>,
    pub duration: Duration,
}

/// Status of a node after execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Every scope value succeeded or was already successful
    Succeeded,
    /// At least one scope value failed
    Failed,
}

/// Result of a node execution
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub name: String,
    pub status: NodeStatus,
    pub tasks: Vec<TaskResult>,
    pub duration: Duration,
}

impl NodeResult {
    pub fn failed_values(&self) -> impl Iterator<Item = &TaskResult> {
        self.tasks.iter().filter(|task| !task.state.is_success())
    }

    pub fn count(&self, predicate: impl Fn(&TaskState) -> bool) -> usize {
        self.tasks.iter().filter(|task| predicate(&task.state)).count()
    }
}

/// Result of a whole run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Node results in execution order
    pub nodes: Vec<NodeResult>,
    pub duration: Duration,
    /// Overall success
    pub success: bool,
}

impl ExecutionResult {
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeResult> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_codes() {
        assert_eq!(TaskState::Succeeded.code(), 0);
        assert_eq!(TaskState::Skipped.code(), 0);
        assert_eq!(
            TaskState::Failed(FailureKind::NonZeroExit(Some(3))).code(),
            3
        );
        assert_eq!(TaskState::Failed(FailureKind::NonZeroExit(None)).code(), -1);
        assert_eq!(TaskState::Failed(FailureKind::CommandNotFound).code(), 127);
        assert_eq!(
            TaskState::Failed(FailureKind::Evaluation("x".into())).code(),
            -1
        );
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(
            FailureKind::NonZeroExit(Some(2)).to_string(),
            "exited with status 2"
        );
        assert_eq!(FailureKind::PermissionDenied.to_string(), "permission denied");
    }

    #[test]
    fn test_node_result_counts() {
        let task = |value: &str, state| TaskResult {
            value: value.to_string(),
            state,
            command: None,
            duration: Duration::ZERO,
        };
        let result = NodeResult {
            name: "n".to_string(),
            status: NodeStatus::Failed,
            tasks: vec![
                task("a", TaskState::Skipped),
                task("b", TaskState::Succeeded),
                task("c", TaskState::Failed(FailureKind::OutputDecode)),
            ],
            duration: Duration::ZERO,
        };
        assert_eq!(result.count(TaskState::is_success), 2);
        assert_eq!(result.failed_values().map(|t| t.value.as_str()).collect::<Vec<_>>(), vec!["c"]);
    }
}
