// Pipeline Executor
// Runs the graph in topological order with one bounded worker pool per node and per-task checkpoints

use crate::error::{PestoError, PestoResult};
use crate::execution::events::{EventSender, ExecutionEvent, LogLevel, ProgressSender};
use crate::execution::graph::{GraphError, Node, PipelineGraph};
use crate::execution::models::{
    ExecutionResult, FailureKind, NodeResult, NodeStatus, TaskResult, TaskState,
};
use crate::execution::record::{ExecutionRecord, RecordStore, DEFAULT_STATE_DIR};
use crate::runners::{CommandRunner, LaunchError, ProcessRunner};
use crate::template::{EvaluationError, Evaluator};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker budget shared by the tasks of one node
    pub workers: usize,
    /// Rerun scope values that already succeeded
    pub force: bool,
    /// Directory holding one execution record per node
    pub state_dir: PathBuf,
    /// Working directory of spawned commands (current directory when `None`)
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            force: false,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            working_dir: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the worker budget; 0 means one worker per CPU
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Concurrent tasks allowed for a node: `max(1, floor(budget * modifier))`,
/// capped at the largest pool a [`Semaphore`] can hold
pub fn effective_workers(budget: usize, modifier: f64) -> usize {
    let workers = (budget as f64 * modifier).floor();
    if workers >= Semaphore::MAX_PERMITS as f64 {
        Semaphore::MAX_PERMITS
    } else if workers >= 1.0 {
        workers as usize
    } else {
        1
    }
}

/// What a dry run would execute for one scope value
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub value: String,
    pub command: Result<Vec<String>, EvaluationError>,
    /// A previous run already succeeded, so a non-forced run skips it
    pub skipped: bool,
}

/// What a dry run would execute for one node
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub name: String,
    pub description: String,
    pub workers: usize,
    pub tasks: Vec<PlannedTask>,
}

/// Record and progress counters of the node being executed
struct NodeCheckpoint {
    record: ExecutionRecord,
    completed: usize,
    failed: usize,
    total: usize,
}

/// Pipeline executor
pub struct PipelineExecutor<'a> {
    graph: &'a PipelineGraph,
    evaluator: Evaluator<'a>,
    config: ExecutorConfig,
    store: RecordStore,
    runner: Arc<dyn CommandRunner>,
    event_tx: Option<ProgressSender>,
}

impl<'a> PipelineExecutor<'a> {
    /// Create a new executor over a reduced graph
    pub fn new(graph: &'a PipelineGraph, evaluator: Evaluator<'a>) -> Self {
        let config = ExecutorConfig::default();
        Self {
            graph,
            evaluator,
            store: RecordStore::new(&config.state_dir),
            config,
            runner: Arc::new(ProcessRunner::new()),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.store = RecordStore::new(&config.state_dir);
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Replace the process runner
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every node reachable from `start` (the root when `None`).
    ///
    /// Node failures do not stop the traversal; they are reported in the
    /// result. An interrupt stops the run with [`PestoError::Interrupted`]
    /// without killing processes already started.
    pub async fn run(&self, start: Option<&str>) -> PestoResult<ExecutionResult> {
        let nodes = self.graph.walk(start)?;

        // Checkpoint writes never span an await point, so dropping the run
        // on interrupt cannot leave a record half written.
        tokio::select! {
            result = self.execute_nodes(nodes) => Ok(result),
            _ = interrupted() => {
                warn!("interrupted, stopping before the next checkpoint");
                self.event_tx.send_event(ExecutionEvent::execution_error("interrupted", None));
                Err(PestoError::Interrupted)
            }
        }
    }

    async fn execute_nodes(&self, nodes: Vec<&Node>) -> ExecutionResult {
        let started = Instant::now();
        let steps: Vec<&Node> = nodes.into_iter().filter(|node| !node.is_root()).collect();

        info!(nodes = steps.len(), workers = self.config.workers, "pipeline started");
        self.event_tx
            .send_event(ExecutionEvent::pipeline_started(steps.len()));

        let mut results = Vec::with_capacity(steps.len());
        for node in steps {
            let result = self.execute_node(node).await;
            if result.status == NodeStatus::Failed {
                error!(
                    node = %node.name,
                    failed = result.count(|state| !state.is_success()),
                    "node finished with failures"
                );
            }
            results.push(result);
        }

        let success = results.iter().all(|r| r.status == NodeStatus::Succeeded);
        let duration = started.elapsed();
        info!(success, ?duration, "pipeline finished");
        self.event_tx
            .send_event(ExecutionEvent::pipeline_completed(success, duration));

        ExecutionResult {
            nodes: results,
            duration,
            success,
        }
    }

    /// Run every pending scope value of `node` on a pool of
    /// `effective_workers` slots and checkpoint after each one
    pub async fn execute_node(&self, node: &Node) -> NodeResult {
        let started = Instant::now();
        let values = node.values();
        let workers = effective_workers(self.config.workers, node.workers_modifier);
        let record = self.load_record(node);

        info!(node = %node.name, values = values.len(), workers, "node started");
        self.event_tx.send_event(ExecutionEvent::node_started(
            &node.name,
            &node.description,
            values.len(),
            workers,
        ));

        let mut tasks = Vec::with_capacity(values.len());
        let mut pending = Vec::new();
        for value in values {
            if !self.config.force && record.succeeded(value) {
                debug!(node = %node.name, %value, "already succeeded, skipping");
                self.event_tx
                    .send_event(ExecutionEvent::task_skipped(&node.name, value));
                tasks.push(TaskResult {
                    value: value.clone(),
                    state: TaskState::Skipped,
                    command: None,
                    duration: Duration::ZERO,
                });
            } else {
                pending.push(value.as_str());
            }
        }

        let checkpoint = Mutex::new(NodeCheckpoint {
            record,
            completed: tasks.len(),
            failed: 0,
            total: values.len(),
        });
        // No more slots than tasks waiting for one
        let semaphore = Semaphore::new(workers.min(pending.len().max(1)));
        let mut futs = FuturesUnordered::new();

        for value in pending {
            let checkpoint = &checkpoint;
            let semaphore = &semaphore;
            futs.push(async move {
                // The semaphore is owned by this call and never closed
                let _permit = semaphore.acquire().await.ok();
                let result = self.run_task(node, value).await;
                self.checkpoint(node, &result, checkpoint).await;
                result
            });
        }

        while let Some(result) = futs.next().await {
            tasks.push(result);
        }
        drop(futs);

        tasks.sort_by(|a, b| a.value.cmp(&b.value));
        let status = if tasks.iter().all(|t| t.state.is_success()) {
            NodeStatus::Succeeded
        } else {
            NodeStatus::Failed
        };
        let duration = started.elapsed();

        info!(node = %node.name, ?status, ?duration, "node finished");
        self.event_tx
            .send_event(ExecutionEvent::node_completed(&node.name, status, duration));

        NodeResult {
            name: node.name.clone(),
            status,
            tasks,
            duration,
        }
    }

    fn load_record(&self, node: &Node) -> ExecutionRecord {
        match self.store.load(&node.name) {
            Ok(record) => record,
            Err(e) => {
                warn!(node = %node.name, error = %e, "ignoring unreadable record");
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!("ignoring unreadable record: {}", e),
                    Some(node.name.clone()),
                ));
                ExecutionRecord::new()
            }
        }
    }

    /// Update the record, persist it and report progress as one critical section
    async fn checkpoint(&self, node: &Node, result: &TaskResult, checkpoint: &Mutex<NodeCheckpoint>) {
        let mut guard = checkpoint.lock().await;
        let state = &mut *guard;

        state.record.set(&result.value, result.state.code());
        state.completed += 1;
        if !result.state.is_success() {
            state.failed += 1;
        }

        if let Err(e) = self.store.save(&node.name, &state.record) {
            error!(node = %node.name, error = %e, "failed to persist record");
            self.event_tx.send_event(ExecutionEvent::log(
                LogLevel::Error,
                format!("failed to persist record: {}", e),
                Some(node.name.clone()),
            ));
        }

        self.event_tx.send_event(ExecutionEvent::TaskCompleted {
            node_name: node.name.clone(),
            value: result.value.clone(),
            state: result.state.clone(),
            command: result.command.clone(),
            completed: state.completed,
            failed: state.failed,
            total: state.total,
        });
    }

    /// Resolve and run the command of `node` for one scope value
    async fn run_task(&self, node: &Node, value: &str) -> TaskResult {
        let started = Instant::now();

        let argv = match self.evaluator.resolve_command(&node.command, Some(value)) {
            Ok(argv) => argv,
            Err(e) => {
                error!(node = %node.name, %value, error = %e, "unable to build command");
                return TaskResult {
                    value: value.to_string(),
                    state: TaskState::Failed(FailureKind::Evaluation(e.to_string())),
                    command: None,
                    duration: started.elapsed(),
                };
            }
        };

        let command_line = argv.join(" ");
        debug!(node = %node.name, %value, command = %command_line, "running");

        let state = match self
            .runner
            .run(&argv, self.config.working_dir.as_deref())
            .await
        {
            Err(e) => {
                error!(node = %node.name, %value, command = %command_line, error = %e, "launch failed");
                TaskState::Failed(match e {
                    LaunchError::NotFound { .. } => FailureKind::CommandNotFound,
                    LaunchError::PermissionDenied { .. } => FailureKind::PermissionDenied,
                    other => FailureKind::Launch(other.to_string()),
                })
            }
            Ok(output) => {
                let exit_code = output.exit_code;
                let success = output.success();
                match String::from_utf8(output.output) {
                    Err(_) => {
                        error!(node = %node.name, %value, command = %command_line, "output is not valid UTF-8");
                        TaskState::Failed(FailureKind::OutputDecode)
                    }
                    Ok(text) if success => {
                        info!(node = %node.name, %value, command = %command_line, output = %text.trim_end(), "succeeded");
                        TaskState::Succeeded
                    }
                    Ok(text) => {
                        error!(
                            node = %node.name,
                            %value,
                            command = %command_line,
                            ?exit_code,
                            output = %text.trim_end(),
                            "failed"
                        );
                        TaskState::Failed(FailureKind::NonZeroExit(exit_code))
                    }
                }
            }
        };

        TaskResult {
            value: value.to_string(),
            state,
            command: Some(argv),
            duration: started.elapsed(),
        }
    }

    /// Resolve every command the run would execute, without running or recording anything
    pub fn plan(&self, start: Option<&str>) -> Result<Vec<PlannedNode>, GraphError> {
        let nodes = self.graph.walk(start)?;
        Ok(nodes
            .into_iter()
            .filter(|node| !node.is_root())
            .map(|node| {
                let record = self.store.load(&node.name).unwrap_or_default();
                let tasks = node
                    .values()
                    .iter()
                    .map(|value| PlannedTask {
                        value: value.clone(),
                        command: self.evaluator.resolve_command(&node.command, Some(value)),
                        skipped: !self.config.force && record.succeeded(value),
                    })
                    .collect();
                PlannedNode {
                    name: node.name.clone(),
                    description: node.description.clone(),
                    workers: effective_workers(self.config.workers, node.workers_modifier),
                    tasks,
                }
            })
            .collect())
    }
}

/// Resolves on the first interrupt; never resolves if the handler cannot be installed
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
