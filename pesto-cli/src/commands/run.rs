use crate::output;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use tracing::info;

use pesto_engine::execution::events::{progress_channel, LogLevel, ProgressReceiver};
use pesto_engine::execution::{NodeStatus, PipelineExecutor, DEFAULT_STATE_DIR};
use pesto_engine::{ExecutionEvent, ExecutorConfig, PestoError, Pipeline};

/// Run a pipeline, skipping scope values that already succeeded
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline files; the first document of the first file holds the configuration
    #[arg(required = true, value_name = "CONFIG")]
    pub configs: Vec<PathBuf>,

    /// Start from this step instead of the beginning
    #[arg(long, value_name = "STEP")]
    pub from: Option<String>,

    /// Worker budget per step (0 = one per CPU)
    #[arg(long, short = 'w', default_value_t = 0)]
    pub workers: usize,

    /// Rerun scope values that already succeeded
    #[arg(long)]
    pub force: bool,

    /// Print the resolved commands without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Directory holding the execution records
    #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Directory the step commands run in (defaults to the current one)
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<i32> {
    let names: Vec<String> = args
        .configs
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    output::status("Loading", &names.join(", "));

    let pipeline = Pipeline::load(&args.configs)?;
    output::info(&format!(
        "{} files under {}, {} steps",
        pipeline.catalog().files().len(),
        pipeline.configuration().root().display(),
        pipeline.graph().step_names().count()
    ));

    let mut config = ExecutorConfig::default()
        .with_workers(args.workers)
        .with_force(args.force)
        .with_state_dir(&args.state_dir);
    if let Some(dir) = &args.workdir {
        config = config.with_working_dir(dir);
    }
    info!(
        configs = ?args.configs,
        workers = config.workers,
        force = config.force,
        dry_run = args.dry_run,
        "run requested"
    );
    let executor = pipeline.executor(config);
    let start = args.from.as_deref();

    if args.dry_run {
        return dry_run(&executor, start);
    }

    let (tx, rx) = progress_channel();
    let executor = executor.with_progress(tx);

    // The executor owns the sender; dropping it with the future ends the renderer
    let (result, ()) = tokio::join!(async move { executor.run(start).await }, render(rx));
    let result = result?;

    println!();
    if result.success {
        output::success(&format!(
            "Pipeline succeeded in {:.1}s",
            result.duration.as_secs_f64()
        ));
        Ok(0)
    } else {
        for node in result.failed_nodes() {
            let values: Vec<&str> = node.failed_values().map(|t| t.value.as_str()).collect();
            output::failure(&format!("{}: {}", node.name, values.join(", ")));
        }
        output::error("pipeline finished with failures, rerun to retry them");
        Ok(1)
    }
}

fn dry_run(executor: &PipelineExecutor<'_>, start: Option<&str>) -> Result<i32> {
    let plan = executor.plan(start).map_err(PestoError::from)?;
    let mut unresolved = 0;

    for node in &plan {
        println!();
        output::header(&format!(
            "{}: {} ({} values, {} workers)",
            node.name,
            node.description,
            node.tasks.len(),
            node.workers
        ));
        for task in &node.tasks {
            match &task.command {
                Ok(argv) if task.skipped => {
                    output::dim(&format!("  {} (done) $ {}", task.value, argv.join(" ")))
                }
                Ok(argv) => {
                    output::info(&task.value);
                    output::command_line(argv);
                }
                Err(e) => {
                    unresolved += 1;
                    output::failure(&format!("{}: {}", task.value, e));
                }
            }
        }
    }

    if unresolved > 0 {
        output::warning(&format!("{} commands could not be resolved", unresolved));
    }
    Ok(0)
}

async fn render(mut rx: ProgressReceiver) {
    let mut skipped: HashMap<String, usize> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::PipelineStarted { total_nodes } => {
                output::header(&format!("Running {} steps", total_nodes));
            }

            ExecutionEvent::NodeStarted {
                node_name,
                description,
                total_values,
                workers,
            } => {
                println!();
                output::status(
                    "Running",
                    &format!(
                        "{}: {} ({} values, {} workers)",
                        node_name, description, total_values, workers
                    ),
                );
            }

            ExecutionEvent::TaskSkipped { node_name, .. } => {
                *skipped.entry(node_name.clone()).or_default() += 1;
            }

            ExecutionEvent::TaskCompleted {
                node_name,
                value,
                state,
                command,
                completed,
                failed,
                total,
            } => {
                if !state.is_success() {
                    let detail = match state {
                        pesto_engine::TaskState::Failed(kind) => kind.to_string(),
                        _ => String::new(),
                    };
                    output::failure(&format!("{}: {}", value, detail));
                    if let Some(argv) = command {
                        output::dim(&format!("        $ {}", argv.join(" ")));
                    }
                }
                output::progress(node_name, *completed, *failed, *total);
            }

            ExecutionEvent::NodeCompleted {
                node_name,
                status,
                duration,
            } => {
                if let Some(count) = skipped.remove(node_name) {
                    output::dim(&format!("        {} values already done", count));
                }
                match status {
                    NodeStatus::Succeeded => output::success(&format!(
                        "{} ({:.1}s)",
                        node_name,
                        duration.as_secs_f64()
                    )),
                    NodeStatus::Failed => output::failure(&format!(
                        "{} ({:.1}s)",
                        node_name,
                        duration.as_secs_f64()
                    )),
                }
            }

            ExecutionEvent::Log { level, message, .. } => match level {
                LogLevel::Error => output::error(message),
                LogLevel::Warning => output::warning(message),
            },

            ExecutionEvent::Error { message, .. } => {
                output::error(message);
            }

            ExecutionEvent::PipelineCompleted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        for value in ["s1", "s2"] {
            let file = dir.path().join("data").join(value).join("f");
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, "").unwrap();
        }
        let config = dir.path().join("pipeline.yaml");
        std::fs::write(
            &config,
            "__ROOT__: data\nS: 's\\d'\n__SCOPES__:\n  SUBJECT: '${S}'\n---\n__NAME__: list\n__DESCRIPTION__: d\n__SCOPE__: SUBJECT\n__CMD__: [echo, '?{S}']\n",
        )
        .unwrap();
        (dir, config)
    }

    fn args(dir: &TempDir, config: PathBuf) -> RunArgs {
        RunArgs {
            configs: vec![config],
            from: None,
            workers: 2,
            force: false,
            dry_run: false,
            state_dir: dir.path().join(".pesto"),
            workdir: None,
        }
    }

    #[tokio::test]
    async fn test_run_succeeds() {
        let (dir, config) = fixture();
        let code = execute(args(&dir, config)).await.unwrap();
        assert_eq!(code, 0);
        assert!(dir.path().join(".pesto").join("list.yaml").exists());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_no_state() {
        let (dir, config) = fixture();
        let mut args = args(&dir, config);
        args.dry_run = true;
        assert_eq!(execute(args).await.unwrap(), 0);
        assert!(!dir.path().join(".pesto").exists());
    }

    #[tokio::test]
    async fn test_commands_run_in_workdir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data/s1")).unwrap();
        std::fs::write(dir.path().join("data/s1/f"), "").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let config = dir.path().join("pipeline.yaml");
        std::fs::write(
            &config,
            "__ROOT__: data\n__SCOPES__:\n  SUBJECT: 's\\d'\n---\n__NAME__: mark\n__DESCRIPTION__: d\n__SCOPE__: SUBJECT\n__CMD__: [touch, marker]\n",
        )
        .unwrap();

        let mut args = args(&dir, config);
        args.workdir = Some(out.clone());
        assert_eq!(execute(args).await.unwrap(), 0);
        assert!(out.join("marker").exists());
    }

    #[tokio::test]
    async fn test_unknown_start_is_an_error() {
        let (dir, config) = fixture();
        let mut args = args(&dir, config);
        args.from = Some("missing".to_string());
        assert!(execute(args).await.is_err());
    }
}
