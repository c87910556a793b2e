// Process Runner
// Spawns commands directly (no shell) and captures their combined output

use crate::runners::{CommandOutput, CommandRunner, LaunchError};

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runner for external programs
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Locate a bare program name on `PATH`; explicit paths are used as given
    fn resolve_program(program: &str) -> Result<PathBuf, LaunchError> {
        resolve_in(program, std::env::var_os("PATH").as_deref())
    }
}

/// Search `path` for `program`. A match that exists but cannot be executed is
/// reported as permission denied rather than not found.
fn resolve_in(program: &str, path: Option<&OsStr>) -> Result<PathBuf, LaunchError> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    which::which_in(program, path, ".").map_err(|_| {
        let present = path
            .into_iter()
            .flat_map(std::env::split_paths)
            .any(|dir| dir.join(program).is_file());
        if present {
            LaunchError::PermissionDenied {
                program: program.to_string(),
            }
        } else {
            LaunchError::NotFound {
                program: program.to_string(),
            }
        }
    })
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buffer).await {
            warn!(error = %e, read = buffer.len(), "output truncated");
        }
    }
    buffer
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, LaunchError> {
        let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;
        let executable = Self::resolve_program(program)?;

        let mut cmd = Command::new(&executable);
        cmd.args(args);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program, e))?;
        debug!(program = %executable.display(), pid = ?child.id(), "spawned");

        // Read output streams concurrently
        let stdout_handle = tokio::spawn(drain(child.stdout.take()));
        let stderr_handle = tokio::spawn(drain(child.stderr.take()));

        let status = child.wait().await.map_err(|source| LaunchError::Io {
            program: program.clone(),
            source,
        })?;

        let mut output = stdout_handle.await.unwrap_or_default();
        output.extend(stderr_handle.await.unwrap_or_default());

        Ok(CommandOutput {
            exit_code: status.code(),
            output,
        })
    }
}
