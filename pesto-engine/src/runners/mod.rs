// Runners Module
// Launches the resolved command of one task as an external process

pub mod process;

// Re-export key types
pub use process::ProcessRunner;

use std::io;
use std::path::Path;
use thiserror::Error;

/// Exit status and captured output of a finished process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code (`None` when terminated by a signal)
    pub exit_code: Option<i32>,
    /// Standard output followed by standard error
    pub output: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The process could not be started
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("{program}: permission denied")]
    PermissionDenied { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub(crate) fn from_spawn(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
                program: program.to_string(),
            },
            _ => LaunchError::Io {
                program: program.to_string(),
                source,
            },
        }
    }
}

/// Trait for command runners
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining arguments and wait for it to exit
    async fn run(
        &self,
        argv: &[String],
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput, LaunchError>;
}
