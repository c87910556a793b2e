use crate::output;

use std::io;
use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::Result;

use pesto_engine::execution::DEFAULT_STATE_DIR;
use pesto_engine::RecordStore;

/// Delete the execution records and the log file
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Directory holding the execution records
    #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,
}

pub fn execute(args: CleanArgs) -> Result<i32> {
    clean(&args.state_dir, Path::new(crate::LOG_FILE))?;
    Ok(0)
}

fn clean(state_dir: &Path, log_file: &Path) -> Result<()> {
    if RecordStore::new(state_dir).clean()? {
        output::status("Removed", &state_dir.display().to_string());
    }

    match std::fs::remove_file(log_file) {
        Ok(()) => output::status("Removed", &log_file.display().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pesto_engine::ExecutionRecord;
    use tempfile::TempDir;

    #[test]
    fn test_clean_removes_state_and_log() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join(".pesto");
        let log_file = dir.path().join("pesto.log");
        RecordStore::new(&state_dir)
            .save("step", &ExecutionRecord::new())
            .unwrap();
        std::fs::write(&log_file, "log").unwrap();

        clean(&state_dir, &log_file).unwrap();
        assert!(!state_dir.exists());
        assert!(!log_file.exists());

        // Nothing left to remove
        clean(&state_dir, &log_file).unwrap();
    }
}
