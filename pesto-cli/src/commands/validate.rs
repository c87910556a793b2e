use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pesto_engine::{PestoError, Pipeline};

/// Check a pipeline without running it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pipeline files; the first document of the first file holds the configuration
    #[arg(required = true, value_name = "CONFIG")]
    pub configs: Vec<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<i32> {
    for path in &args.configs {
        output::status("Validating", &path.display().to_string());
    }

    let pipeline = Pipeline::load(&args.configs)?;
    output::check(&format!(
        "Root {} ({} files)",
        pipeline.configuration().root().display(),
        pipeline.catalog().files().len()
    ));

    for scope in pipeline.catalog().scopes() {
        let message = format!(
            "Scope {} = r'{}': {} values",
            scope.name,
            scope.pattern,
            scope.values.len()
        );
        if scope.values.is_empty() {
            output::warning(&message);
        } else {
            output::check(&message);
        }
    }

    for node in pipeline.graph().walk(None).map_err(PestoError::from)? {
        if node.is_root() {
            continue;
        }
        let parents: Vec<&str> = node.parents.iter().map(String::as_str).collect();
        output::check(&format!(
            "Step {} over {} after {}",
            node.name,
            node.scope.as_ref().map_or("-", |scope| scope.name.as_str()),
            parents.join(", ")
        ));
    }

    println!();
    output::success("Pipeline is valid");

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pipeline(dir: &TempDir, steps: &str) -> PathBuf {
        std::fs::create_dir_all(dir.path().join("data/s1")).unwrap();
        std::fs::write(dir.path().join("data/s1/f"), "").unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(
            &path,
            format!("__ROOT__: data\n__SCOPES__:\n  SUBJECT: 's\\d'\n{}", steps),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_valid_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = write_pipeline(
            &dir,
            "---\n__NAME__: a\n__DESCRIPTION__: d\n__SCOPE__: SUBJECT\n__CMD__: [echo]\n",
        );
        assert_eq!(execute(ValidateArgs { configs: vec![path] }).unwrap(), 0);
    }

    #[test]
    fn test_undeclared_scope() {
        let dir = TempDir::new().unwrap();
        let path = write_pipeline(
            &dir,
            "---\n__NAME__: a\n__DESCRIPTION__: d\n__SCOPE__: OTHER\n__CMD__: [echo]\n",
        );
        let err = execute(ValidateArgs { configs: vec![path] }).unwrap_err();
        assert!(matches!(err.downcast_ref::<PestoError>(), Some(PestoError::Graph(_))));
    }
}
