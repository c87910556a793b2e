// Pipeline
// Loads configuration files into a resolved, reduced and ready-to-run graph

use crate::config::{Configuration, PipelineLoader};
use crate::error::PestoResult;
use crate::execution::executor::{ExecutorConfig, PipelineExecutor};
use crate::execution::graph::PipelineGraph;
use crate::scope::ScopeCatalog;
use crate::template::Evaluator;

use std::path::Path;
use tracing::{debug, info};

/// A loaded pipeline: configuration, scope values and step graph
#[derive(Debug)]
pub struct Pipeline {
    configuration: Configuration,
    catalog: ScopeCatalog,
    graph: PipelineGraph,
}

impl Pipeline {
    /// Load `paths` in order, scan the root and build the reduced graph.
    ///
    /// Cycles are rejected here, before anything runs.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> PestoResult<Self> {
        let document = PipelineLoader::load(paths)?;
        let configuration = document.configuration;

        let catalog = ScopeCatalog::build(&configuration)?;
        info!(
            root = %configuration.root().display(),
            files = catalog.files().len(),
            scopes = configuration.scopes().len(),
            "scopes resolved"
        );

        let evaluator = Evaluator::with_catalog(&configuration, &catalog);
        let mut graph = PipelineGraph::build(document.steps, &catalog, &evaluator)?;
        graph.detect_cycles()?;
        graph.transitive_reduce()?;
        debug!(steps = graph.len(), "graph reduced");

        Ok(Self {
            configuration,
            catalog,
            graph,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn catalog(&self) -> &ScopeCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Evaluator with dynamic placeholder support over the scanned files
    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::with_catalog(&self.configuration, &self.catalog)
    }

    pub fn executor(&self, config: ExecutorConfig) -> PipelineExecutor<'_> {
        PipelineExecutor::new(&self.graph, self.evaluator()).with_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PestoError;
    use crate::execution::graph::GraphErrorKind;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in ["data/s1/a.txt", "data/s2/a.txt"] {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        dir
    }

    #[test]
    fn test_load_single_file() {
        let dir = fixture();
        let path = write(
            &dir,
            "pipeline.yaml",
            r#"
__ROOT__: data
__SCOPES__:
  SUBJECT: 's\d/'
---
__NAME__: first
__DESCRIPTION__: d
__SCOPE__: SUBJECT
__CMD__: [true]
---
__NAME__: second
__DESCRIPTION__: d
__SCOPE__: SUBJECT
__CMD__: [true]
"#,
        );

        let pipeline = Pipeline::load(&[path]).unwrap();
        assert_eq!(pipeline.catalog().scope("SUBJECT").unwrap().values, vec!["s1/", "s2/"]);
        let names: Vec<_> = pipeline
            .graph()
            .walk(None)
            .unwrap()
            .into_iter()
            .filter(|n| !n.is_root())
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_steps_across_files() {
        let dir = fixture();
        let config = write(
            &dir,
            "config.yaml",
            "__ROOT__: data\n__SCOPES__:\n  SUBJECT: 's\\d/'\n",
        );
        let steps = write(
            &dir,
            "steps.yaml",
            "__NAME__: only\n__DESCRIPTION__: d\n__SCOPE__: SUBJECT\n__CMD__: [true]\n",
        );

        let pipeline = Pipeline::load(&[config, steps]).unwrap();
        assert!(pipeline.graph().get("only").is_some());
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let dir = fixture();
        let path = write(
            &dir,
            "pipeline.yaml",
            r#"
__ROOT__: data
__SCOPES__:
  SUBJECT: 's\d/'
---
__NAME__: a
__DESCRIPTION__: d
__SCOPE__: SUBJECT
__CMD__: [true]
__DEPENDENCIES__: b
---
__NAME__: b
__DESCRIPTION__: d
__SCOPE__: SUBJECT
__CMD__: [true]
__DEPENDENCIES__: a
"#,
        );

        match Pipeline::load(&[path]) {
            Err(PestoError::Graph(e)) => assert_eq!(e.kind, GraphErrorKind::CyclicDependency),
            other => panic!("expected a cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let dir = fixture();
        let path = write(&dir, "pipeline.yaml", "__ROOT__: nowhere\n");
        assert!(matches!(Pipeline::load(&[path]), Err(PestoError::Config(_))));
    }
}
