// Execution Graph (DAG) Builder
// Builds the step dependency graph, rejects cycles, reduces redundant edges and walks it in order

use crate::config::{PipelineLoader, StepDefinition, StepSpec};
use crate::scope::{ResolvedScope, ScopeCatalog};
use crate::template::Evaluator;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Name of the implicit node every pipeline starts from
pub const ROOT_NODE: &str = "__root__";

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Offending pair of nodes, when the error is about an edge
    pub nodes: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to unknown step
    UnknownDependency,
    /// Two steps share a name
    DuplicateNode,
    /// A step runs over an undeclared scope
    UnknownScope,
    /// Walk requested from a step that does not exist
    UnknownNode,
    /// A `__FILE__` include could not be expanded
    IncludeError,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    fn new(kind: GraphErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            nodes: None,
        }
    }

    pub fn cyclic(message: impl Into<String>, from: &str, to: &str) -> Self {
        Self {
            nodes: Some((from.to_string(), to.to_string())),
            ..Self::new(GraphErrorKind::CyclicDependency, message)
        }
    }

    pub fn unknown_dependency(message: impl Into<String>, from: &str, to: &str) -> Self {
        Self {
            nodes: Some((from.to_string(), to.to_string())),
            ..Self::new(GraphErrorKind::UnknownDependency, message)
        }
    }

    pub fn duplicate_node(name: &str) -> Self {
        Self::new(
            GraphErrorKind::DuplicateNode,
            format!("step name '{}' is used more than once", name),
        )
    }

    pub fn unknown_scope(step: &str, scope: &str) -> Self {
        Self::new(
            GraphErrorKind::UnknownScope,
            format!("step '{}' runs over undeclared scope '{}'", step, scope),
        )
    }

    pub fn unknown_node(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::UnknownNode, message)
    }

    pub fn include(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::IncludeError, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The implicit ancestor of every step
    Root,
    /// A step with a command to run
    Step,
}

/// A node of the pipeline graph
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub description: String,
    /// Scope the command runs over (`None` for the root)
    pub scope: Option<Arc<ResolvedScope>>,
    /// Command template, one entry per argument
    pub command: Vec<String>,
    /// Parents as written (or defaulted) in the step document
    pub declared_parents: Vec<String>,
    pub workers_modifier: f64,
    /// Parents after transitive reduction
    pub parents: BTreeSet<String>,
    /// Children after transitive reduction
    pub children: BTreeSet<String>,
    /// Position in the expanded step sequence (root is 0)
    pub position: usize,
}

impl Node {
    fn root() -> Self {
        Self {
            name: ROOT_NODE.to_string(),
            kind: NodeKind::Root,
            description: String::new(),
            scope: None,
            command: Vec::new(),
            declared_parents: Vec::new(),
            workers_modifier: 1.0,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            position: 0,
        }
    }

    fn step(
        definition: StepDefinition,
        scope: Arc<ResolvedScope>,
        parents: Vec<String>,
        position: usize,
    ) -> Self {
        Self {
            name: definition.name,
            kind: NodeKind::Step,
            description: definition.description,
            scope: Some(scope),
            command: definition.command,
            declared_parents: parents,
            workers_modifier: definition.workers_modifier,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            position,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    /// Scope values this node runs over
    pub fn values(&self) -> &[String] {
        self.scope.as_deref().map_or(&[], |scope| scope.values.as_slice())
    }
}

/// Dependency graph of the pipeline steps
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: HashMap<String, Node>,
    /// Node names in declaration order, root first
    order: Vec<String>,
}

impl PipelineGraph {
    /// Build the graph from step specs, expanding `__FILE__` includes in place.
    ///
    /// A step without `__DEPENDENCIES__` depends on the step declared before
    /// it, or on the root when it is first. Cycles are not checked here.
    pub fn build(
        specs: Vec<StepSpec>,
        catalog: &ScopeCatalog,
        evaluator: &Evaluator<'_>,
    ) -> Result<Self, GraphError> {
        let mut definitions = Vec::new();
        expand_includes(specs, evaluator, &mut Vec::new(), &mut definitions)?;

        let mut nodes = HashMap::new();
        let mut order = vec![ROOT_NODE.to_string()];
        nodes.insert(ROOT_NODE.to_string(), Node::root());

        let mut previous = ROOT_NODE.to_string();
        for (i, definition) in definitions.into_iter().enumerate() {
            if nodes.contains_key(&definition.name) {
                return Err(GraphError::duplicate_node(&definition.name));
            }

            let scope = catalog
                .scope(&definition.scope)
                .cloned()
                .ok_or_else(|| GraphError::unknown_scope(&definition.name, &definition.scope))?;

            let parents = match &definition.dependencies {
                None => vec![previous.clone()],
                Some(deps) => {
                    let deps = deps.as_vec();
                    if deps.is_empty() {
                        vec![ROOT_NODE.to_string()]
                    } else {
                        deps
                    }
                }
            };

            previous = definition.name.clone();
            order.push(definition.name.clone());
            nodes.insert(
                definition.name.clone(),
                Node::step(definition, scope, parents, i + 1),
            );
        }

        // Validate that all dependencies exist, then link both directions
        let mut edges = Vec::new();
        for name in &order {
            let node = &nodes[name];
            for parent in &node.declared_parents {
                if !nodes.contains_key(parent) {
                    return Err(GraphError::unknown_dependency(
                        format!("step '{}' depends on unknown step '{}'", name, parent),
                        name,
                        parent,
                    ));
                }
                edges.push((parent.clone(), name.clone()));
            }
        }

        for (parent, child) in edges {
            if let Some(node) = nodes.get_mut(&child) {
                node.parents.insert(parent.clone());
            }
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.insert(child);
            }
        }

        debug!(nodes = order.len() - 1, "built pipeline graph");
        Ok(Self { nodes, order })
    }

    /// Detect cycles in step dependencies using DFS
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for name in &self.order {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack) {
                    let (from, to) = match cycle.as_slice() {
                        [.., from, to] => (from.clone(), to.clone()),
                        _ => (name.clone(), name.clone()),
                    };
                    return Err(GraphError::cyclic(
                        format!("circular dependency detected: {}", cycle.join(" -> ")),
                        &from,
                        &to,
                    ));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(name);
        rec_stack.insert(name);

        if let Some(node) = self.nodes.get(name) {
            for dep in &node.parents {
                if rec_stack.contains(dep.as_str()) {
                    return Some(vec![name.to_string(), dep.clone()]);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(mut cycle) = self.dfs_cycle(dep, visited, rec_stack) {
                        cycle.insert(0, name.to_string());
                        return Some(cycle);
                    }
                }
            }
        }

        rec_stack.remove(name);
        None
    }

    /// Remove every edge implied by a longer chain.
    ///
    /// An edge `p -> c` goes when `c` is reachable from `p` through another
    /// child of `p`; the descendant set of every node is unchanged.
    pub fn transitive_reduce(&mut self) -> Result<(), GraphError> {
        self.detect_cycles()?;

        let descendants = self.descendant_sets();
        let mut redundant = Vec::new();

        for name in &self.order {
            let node = &self.nodes[name];
            for child in &node.children {
                let implied = node.children.iter().any(|other| {
                    other != child
                        && descendants
                            .get(other.as_str())
                            .is_some_and(|set| set.contains(child.as_str()))
                });
                if implied {
                    redundant.push((name.clone(), child.clone()));
                }
            }
        }

        for (parent, child) in redundant {
            debug!(%parent, %child, "removing redundant dependency");
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.children.remove(&child);
            }
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parents.remove(&parent);
            }
        }

        Ok(())
    }

    /// Strict descendants of every node
    fn descendant_sets(&self) -> HashMap<&str, HashSet<&str>> {
        let mut sets: HashMap<&str, HashSet<&str>> = HashMap::new();
        for name in &self.order {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = self.nodes[name].children.iter().map(String::as_str).collect();
            while let Some(current) = stack.pop() {
                if seen.insert(current) {
                    if let Some(node) = self.nodes.get(current) {
                        stack.extend(node.children.iter().map(String::as_str));
                    }
                }
            }
            sets.insert(name.as_str(), seen);
        }
        sets
    }

    /// Nodes reachable from `start` (the root when `None`), inclusive, in
    /// topological order. Ties are broken by declaration order.
    pub fn walk(&self, start: Option<&str>) -> Result<Vec<&Node>, GraphError> {
        let start = start.unwrap_or(ROOT_NODE);
        if !self.nodes.contains_key(start) {
            return Err(GraphError::unknown_node(format!(
                "unknown step '{}', known steps are: {}",
                start,
                self.step_names().collect::<Vec<_>>().join(", ")
            )));
        }

        // Collect the descendants of start with an explicit worklist
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut pending = vec![start];
        while let Some(name) = pending.pop() {
            if reachable.insert(name) {
                pending.extend(self.nodes[name].children.iter().map(String::as_str));
            }
        }

        // Kahn's algorithm restricted to the reachable set
        let mut in_degree: HashMap<&str, usize> = reachable
            .iter()
            .map(|&name| {
                let degree = self.nodes[name]
                    .parents
                    .iter()
                    .filter(|p| reachable.contains(p.as_str()))
                    .count();
                (name, degree)
            })
            .collect();

        let mut ready: BTreeMap<usize, &str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&name, _)| (self.nodes[name].position, name))
            .collect();

        let mut result = Vec::with_capacity(reachable.len());
        while let Some((_, name)) = ready.pop_first() {
            let node = &self.nodes[name];
            result.push(node);

            for child in &node.children {
                if let Some(deg) = in_degree.get_mut(child.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(self.nodes[child].position, child.as_str());
                    }
                }
            }
        }

        if result.len() != reachable.len() {
            self.detect_cycles()?;
            return Err(GraphError::cyclic(
                format!("steps reachable from '{}' cannot be ordered", start),
                start,
                start,
            ));
        }

        Ok(result)
    }

    /// Get a node by name
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn root(&self) -> &Node {
        &self.nodes[ROOT_NODE]
    }

    /// Step names in declaration order (root excluded)
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().skip(1).map(String::as_str)
    }

    /// Number of steps (root excluded)
    pub fn len(&self) -> usize {
        self.order.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replace include specs by the steps of the included file, recursively
fn expand_includes(
    specs: Vec<StepSpec>,
    evaluator: &Evaluator<'_>,
    include_stack: &mut Vec<PathBuf>,
    out: &mut Vec<StepDefinition>,
) -> Result<(), GraphError> {
    for spec in specs {
        match spec {
            StepSpec::Step(definition) => out.push(definition),
            StepSpec::Include { path, base_dir } => {
                let resolved = evaluator.resolve(&path, None).map_err(|e| {
                    GraphError::include(format!("unable to resolve include '{}': {}", path, e))
                })?;
                let file = base_dir.join(&resolved);
                let canonical = file.canonicalize().map_err(|e| {
                    GraphError::include(format!("unable to read {}: {}", file.display(), e))
                })?;

                if include_stack.contains(&canonical) {
                    return Err(GraphError::include(format!(
                        "{} includes itself through {}",
                        canonical.display(),
                        include_stack
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(" -> ")
                    )));
                }

                let nested = PipelineLoader::read_step_specs(&file)
                    .map_err(|e| GraphError::include(e.to_string().trim_end().to_string()))?;
                debug!(file = %file.display(), specs = nested.len(), "expanding include");

                include_stack.push(canonical);
                expand_includes(nested, evaluator, include_stack, out)?;
                include_stack.pop();
            }
        }
    }
    Ok(())
}
