// Engine Errors
// Top-level error type returned by pipeline loading and execution

use crate::config::ConfigError;
use crate::execution::graph::GraphError;
use crate::execution::record::RecordError;
use crate::scope::ScopeError;

use thiserror::Error;

pub type PestoResult<T> = Result<T, PestoError>;

#[derive(Debug, Error)]
pub enum PestoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("interrupted")]
    Interrupted,
}
