//! Work graph error types.

use thiserror::Error;

/// Result type alias for work graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building or executing a work graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate use of node id: {0}")]
    DuplicateNode(String),

    #[error("unknown node id: {0}")]
    UnknownNode(String),

    #[error("asset manifest {0} is not associated with any stack")]
    OrphanedAssetManifest(String),

    #[error(
        "unable to make progress: dependency cycle between remaining work items: {}",
        .cycle.join(" -> ")
    )]
    NoProgress { cycle: Vec<String> },

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}
