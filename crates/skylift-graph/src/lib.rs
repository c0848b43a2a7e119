//! skylift-graph — deployment work scheduling.
//!
//! Translates the artifacts of a synthesized cloud assembly (stacks, asset
//! manifests, nested assemblies) into a flat graph of schedulable work and
//! drives that work concurrently while honoring dependencies.
//!
//! # Architecture
//!
//! ```text
//! WorkGraphBuilder
//!   └── build(artifacts) ──► WorkGraph
//!                              ├── WorkNode (stack | asset-build | asset-publish)
//!                              ├── ready-pool refresh (priority + skip propagation)
//!                              └── execute(concurrency, DeploymentActions)
//! ```
//!
//! The graph itself runs nothing; `execute` dispatches ready nodes onto
//! tokio tasks and records completions/failures back into node state.

pub mod builder;
pub mod error;
pub mod execute;
pub mod graph;
pub mod types;

pub use builder::WorkGraphBuilder;
pub use error::{GraphError, GraphResult};
pub use execute::DeploymentActions;
pub use graph::WorkGraph;
pub use types::{AssetWork, DeploymentState, WorkKind, WorkNode, WorkPayload};
