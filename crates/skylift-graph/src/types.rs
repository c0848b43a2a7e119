//! Work node types and the deployment state machine.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skylift_core::artifact::{AssetManifestArtifact, StackArtifact};
use skylift_core::asset::AssetEntry;

/// Lifecycle of a single work node.
///
/// States only move forward: `Pending → Queued → Deploying → Completed`,
/// with `Failed` replacing `Completed` on error and `Skipped` as the
/// terminal state for nodes whose ancestry failed. A node never revisits an
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentState {
    /// Created; dependencies not yet satisfied.
    Pending,
    /// All dependencies completed; waiting for executor capacity.
    Queued,
    /// Currently being worked on.
    Deploying,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never started because a dependency failed or was skipped.
    Skipped,
}

impl DeploymentState {
    /// Whether the node has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Completed | DeploymentState::Failed | DeploymentState::Skipped
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Queued => "queued",
            DeploymentState::Deploying => "deploying",
            DeploymentState::Completed => "completed",
            DeploymentState::Failed => "failed",
            DeploymentState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// The kind of work a node represents, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkKind {
    Stack,
    AssetBuild,
    AssetPublish,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkKind::Stack => "stack",
            WorkKind::AssetBuild => "asset-build",
            WorkKind::AssetPublish => "asset-publish",
        };
        f.write_str(s)
    }
}

/// Payload of an asset build or publish node.
#[derive(Debug, Clone)]
pub struct AssetWork {
    pub asset: AssetEntry,
    pub manifest_artifact: Arc<AssetManifestArtifact>,
    /// The stack that owns the asset (and will depend on its publish node).
    pub parent_stack: Arc<StackArtifact>,
}

/// The type-specific payload of a work node; opaque to the graph itself.
#[derive(Debug, Clone)]
pub enum WorkPayload {
    Stack { stack: Arc<StackArtifact> },
    AssetBuild(AssetWork),
    AssetPublish(AssetWork),
}

impl WorkPayload {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkPayload::Stack { .. } => WorkKind::Stack,
            WorkPayload::AssetBuild(_) => WorkKind::AssetBuild,
            WorkPayload::AssetPublish(_) => WorkKind::AssetPublish,
        }
    }
}

/// One unit of schedulable work.
#[derive(Debug, Clone)]
pub struct WorkNode {
    /// Unique key within one graph.
    pub id: String,
    pub payload: WorkPayload,
    /// Ids of nodes that must complete before this one may start.
    pub dependencies: BTreeSet<String>,
    pub state: DeploymentState,
    /// Tie-breaker among simultaneously-ready nodes; higher runs first.
    pub priority: i32,
}

impl WorkNode {
    /// Create a node in `Pending` state.
    pub fn new(
        id: impl Into<String>,
        payload: WorkPayload,
        dependencies: BTreeSet<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            dependencies,
            state: DeploymentState::Pending,
            priority,
        }
    }

    pub fn kind(&self) -> WorkKind {
        self.payload.kind()
    }
}
