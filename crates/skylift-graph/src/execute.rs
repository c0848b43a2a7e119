//! Concurrent execution of a work graph.
//!
//! The graph stays a passive data structure; this module owns the one loop
//! that mutates it during execution. Ready nodes are dispatched onto tokio
//! tasks up to the concurrency limit, completions and failures are recorded
//! back into node state, and failure propagates forward as skips. An action
//! error never tears through the loop before in-flight work has drained.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use skylift_core::artifact::StackArtifact;

use crate::error::{GraphError, GraphResult};
use crate::graph::WorkGraph;
use crate::types::{AssetWork, WorkPayload};

/// The side-effecting operations the executor drives, one per node kind.
///
/// Implementations perform the actual deployment work (create/update a
/// stack, build an asset, upload it). Errors are recorded as node state and
/// surfaced once, after the graph has drained.
#[async_trait]
pub trait DeploymentActions: Send + Sync {
    async fn deploy_stack(&self, stack: Arc<StackArtifact>) -> anyhow::Result<()>;
    async fn build_asset(&self, work: AssetWork) -> anyhow::Result<()>;
    async fn publish_asset(&self, work: AssetWork) -> anyhow::Result<()>;
}

impl WorkGraph {
    /// Run every node through `actions`, at most `concurrency` at a time.
    ///
    /// Dependencies gate dispatch; priority picks among simultaneously-ready
    /// nodes. After the first failure no new nodes start: in-flight work
    /// drains, everything not yet started ends `Skipped`, and the first
    /// error is returned. A graph that can neither dispatch nor finish is a
    /// dependency cycle and fails with [`GraphError::NoProgress`].
    pub async fn execute(
        &mut self,
        concurrency: usize,
        actions: Arc<dyn DeploymentActions>,
    ) -> GraphResult<()> {
        let concurrency = concurrency.max(1);
        let mut in_flight: JoinSet<(String, anyhow::Result<()>)> = JoinSet::new();
        let mut first_error: Option<anyhow::Error> = None;

        loop {
            if first_error.is_none() {
                for id in self.update_ready_pool() {
                    if in_flight.len() >= concurrency {
                        break;
                    }
                    let Some(node) = self.try_get_node(&id) else {
                        continue;
                    };
                    let payload = node.payload.clone();
                    self.mark_deploying(&id)?;
                    debug!(%id, "dispatching");
                    let actions = Arc::clone(&actions);
                    in_flight.spawn(async move {
                        let result = match payload {
                            WorkPayload::Stack { stack } => actions.deploy_stack(stack).await,
                            WorkPayload::AssetBuild(work) => actions.build_asset(work).await,
                            WorkPayload::AssetPublish(work) => actions.publish_asset(work).await,
                        };
                        (id, result)
                    });
                }
            }

            if in_flight.is_empty() {
                if first_error.is_some() || self.done() {
                    break;
                }
                let cycle = self
                    .find_cycle()
                    .unwrap_or_else(|| vec!["no cycle found".to_string()]);
                return Err(GraphError::NoProgress { cycle });
            }

            match in_flight.join_next().await {
                Some(Ok((id, Ok(())))) => {
                    info!(%id, "completed");
                    self.mark_completed(&id)?;
                }
                Some(Ok((id, Err(err)))) => {
                    error!(%id, error = %err, "failed");
                    self.mark_failed(&id)?;
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                // A panicking action is a programming error, not node state.
                Some(Err(join_err)) => {
                    return Err(GraphError::Execution(anyhow::Error::new(join_err)));
                }
                None => {}
            }
        }

        if let Some(err) = first_error {
            self.skip_remaining();
            return Err(GraphError::Execution(err));
        }
        Ok(())
    }
}
