//! WorkGraphBuilder — translates cloud artifacts into a work graph.
//!
//! Walks the artifact list of a synthesized assembly and emits one stack
//! node per stack, plus a content-deduplicated build node and a publish node
//! per asset manifest entry. Nested assemblies are built recursively under
//! an id prefix and absorbed into the parent graph.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use skylift_core::artifact::{AssetManifestArtifact, CloudArtifact, StackArtifact};
use skylift_core::asset::AssetEntry;
use skylift_core::content_hash::short_content_hash;

use crate::error::{GraphError, GraphResult};
use crate::graph::WorkGraph;
use crate::types::{AssetWork, WorkKind, WorkNode, WorkPayload};

/// Builds one flat [`WorkGraph`] from a forest of deployable artifacts.
pub struct WorkGraphBuilder {
    prebuild_assets: bool,
    id_prefix: String,
    graph: WorkGraph,
}

impl WorkGraphBuilder {
    /// Asset builds run before everything else so that prebuilding actually
    /// happens up front when the graph has the capacity for it; between
    /// stacks and publishes, stacks go first.
    pub const PRIORITY_ASSET_BUILD: i32 = 10;
    pub const PRIORITY_STACK: i32 = 5;
    pub const PRIORITY_ASSET_PUBLISH: i32 = 0;

    pub fn new(prebuild_assets: bool) -> Self {
        Self::with_prefix(prebuild_assets, String::new())
    }

    fn with_prefix(prebuild_assets: bool, id_prefix: String) -> Self {
        Self {
            prebuild_assets,
            id_prefix,
            graph: WorkGraph::new(),
        }
    }

    /// Consume the builder and produce the graph for `artifacts`.
    ///
    /// Fails fast on structural inconsistencies (an asset manifest no stack
    /// claims); there is no partial graph to recover in that case.
    pub fn build(mut self, artifacts: &[CloudArtifact]) -> GraphResult<WorkGraph> {
        let index: HashMap<&str, &CloudArtifact> = artifacts
            .iter()
            .map(|artifact| (artifact.id(), artifact))
            .collect();
        let parent_stacks = stacks_from_assets(artifacts, &index);

        for artifact in artifacts {
            match artifact {
                CloudArtifact::Stack(stack) => {
                    self.add_stack(stack, &index)?;
                }
                CloudArtifact::AssetManifest(manifest) => {
                    for entry in &manifest.manifest.entries {
                        let parent = parent_stacks.get(manifest.id.as_str()).ok_or_else(|| {
                            GraphError::OrphanedAssetManifest(manifest.id.clone())
                        })?;
                        self.add_asset(parent, manifest, entry, &index)?;
                    }
                }
                CloudArtifact::NestedAssembly(assembly) => {
                    let prefix = format!("{}{}.", self.id_prefix, assembly.id);
                    let nested = WorkGraphBuilder::with_prefix(self.prebuild_assets, prefix)
                        .build(&assembly.artifacts)?;
                    self.graph.absorb(nested)?;
                }
                CloudArtifact::Other { id } => {
                    debug!(%id, "ignoring unschedulable artifact");
                }
            }
        }

        self.graph.remove_unavailable_dependencies();
        // The cosmetic publish->stack edges added above may have closed a
        // cycle; undo exactly those.
        self.remove_stack_publish_cycles();

        Ok(self.graph)
    }

    fn add_stack(
        &mut self,
        stack: &Arc<StackArtifact>,
        index: &HashMap<&str, &CloudArtifact>,
    ) -> GraphResult<()> {
        let dependencies: BTreeSet<String> = self
            .stack_dependency_ids(&stack.dependencies, index)
            .into_iter()
            .collect();
        self.graph.add_nodes([WorkNode::new(
            format!("{}{}", self.id_prefix, stack.id),
            WorkPayload::Stack {
                stack: stack.clone(),
            },
            dependencies,
            Self::PRIORITY_STACK,
        )])
    }

    fn add_asset(
        &mut self,
        parent_stack: &Arc<StackArtifact>,
        manifest_artifact: &Arc<AssetManifestArtifact>,
        asset: &AssetEntry,
        index: &HashMap<&str, &CloudArtifact>,
    ) -> GraphResult<()> {
        let asset_id = &asset.asset_id;
        let build_id = format!(
            "build-{asset_id}-{}",
            short_content_hash(&(asset_id, &asset.source))
        );
        let publish_id = format!(
            "publish-{asset_id}-{}",
            short_content_hash(&(asset_id, &asset.destination))
        );

        // Identical build work shares one node, no matter how many stacks
        // reference the asset.
        if self.graph.try_get_node(&build_id).is_none() {
            let mut dependencies: BTreeSet<String> = self
                .stack_dependency_ids(&manifest_artifact.dependencies, index)
                .into_iter()
                .collect();
            if !self.prebuild_assets {
                // Without prebuilding, assets inherit the stack dependencies
                // of their parent: built no earlier than the stack could be
                // deployed.
                dependencies
                    .extend(self.stack_dependency_ids(&parent_stack.dependencies, index));
            }
            self.graph.add_nodes([WorkNode::new(
                build_id.clone(),
                WorkPayload::AssetBuild(AssetWork {
                    asset: asset.clone(),
                    manifest_artifact: manifest_artifact.clone(),
                    parent_stack: parent_stack.clone(),
                }),
                dependencies,
                Self::PRIORITY_ASSET_BUILD,
            )])?;
        }

        if self.graph.try_get_node(&publish_id).is_none() {
            self.graph.add_nodes([WorkNode::new(
                publish_id.clone(),
                WorkPayload::AssetPublish(AssetWork {
                    asset: asset.clone(),
                    manifest_artifact: manifest_artifact.clone(),
                    parent_stack: parent_stack.clone(),
                }),
                BTreeSet::from([build_id]),
                Self::PRIORITY_ASSET_PUBLISH,
            )])?;
        }

        // Publishing also waits for the stacks the parent depends on. This
        // is purely an ordering nicety so publish output does not interleave
        // with a dependency stack's own deployment; it can close a cycle
        // when one of those stacks transitively needs this very asset, which
        // the post-pass undoes.
        for inherited in self.stack_dependency_ids(&parent_stack.dependencies, index) {
            self.graph.add_dependency(&publish_id, &inherited);
        }

        // A stack never deploys before its own assets are published. The
        // stack node may not exist yet; the edge attaches when it does.
        self.graph.add_dependency(
            &format!("{}{}", self.id_prefix, parent_stack.id),
            &publish_id,
        );

        Ok(())
    }

    /// Prefixed node ids for the dependencies of `dependency_ids` that are
    /// stack artifacts. Ids that resolve to other kinds (or to nothing, for
    /// deselected artifacts) are dropped.
    fn stack_dependency_ids(
        &self,
        dependency_ids: &[String],
        index: &HashMap<&str, &CloudArtifact>,
    ) -> Vec<String> {
        dependency_ids
            .iter()
            .filter(|id| {
                matches!(
                    index.get(id.as_str()),
                    Some(CloudArtifact::Stack(_))
                )
            })
            .map(|id| format!("{}{}", self.id_prefix, id))
            .collect()
    }

    /// Delete every cosmetic publish dependency whose target already reaches
    /// the publish node some other way; keeping such an edge would close a
    /// cycle. Genuine dependency requirements always survive because they
    /// are the "other way".
    fn remove_stack_publish_cycles(&mut self) {
        let publish_ids: Vec<String> = self
            .graph
            .nodes_of_kind(WorkKind::AssetPublish)
            .into_iter()
            .map(|node| node.id.clone())
            .collect();
        for publish_id in publish_ids {
            let deps: Vec<String> = match self.graph.try_get_node(&publish_id) {
                Some(node) => node.dependencies.iter().cloned().collect(),
                None => continue,
            };
            for dep in deps {
                if self.graph.reachable(&dep, &publish_id) {
                    debug!(publish = %publish_id, %dep, "removing cycle-closing ordering edge");
                    self.graph.remove_dependency(&publish_id, &dep);
                }
            }
        }
    }
}

/// Map each asset manifest id to the stack artifact that owns it: the stack
/// that lists the manifest among its dependencies.
fn stacks_from_assets<'a>(
    artifacts: &'a [CloudArtifact],
    index: &HashMap<&str, &'a CloudArtifact>,
) -> HashMap<&'a str, &'a Arc<StackArtifact>> {
    let mut owners: HashMap<&str, &Arc<StackArtifact>> = HashMap::new();
    for artifact in artifacts {
        let CloudArtifact::Stack(stack) = artifact else {
            continue;
        };
        for dep in &stack.dependencies {
            if let Some(CloudArtifact::AssetManifest(manifest)) = index.get(dep.as_str()).copied()
            {
                owners.insert(manifest.id.as_str(), stack);
            }
        }
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentState;
    use skylift_core::artifact::NestedAssemblyArtifact;
    use skylift_core::asset::{AssetDestination, AssetManifest, AssetSource, FilePackaging};

    fn stack(id: &str, deps: &[&str]) -> CloudArtifact {
        CloudArtifact::Stack(Arc::new(StackArtifact::new(
            id,
            deps.iter().map(|d| d.to_string()).collect(),
        )))
    }

    fn manifest(id: &str, deps: &[&str], entries: Vec<AssetEntry>) -> CloudArtifact {
        CloudArtifact::AssetManifest(Arc::new(AssetManifestArtifact::new(
            id,
            deps.iter().map(|d| d.to_string()).collect(),
            AssetManifest { entries },
        )))
    }

    fn entry(asset_id: &str) -> AssetEntry {
        entry_to(asset_id, "assets")
    }

    fn entry_to(asset_id: &str, bucket: &str) -> AssetEntry {
        AssetEntry {
            asset_id: asset_id.to_string(),
            source: AssetSource::File {
                path: format!("{asset_id}.zip"),
                packaging: FilePackaging::File,
            },
            destination: AssetDestination::ObjectStore {
                bucket: bucket.to_string(),
                key: format!("{asset_id}.zip"),
                region: None,
            },
        }
    }

    fn node_id_of(graph: &WorkGraph, kind: WorkKind, asset_id: &str) -> String {
        let prefix = match kind {
            WorkKind::AssetBuild => format!("build-{asset_id}-"),
            WorkKind::AssetPublish => format!("publish-{asset_id}-"),
            WorkKind::Stack => panic!("stacks are addressed by artifact id"),
        };
        let matches: Vec<_> = graph
            .nodes_of_kind(kind)
            .into_iter()
            .filter(|node| node.id.starts_with(&prefix))
            .collect();
        assert_eq!(matches.len(), 1, "expected one {prefix}* node");
        matches[0].id.clone()
    }

    fn assert_acyclic(graph: &WorkGraph) {
        for node in graph.nodes() {
            assert!(
                !graph.reachable(&node.id, &node.id),
                "cycle through {}",
                node.id
            );
        }
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn stacks_only() {
        let graph = WorkGraphBuilder::new(true)
            .build(&[stack("S1", &[]), stack("S2", &["S1"])])
            .unwrap();

        assert_eq!(graph.node_count(), 2);
        let s2 = graph.try_get_node("S2").unwrap();
        assert!(s2.dependencies.contains("S1"));
        assert_eq!(s2.state, DeploymentState::Pending);
        assert_eq!(s2.priority, WorkGraphBuilder::PRIORITY_STACK);
        assert_acyclic(&graph);
    }

    #[test]
    fn end_to_end_stack_with_asset() {
        // S1; S2 depends on S1 and owns manifest M2 with one entry E.
        let artifacts = [
            stack("S1", &[]),
            stack("S2", &["S1", "M2"]),
            manifest("M2", &[], vec![entry("E")]),
        ];
        let graph = WorkGraphBuilder::new(true).build(&artifacts).unwrap();

        assert_eq!(graph.node_count(), 4);
        let build_id = node_id_of(&graph, WorkKind::AssetBuild, "E");
        let publish_id = node_id_of(&graph, WorkKind::AssetPublish, "E");

        let s2 = graph.try_get_node("S2").unwrap();
        assert!(s2.dependencies.contains("S1"));
        assert!(s2.dependencies.contains(&publish_id));

        let publish = graph.try_get_node(&publish_id).unwrap();
        assert!(publish.dependencies.contains(&build_id));
        // Inherited ordering edge from S2's dependency on S1.
        assert!(publish.dependencies.contains("S1"));
        assert_eq!(publish.priority, WorkGraphBuilder::PRIORITY_ASSET_PUBLISH);

        let build = graph.try_get_node(&build_id).unwrap();
        assert!(build.dependencies.is_empty());
        assert_eq!(build.priority, WorkGraphBuilder::PRIORITY_ASSET_BUILD);

        assert_acyclic(&graph);
    }

    #[test]
    fn disabled_prebuild_inherits_parent_stack_dependencies() {
        let artifacts = [
            stack("S1", &[]),
            stack("S2", &["S1", "M2"]),
            manifest("M2", &[], vec![entry("E")]),
        ];
        let graph = WorkGraphBuilder::new(false).build(&artifacts).unwrap();

        let build_id = node_id_of(&graph, WorkKind::AssetBuild, "E");
        let build = graph.try_get_node(&build_id).unwrap();
        let build_deps: Vec<&str> = build.dependencies.iter().map(String::as_str).collect();
        assert_eq!(build_deps, ["S1"]);
    }

    #[test]
    fn identical_build_work_is_deduplicated() {
        // Two stacks, each with its own manifest, referencing the same asset
        // content published to two different destinations.
        let a = entry_to("shared", "bucket-a");
        let b = entry_to("shared", "bucket-b");

        let artifacts = [
            stack("SA", &["MA"]),
            stack("SB", &["MB"]),
            manifest("MA", &[], vec![a]),
            manifest("MB", &[], vec![b]),
        ];
        let graph = WorkGraphBuilder::new(true).build(&artifacts).unwrap();

        let builds = graph.nodes_of_kind(WorkKind::AssetBuild);
        let publishes = graph.nodes_of_kind(WorkKind::AssetPublish);
        assert_eq!(builds.len(), 1);
        assert_eq!(publishes.len(), 2);
        let build_id = builds[0].id.clone();
        for publish in publishes {
            assert!(publish.dependencies.contains(&build_id));
        }
        assert_acyclic(&graph);
    }

    #[test]
    fn shared_asset_cycle_is_cut() {
        // A and B share one asset (same source and destination), so build
        // and publish deduplicate onto single nodes. B depends on A, which
        // makes the publish node inherit an ordering edge on A, but A also
        // depends on the publish of its own asset. The ordering edge must
        // lose.
        let artifacts = [
            stack("A", &["MA"]),
            stack("B", &["A", "MB"]),
            manifest("MA", &[], vec![entry("shared")]),
            manifest("MB", &[], vec![entry("shared")]),
        ];
        let graph = WorkGraphBuilder::new(true).build(&artifacts).unwrap();

        let publish_id = node_id_of(&graph, WorkKind::AssetPublish, "shared");
        let publish = graph.try_get_node(&publish_id).unwrap();
        assert!(
            !publish.dependencies.contains("A"),
            "cycle-closing ordering edge must be removed"
        );
        // The genuine edge survives.
        assert!(graph.try_get_node("A").unwrap().dependencies.contains(&publish_id));
        assert_acyclic(&graph);
    }

    #[test]
    fn orphaned_manifest_fails_the_build() {
        let artifacts = [stack("S1", &[]), manifest("M", &[], vec![entry("E")])];
        let err = WorkGraphBuilder::new(true).build(&artifacts).unwrap_err();
        assert!(matches!(err, GraphError::OrphanedAssetManifest(id) if id == "M"));
    }

    #[test]
    fn deselected_dependency_is_dropped() {
        // S2 depends on a stack that was not selected for deployment.
        let graph = WorkGraphBuilder::new(true)
            .build(&[stack("S2", &["S1"])])
            .unwrap();
        assert!(graph.try_get_node("S2").unwrap().dependencies.is_empty());
    }

    #[test]
    fn unknown_artifact_kinds_are_ignored() {
        let artifacts = [
            stack("S1", &["tree"]),
            CloudArtifact::Other {
                id: "tree".to_string(),
            },
        ];
        let graph = WorkGraphBuilder::new(true).build(&artifacts).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.try_get_node("S1").unwrap().dependencies.is_empty());
    }

    #[test]
    fn nested_assembly_ids_are_namespaced() {
        let nested = CloudArtifact::NestedAssembly(Arc::new(NestedAssemblyArtifact::new(
            "envA",
            vec![stack("X", &[]), stack("Y", &["X"])],
        )));
        let graph = WorkGraphBuilder::new(true)
            .build(&[stack("X", &[]), nested])
            .unwrap();

        assert_eq!(graph.node_count(), 3);
        assert!(graph.try_get_node("X").is_some());
        assert!(graph.try_get_node("envA.X").is_some());
        let inner_y = graph.try_get_node("envA.Y").unwrap();
        assert!(inner_y.dependencies.contains("envA.X"));
        assert!(!inner_y.dependencies.contains("X"));
        assert_acyclic(&graph);
    }

    #[test]
    fn deeply_nested_assemblies_compose_prefixes() {
        let inner = CloudArtifact::NestedAssembly(Arc::new(NestedAssemblyArtifact::new(
            "stage",
            vec![stack("X", &[])],
        )));
        let outer = CloudArtifact::NestedAssembly(Arc::new(NestedAssemblyArtifact::new(
            "envA",
            vec![inner],
        )));
        let graph = WorkGraphBuilder::new(true).build(&[outer]).unwrap();
        assert!(graph.try_get_node("envA.stage.X").is_some());
    }
}
