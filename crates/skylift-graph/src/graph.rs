//! WorkGraph — mutable dependency graph of deployment work.
//!
//! The graph owns every [`WorkNode`] and answers scheduling queries; it runs
//! nothing itself. Construction happens under a single owner (the builder),
//! after which the executor funnels all state transitions through its own
//! loop. `&mut self` on every mutating operation makes that discipline a
//! compile-time property.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::types::{DeploymentState, WorkKind, WorkNode};

/// A directed graph of deployment work, edges pointing at dependencies.
#[derive(Debug, Default)]
pub struct WorkGraph {
    nodes: HashMap<String, WorkNode>,
    /// Insertion order; the deterministic tie-breaker for equal priorities.
    order: Vec<String>,
    /// Dependencies registered before their source node was added.
    pending_edges: HashMap<String, Vec<String>>,
}

impl WorkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert nodes. Dependency ids are taken as given; edges pointing at
    /// nodes that never materialize are cleaned up later by
    /// [`WorkGraph::remove_unavailable_dependencies`].
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = WorkNode>) -> GraphResult<()> {
        for mut node in nodes {
            if self.nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            if let Some(edges) = self.pending_edges.remove(&node.id) {
                node.dependencies.extend(edges);
            }
            self.order.push(node.id.clone());
            self.nodes.insert(node.id.clone(), node);
        }
        Ok(())
    }

    pub fn try_get_node(&self, id: &str) -> Option<&WorkNode> {
        self.nodes.get(id)
    }

    /// Record that `node_id` depends on `depends_on`. Works whether or not
    /// `node_id` has been added yet; the edge is attached when it appears.
    pub fn add_dependency(&mut self, node_id: &str, depends_on: &str) {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.dependencies.insert(depends_on.to_string());
            }
            None => self
                .pending_edges
                .entry(node_id.to_string())
                .or_default()
                .push(depends_on.to_string()),
        }
    }

    /// Remove a single dependency edge, if present.
    pub fn remove_dependency(&mut self, node_id: &str, depends_on: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.dependencies.remove(depends_on);
        }
    }

    /// Drop every dependency id that does not resolve to a node in this
    /// graph. Tolerates partial artifact sets (deselected stacks) without
    /// manual bookkeeping of which ids survived.
    pub fn remove_unavailable_dependencies(&mut self) {
        let ids: HashSet<String> = self.nodes.keys().cloned().collect();
        for node in self.nodes.values_mut() {
            node.dependencies.retain(|dep| ids.contains(dep));
        }
        // Edges whose source node never materialized are dropped with it.
        self.pending_edges.clear();
    }

    /// Merge all nodes of `other` into this graph. The builder namespaces
    /// nested-assembly ids, so collisions indicate a bug upstream.
    pub fn absorb(&mut self, other: WorkGraph) -> GraphResult<()> {
        let WorkGraph {
            mut nodes,
            order,
            pending_edges,
        } = other;
        for id in order {
            if let Some(node) = nodes.remove(&id) {
                self.add_nodes([node])?;
            }
        }
        for (source, edges) in pending_edges {
            for dep in edges {
                self.add_dependency(&source, &dep);
            }
        }
        Ok(())
    }

    /// All nodes of one kind, in insertion order.
    pub fn nodes_of_kind(&self, kind: WorkKind) -> Vec<&WorkNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| node.kind() == kind)
            .collect()
    }

    /// Whether a path of one or more dependency edges leads from `from` to
    /// `to`. With this convention `reachable(n, n)` is exactly "n lies on a
    /// cycle".
    pub fn reachable(&self, from: &str, to: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        if let Some(node) = self.nodes.get(from) {
            queue.extend(node.dependencies.iter().map(String::as_str));
        }
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                queue.extend(node.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    /// Find one dependency cycle, as the id path `a -> ... -> a`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut seen: HashSet<String> = HashSet::new();
        for id in &self.order {
            let mut path = vec![id.clone()];
            if let Some(cycle) = self.cycle_search(id, &mut path, &mut seen) {
                return Some(cycle);
            }
        }
        None
    }

    fn cycle_search(
        &self,
        id: &str,
        path: &mut Vec<String>,
        seen: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if seen.contains(id) {
            return None;
        }
        if let Some(node) = self.nodes.get(id) {
            for dep in &node.dependencies {
                if let Some(pos) = path.iter().position(|p| p == dep) {
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(dep.clone());
                    seen.insert(id.to_string());
                    return Some(cycle);
                }
                path.push(dep.clone());
                let found = self.cycle_search(dep, path, seen);
                path.pop();
                if found.is_some() {
                    seen.insert(id.to_string());
                    return found;
                }
            }
        }
        seen.insert(id.to_string());
        None
    }

    /// Refresh the ready pool and return it in dispatch order.
    ///
    /// Three steps, in one scheduling pass:
    /// 1. Propagate skips to a fixpoint: a pending/queued node with a failed
    ///    or skipped dependency can never run, and its own skip cascades.
    /// 2. Queue every pending node whose dependencies are all completed.
    /// 3. Return queued node ids, descending priority, insertion order on
    ///    ties (the sort is stable).
    pub fn update_ready_pool(&mut self) -> Vec<String> {
        loop {
            let mut to_skip: Vec<String> = Vec::new();
            for id in &self.order {
                let Some(node) = self.nodes.get(id) else {
                    continue;
                };
                if !matches!(
                    node.state,
                    DeploymentState::Pending | DeploymentState::Queued
                ) {
                    continue;
                }
                let blocked = node.dependencies.iter().any(|dep| {
                    matches!(
                        self.nodes.get(dep).map(|d| d.state),
                        Some(DeploymentState::Failed | DeploymentState::Skipped)
                    )
                });
                if blocked {
                    to_skip.push(id.clone());
                }
            }
            if to_skip.is_empty() {
                break;
            }
            for id in to_skip {
                if let Some(node) = self.nodes.get_mut(&id) {
                    debug!(%id, "skipped: dependency failed or was skipped");
                    node.state = DeploymentState::Skipped;
                }
            }
        }

        let mut to_queue: Vec<String> = Vec::new();
        for id in &self.order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.state != DeploymentState::Pending {
                continue;
            }
            let ready = node.dependencies.iter().all(|dep| {
                self.nodes.get(dep).map(|d| d.state) == Some(DeploymentState::Completed)
            });
            if ready {
                to_queue.push(id.clone());
            }
        }
        for id in &to_queue {
            if let Some(node) = self.nodes.get_mut(id) {
                node.state = DeploymentState::Queued;
            }
        }

        let mut ready: Vec<(i32, String)> = self
            .order
            .iter()
            .filter_map(|id| {
                let node = self.nodes.get(id)?;
                (node.state == DeploymentState::Queued).then(|| (node.priority, id.clone()))
            })
            .collect();
        ready.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        ready.into_iter().map(|(_, id)| id).collect()
    }

    pub fn mark_deploying(&mut self, id: &str) -> GraphResult<()> {
        self.set_state(id, DeploymentState::Deploying)
    }

    pub fn mark_completed(&mut self, id: &str) -> GraphResult<()> {
        self.set_state(id, DeploymentState::Completed)
    }

    pub fn mark_failed(&mut self, id: &str) -> GraphResult<()> {
        self.set_state(id, DeploymentState::Failed)
    }

    fn set_state(&mut self, id: &str, state: DeploymentState) -> GraphResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        debug_assert!(
            !node.state.is_terminal(),
            "state transition out of terminal state {} for {id}",
            node.state
        );
        node.state = state;
        Ok(())
    }

    /// Mark every node that has not started as skipped. Used by the executor
    /// after a failure so all nodes end in a terminal state.
    pub fn skip_remaining(&mut self) {
        for node in self.nodes.values_mut() {
            if matches!(
                node.state,
                DeploymentState::Pending | DeploymentState::Queued
            ) {
                node.state = DeploymentState::Skipped;
            }
        }
    }

    /// Whether every node has reached a terminal state.
    pub fn done(&self) -> bool {
        self.nodes.values().all(|node| node.state.is_terminal())
    }

    pub fn has_failed(&self) -> bool {
        self.nodes
            .values()
            .any(|node| node.state == DeploymentState::Failed)
    }

    /// Remove a node and every edge pointing at it.
    pub fn remove_node(&mut self, id: &str) {
        if self.nodes.remove(id).is_none() {
            return;
        }
        self.order.retain(|existing| existing != id);
        for node in self.nodes.values_mut() {
            node.dependencies.remove(id);
        }
    }

    /// Drop asset-publish nodes the caller identifies as already published,
    /// then build nodes that nothing references anymore.
    pub fn remove_unnecessary_assets<F>(&mut self, mut is_unnecessary: F)
    where
        F: FnMut(&WorkNode) -> bool,
    {
        let unnecessary: Vec<String> = self
            .nodes_of_kind(WorkKind::AssetPublish)
            .into_iter()
            .filter(|node| is_unnecessary(node))
            .map(|node| node.id.clone())
            .collect();
        for id in &unnecessary {
            debug!(%id, "removing publish step for already-published asset");
            self.remove_node(id);
        }

        let referenced: HashSet<&String> = self
            .nodes
            .values()
            .flat_map(|node| node.dependencies.iter())
            .collect();
        let orphaned: Vec<String> = self
            .nodes_of_kind(WorkKind::AssetBuild)
            .into_iter()
            .filter(|node| !referenced.contains(&node.id))
            .map(|node| node.id.clone())
            .collect();
        for id in &orphaned {
            debug!(%id, "removing build step with no remaining publish step");
            self.remove_node(id);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }
}

impl fmt::Display for WorkGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes() {
            let deps: Vec<&str> = node.dependencies.iter().map(String::as_str).collect();
            writeln!(
                f,
                "{} ({}) [{}] <- {}",
                node.id,
                node.kind(),
                node.state,
                deps.join(", ")
            )?;
        }
        Ok(())
    }
}
