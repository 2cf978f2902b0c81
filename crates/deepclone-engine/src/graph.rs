//! Dependency graph (Construction Phase)
//!
//! Nodes live in an arena indexed by [`NodeIndex`]. An edge `parent → child` means the
//! child must exist at the destination before the parent can be migrated.
//!
//! The [`GraphBuilder`] expands the graph from the roots through a
//! [`DependencyDiscoverer`]:
//! - one node per distinct source object, however many paths reach it
//! - a node is registered before its dependencies are discovered, so re-entrant
//!   references resolve to the existing node
//! - any discovery failure aborts the build

use crate::collaborators::{DependencyDiscoverer, SourceObject};
use crate::error::DiscoveryError;
use crate::node::{Node, NodeStatus};
use crate::types::{NodeIndex, NodeKind, SourceId};
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

/// Arena of nodes with child/parent edges
#[derive(Debug, Clone)]
pub struct DependencyGraph<O> {
    nodes: Vec<Node<O>>,
    by_source_id: IndexMap<(NodeKind, SourceId), NodeIndex>,
    roots: Vec<NodeIndex>,
}

impl<O: SourceObject> DependencyGraph<O> {
    /// Create empty graph
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_source_id: IndexMap::new(),
            roots: Vec::new(),
        }
    }

    /// Number of nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert an object, or return the node already holding its source id
    ///
    /// The flag is `true` when a new node was created.
    pub fn insert(&mut self, object: O) -> (NodeIndex, bool) {
        let key = (object.kind(), object.source_id());
        if let Some(&index) = self.by_source_id.get(&key) {
            return (index, false);
        }
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(Node::new(index, object));
        self.by_source_id.insert(key, index);
        (index, true)
    }

    /// Mark a node as a root of the migration
    pub fn mark_root(&mut self, index: NodeIndex) {
        if !self.roots.contains(&index) {
            self.roots.push(index);
        }
    }

    /// Record that `parent` depends on `child`
    ///
    /// Symmetric and idempotent.
    pub fn add_child(&mut self, parent: NodeIndex, child: NodeIndex) {
        self.nodes[parent.0].children.insert(child);
        self.nodes[child.0].parents.insert(parent);
    }

    /// Record that `container` listed `member` as a dependent
    ///
    /// `member` depends on `container` and remembers it as a container.
    pub fn add_dependent(&mut self, container: NodeIndex, member: NodeIndex) {
        self.add_child(member, container);
        self.nodes[member.0].containers.insert(container);
    }

    /// Look up a node by source id
    #[must_use]
    pub fn find(&self, kind: NodeKind, source_id: &SourceId) -> Option<NodeIndex> {
        self.by_source_id.get(&(kind, source_id.clone())).copied()
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = &Node<O>> {
        self.nodes.iter()
    }

    /// Root nodes in the order they were added
    #[must_use]
    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    /// Unresolved nodes whose children are all resolved, in discovery order
    #[must_use]
    pub fn ready_set(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| {
                node.children
                    .iter()
                    .all(|child| self.nodes[child.0].is_resolved())
            })
            .map(|node| node.index)
            .collect()
    }

    /// Nodes not yet resolved
    #[must_use]
    pub fn unresolved(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .filter(|node| !node.is_resolved())
            .map(|node| node.index)
            .collect()
    }

    /// Check if every node is resolved
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.nodes.iter().all(Node::is_resolved)
    }

    /// Objects of the direct dependencies of a node
    #[must_use]
    pub fn dependencies_of(&self, index: NodeIndex) -> Vec<&O> {
        self.nodes[index.0]
            .children
            .iter()
            .map(|child| &self.nodes[child.0].object)
            .collect()
    }

    /// Objects of the containers of a node
    #[must_use]
    pub fn containers_of(&self, index: NodeIndex) -> Vec<&O> {
        self.nodes[index.0]
            .containers
            .iter()
            .map(|container| &self.nodes[container.0].object)
            .collect()
    }

    /// A dependency cycle among the unresolved nodes, if any
    ///
    /// Returned as source ids in graph order. Self-dependencies count as cycles.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<SourceId>> {
        let mut graph = DiGraphMap::<usize, ()>::new();
        for node in self.nodes.iter().filter(|node| !node.is_resolved()) {
            graph.add_node(node.index.0);
            for child in &node.children {
                if !self.nodes[child.0].is_resolved() {
                    graph.add_edge(node.index.0, child.0, ());
                }
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .find(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&index| graph.contains_edge(index, index))
            })
            .map(|mut component| {
                component.sort_unstable();
                component
                    .into_iter()
                    .map(|index| self.nodes[index].source_id.clone())
                    .collect()
            })
    }

    /// Serializable view of the graph
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            roots: self.roots.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeSnapshot {
                    index: node.index,
                    source_id: node.source_id.clone(),
                    kind: node.kind,
                    title: node.label().title,
                    status: node.status,
                    wave: node.wave,
                    destination_id: node.destination.as_ref().map(|d| d.id.clone()),
                    children: node.children.iter().copied().collect(),
                })
                .collect(),
        }
    }
}

impl<O: SourceObject> Default for DependencyGraph<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Index<NodeIndex> for DependencyGraph<O> {
    type Output = Node<O>;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl<O> IndexMut<NodeIndex> for DependencyGraph<O> {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[index.0]
    }
}

/// Serializable state of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub index: NodeIndex,
    pub source_id: SourceId,
    pub kind: NodeKind,
    pub title: String,
    pub status: NodeStatus,
    pub wave: Option<usize>,
    pub destination_id: Option<String>,
    pub children: Vec<NodeIndex>,
}

/// Serializable state of a graph, for reports and debugging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub roots: Vec<NodeIndex>,
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    /// Snapshot of the node holding a source id
    #[must_use]
    pub fn node(&self, source_id: &str) -> Option<&NodeSnapshot> {
        self.nodes
            .iter()
            .find(|node| node.source_id.as_str() == source_id)
    }

    /// Number of waves recorded on the nodes
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| node.wave)
            .max()
            .map_or(0, |wave| wave + 1)
    }
}

/// Builds a [`DependencyGraph`] from root objects
///
/// Usage:
/// ```rust,ignore
/// let mut builder = GraphBuilder::new(&discoverer);
/// builder.add_root(web_map).await?;
/// builder.add_root(dashboard).await?;
/// let graph = builder.finish();
/// ```
pub struct GraphBuilder<'d, O, D: ?Sized> {
    graph: DependencyGraph<O>,
    discoverer: &'d D,
}

impl<'d, O, D> GraphBuilder<'d, O, D>
where
    O: SourceObject,
    D: DependencyDiscoverer<O> + ?Sized,
{
    /// Create a builder over an empty graph
    pub fn new(discoverer: &'d D) -> Self {
        Self {
            graph: DependencyGraph::new(),
            discoverer,
        }
    }

    /// Discover a root and everything reachable from it
    ///
    /// # Errors
    /// Returns `DiscoveryError` from the first object that cannot be inspected.
    pub async fn add_root(&mut self, object: O) -> Result<NodeIndex, DiscoveryError> {
        let index = self.discover(object).await?;
        self.graph.mark_root(index);
        Ok(index)
    }

    /// Discover an object and everything reachable from it
    ///
    /// Returns the node of `object`; an object already in the graph is returned
    /// unchanged without being inspected again.
    ///
    /// # Errors
    /// Returns `DiscoveryError` from the first object that cannot be inspected.
    pub async fn discover(&mut self, object: O) -> Result<NodeIndex, DiscoveryError> {
        let (root, inserted) = self.graph.insert(object);
        if !inserted {
            return Ok(root);
        }

        let mut pending = VecDeque::from([root]);
        while let Some(index) = pending.pop_front() {
            let discovered = self.discoverer.discover(&self.graph[index].object).await?;
            tracing::trace!(
                node = %index,
                source_id = %self.graph[index].source_id,
                dependencies = discovered.dependencies.len(),
                dependents = discovered.dependents.len(),
                "discovered"
            );

            for dependency in discovered.dependencies {
                let (child, inserted) = self.graph.insert(dependency);
                self.graph.add_child(index, child);
                if inserted {
                    pending.push_back(child);
                }
            }
            for dependent in discovered.dependents {
                let (parent, inserted) = self.graph.insert(dependent);
                self.graph.add_dependent(index, parent);
                if inserted {
                    pending.push_back(parent);
                }
            }
        }
        Ok(root)
    }

    /// Graph built so far
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph<O> {
        &self.graph
    }

    /// Finish construction
    #[must_use]
    pub fn finish(self) -> DependencyGraph<O> {
        self.graph
    }
}
