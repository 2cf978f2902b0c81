//! Graph node: one distinct source object and its migration state

use crate::collaborators::{Destination, MigrationContext, Migrated, SourceObject};
use crate::error::CreateFailure;
use crate::types::{DestinationRef, NodeIndex, NodeKind, ObjectLabel, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Migration state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet attempted
    Pending,
    /// Resolved from a caller-supplied mapping, never migrated
    Seeded,
    /// Resolved to an object that already existed at the destination
    Matched,
    /// Resolved by creating the object
    Created,
    /// Migration attempted and failed
    Failed,
}

impl NodeStatus {
    /// Check if dependents may rely on this node
    #[inline]
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Seeded | Self::Matched | Self::Created)
    }
}

/// One source object in the dependency graph
///
/// Children are the nodes this node depends on; parents depend on this node.
#[derive(Debug, Clone)]
pub struct Node<O> {
    pub index: NodeIndex,
    pub object: O,
    pub source_id: SourceId,
    pub kind: NodeKind,
    pub children: BTreeSet<NodeIndex>,
    pub parents: BTreeSet<NodeIndex>,
    /// Children that listed this node as a dependent (e.g. groups holding an item)
    pub containers: BTreeSet<NodeIndex>,
    pub status: NodeStatus,
    /// Destination counterpart once resolved
    pub destination: Option<DestinationRef>,
    /// Objects created at the destination by this node, in creation order
    pub created: Vec<DestinationRef>,
    /// Wave in which the node was attempted
    pub wave: Option<usize>,
}

impl<O: SourceObject> Node<O> {
    /// Create a pending node
    pub fn new(index: NodeIndex, object: O) -> Self {
        Self {
            index,
            source_id: object.source_id(),
            kind: object.kind(),
            object,
            children: BTreeSet::new(),
            parents: BTreeSet::new(),
            containers: BTreeSet::new(),
            status: NodeStatus::Pending,
            destination: None,
            created: Vec::new(),
            wave: None,
        }
    }

    /// Identity for errors and logs
    #[inline]
    #[must_use]
    pub fn label(&self) -> ObjectLabel {
        self.object.label()
    }

    /// Check if resolved
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }

    /// Migrate the node's object
    ///
    /// Looks for an existing counterpart first when `search_existing` is set, and only
    /// creates when none is found. A failed search is a failed migration.
    ///
    /// # Errors
    /// Returns `CreateFailure` from the search or the creation.
    pub async fn migrate<D>(
        &self,
        destination: &D,
        context: MigrationContext<'_, O>,
        search_existing: bool,
    ) -> Result<Migrated, CreateFailure>
    where
        D: Destination<O> + ?Sized,
    {
        if search_existing {
            if let Some(mut existing) = destination.find_existing(&self.object).await? {
                tracing::debug!(node = %self.index, destination = %existing.destination, "matched existing object");
                // A match never owns destination objects
                existing.created.clear();
                return Ok(existing);
            }
        }
        destination.create(&self.object, &context).await
    }

    /// Record a successful migration
    pub fn apply_success(&mut self, wave: usize, migrated: &Migrated) {
        self.wave = Some(wave);
        self.status = if migrated.is_existing() {
            NodeStatus::Matched
        } else {
            NodeStatus::Created
        };
        self.destination = Some(migrated.destination.clone());
        self.created.extend(migrated.created.iter().cloned());
    }

    /// Record a failed migration, keeping partial creations for rollback
    pub fn apply_failure(&mut self, wave: usize, failure: &CreateFailure) {
        self.wave = Some(wave);
        self.status = NodeStatus::Failed;
        self.created.extend(failure.partial.iter().cloned());
    }

    /// Resolve from a seeded mapping
    pub fn mark_seeded(&mut self, wave: usize) {
        self.wave = Some(wave);
        self.status = NodeStatus::Seeded;
    }
}
