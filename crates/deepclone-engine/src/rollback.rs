//! Rollback of a failed run
//!
//! Every object a node created, whether the node resolved or failed halfway, is
//! deleted in reverse order of creation:
//!
//! ```text
//! Waves:     [wave 0: svc, layer] → [wave 1: map] → [FAIL]
//! Rollback:                          [map] → [layer] → [svc]
//! ```
//!
//! Deletion is best effort. A failed delete is logged and reported, and the remaining
//! objects are still attempted.

use crate::collaborators::{Destination, SourceObject};
use crate::error::RollbackError;
use crate::graph::DependencyGraph;
use crate::types::DestinationRef;
use std::collections::HashSet;

/// Outcome of a rollback
#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    /// Objects deleted, in deletion order
    pub deleted: Vec<DestinationRef>,
    /// Objects that could not be deleted
    pub failures: Vec<RollbackError>,
}

impl RollbackReport {
    /// Check if every created object was removed
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Objects to delete, latest first
///
/// Nodes of later waves come first; within a wave, later nodes first; within a node,
/// later objects first. An object reported twice is deleted once.
#[must_use]
pub fn rollback_plan<O: SourceObject>(graph: &DependencyGraph<O>) -> Vec<DestinationRef> {
    let mut nodes: Vec<_> = graph.nodes().filter(|node| !node.created.is_empty()).collect();
    nodes.sort_by_key(|node| std::cmp::Reverse((node.wave, node.index)));

    let mut seen = HashSet::new();
    nodes
        .into_iter()
        .flat_map(|node| node.created.iter().rev())
        .filter(|object| seen.insert((object.kind, object.id.clone())))
        .cloned()
        .collect()
}

/// Deletes everything a run created
pub struct RollbackCoordinator<'d, D: ?Sized> {
    destination: &'d D,
}

impl<'d, D: ?Sized> RollbackCoordinator<'d, D> {
    /// Create coordinator over a destination
    pub fn new(destination: &'d D) -> Self {
        Self { destination }
    }

    /// Delete every object created in the graph
    pub async fn rollback<O>(&self, graph: &DependencyGraph<O>) -> RollbackReport
    where
        O: SourceObject,
        D: Destination<O>,
    {
        let plan = rollback_plan(graph);
        tracing::info!(objects = plan.len(), "rolling back created objects");

        let mut report = RollbackReport::default();
        for object in plan {
            match self.destination.delete(&object).await {
                Ok(()) => {
                    tracing::debug!(object = %object, "deleted");
                    report.deleted.push(object);
                }
                Err(source) => {
                    tracing::warn!(object = %object, error = %source, "failed to delete during rollback");
                    report.failures.push(RollbackError { object, source });
                }
            }
        }

        metrics::counter!("deepclone_rollback_deleted_total").increment(report.deleted.len() as u64);
        metrics::counter!("deepclone_rollback_failures_total").increment(report.failures.len() as u64);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Migrated;
    use crate::error::{CreateFailure, PortalError};
    use crate::test_support::{RecordingDestination, TestObject};
    use crate::types::NodeIndex;
    use pretty_assertions::assert_eq;

    fn graph() -> DependencyGraph<TestObject> {
        let mut graph = DependencyGraph::new();
        let (svc, _) = graph.insert(TestObject::item("svc"));
        let (app, _) = graph.insert(TestObject::item("app"));
        let (map, _) = graph.insert(TestObject::item("map"));
        graph.add_child(map, svc);
        graph.add_child(app, map);

        graph[svc].apply_success(0, &Migrated::created(DestinationRef::item("d-svc", "Feature Service", "svc")));
        graph[map].apply_success(
            1,
            &Migrated::created(DestinationRef::item("d-map", "Web Map", "map"))
                .with_auxiliary(DestinationRef::item("d-map-aux", "Code Attachment", "map")),
        );
        graph[app].apply_failure(
            2,
            &CreateFailure::new(PortalError::Rejected("boom".into()))
                .with_partial(vec![DestinationRef::item("d-app", "Web Mapping Application", "app")]),
        );
        graph
    }

    fn ids(objects: &[DestinationRef]) -> Vec<&str> {
        objects.iter().map(|object| object.id.as_str()).collect()
    }

    #[test]
    fn plan_is_reverse_creation_order() {
        let graph = graph();
        let plan = rollback_plan(&graph);
        assert_eq!(ids(&plan), vec!["d-app", "d-map-aux", "d-map", "d-svc"]);
    }

    #[test]
    fn matched_and_pending_nodes_own_nothing() {
        let mut graph = DependencyGraph::new();
        let (a, _) = graph.insert(TestObject::item("a"));
        graph.insert(TestObject::item("b"));
        graph[a].apply_success(0, &Migrated::existing(DestinationRef::item("d-a", "Web Map", "a")));

        assert!(rollback_plan(&graph).is_empty());
        assert_eq!(graph[NodeIndex(1)].created.len(), 0);
    }

    #[tokio::test]
    async fn delete_failures_do_not_stop_rollback() {
        let graph = graph();
        let destination = RecordingDestination::new().fail_delete("d-map");

        let report = RollbackCoordinator::new(&destination).rollback(&graph).await;

        assert_eq!(ids(&report.deleted), vec!["d-app", "d-map-aux", "d-svc"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].object.id, "d-map");
        assert!(!report.is_clean());
    }
}
