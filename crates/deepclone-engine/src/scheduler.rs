//! Leveled wave scheduler (Execution Phase)
//!
//! Migrates a [`DependencyGraph`] in waves. Each wave holds every pending node whose
//! children are resolved; its migrations run concurrently, bounded by
//! `worker_limit`, and the wave is a barrier.
//!
//! # Critical Invariant
//!
//! Task bodies never touch the graph or the [`IdentifierMap`]. They return results,
//! and the coordinator applies them once the whole wave has completed. A node
//! therefore never starts before every child is resolved and every child's mapping
//! contribution is merged.

use crate::collaborators::{Destination, MigrationContext, Migrated, SourceObject};
use crate::error::{CreateFailure, CreationError, MigrationError};
use crate::graph::DependencyGraph;
use crate::identifier_map::IdentifierMap;
use crate::rollback::{RollbackCoordinator, RollbackReport};
use crate::types::{DestinationRef, NodeIndex, RunId};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::Instrument;

/// Default ceiling of concurrent migrations, matching common portal rate limits
pub const DEFAULT_WORKER_LIMIT: usize = 20;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum migrations in flight within one wave
    pub worker_limit: usize,
    /// Look for counterparts left by an earlier run before creating
    pub search_existing: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_limit: DEFAULT_WORKER_LIMIT,
            search_existing: true,
        }
    }
}

impl SchedulerConfig {
    /// With worker limit
    #[inline]
    #[must_use]
    pub fn with_worker_limit(mut self, worker_limit: usize) -> Self {
        self.worker_limit = worker_limit;
        self
    }

    /// With existing-object search enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_search_existing(mut self, search_existing: bool) -> Self {
        self.search_existing = search_existing;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    /// Returns `MigrationError::InvalidConfig` if the worker limit is zero.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.worker_limit == 0 {
            return Err(MigrationError::InvalidConfig(
                "worker_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Discovering the dependency graph
    Building,
    /// Migrating wave by wave
    Scheduling,
    /// Every node resolved
    Completed,
    /// A wave failed; rolling back what this run created
    Aborting,
    /// Stopped by an error, after any rollback
    Failed,
}

impl RunState {
    /// Check if transition to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Building, RunState::Scheduling | RunState::Failed)
                | (RunState::Scheduling, RunState::Completed | RunState::Aborting)
                | (RunState::Aborting, RunState::Failed)
        )
    }

    /// Check if the run is over
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Id of the run that produced this summary; `None` only for `RunSummary::default()`
    pub run_id: Option<RunId>,
    /// Objects created at the destination, in wave order
    pub created: Vec<DestinationRef>,
    /// Number of waves executed
    pub waves: usize,
    /// Nodes resolved by creating their object
    pub migrated: usize,
    /// Nodes resolved to an object left by an earlier run
    pub matched_existing: usize,
    /// Nodes resolved from the caller's seed mappings
    pub seeded: usize,
}

/// Drives a graph through its waves
pub struct LeveledScheduler<'d, O, D: ?Sized> {
    destination: &'d D,
    config: SchedulerConfig,
    state: RunState,
    run_id: RunId,
    _object: PhantomData<fn() -> O>,
}

impl<'d, O, D> LeveledScheduler<'d, O, D>
where
    O: SourceObject,
    D: Destination<O> + ?Sized,
{
    /// Create a scheduler in the `Building` state
    pub fn new(destination: &'d D, config: SchedulerConfig) -> Self {
        Self {
            destination,
            config,
            state: RunState::Building,
            run_id: RunId::new(),
            _object: PhantomData,
        }
    }

    /// With run ID
    #[inline]
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run ID
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Move to the next state
    ///
    /// Invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            tracing::trace!(run_id = %self.run_id, from = ?self.state, to = ?next, "run state");
            self.state = next;
        } else {
            tracing::error!(run_id = %self.run_id, from = ?self.state, to = ?next, "invalid run state transition");
        }
    }

    /// Migrate every node of the graph
    ///
    /// `identifier_map` holds the caller's seed on entry and every mapping of the run
    /// on return, whatever the outcome.
    ///
    /// # Errors
    /// - `MigrationError::Creation` when a node fails; the whole graph is rolled back
    /// - `MigrationError::NoProgress` when unresolved nodes remain but none is ready
    pub async fn run(
        &mut self,
        graph: &mut DependencyGraph<O>,
        identifier_map: &mut IdentifierMap,
    ) -> Result<RunSummary, MigrationError> {
        self.transition(RunState::Scheduling);
        let mut summary = RunSummary {
            run_id: Some(self.run_id),
            ..RunSummary::default()
        };

        loop {
            let ready = graph.ready_set();
            if ready.is_empty() {
                if graph.is_resolved() {
                    break;
                }
                return Err(self.no_progress(graph).await);
            }

            let wave = summary.waves;
            let span = tracing::info_span!("wave", run_id = %self.run_id, wave, ready = ready.len());
            let (seeded, batch): (Vec<_>, Vec<_>) = ready.into_iter().partition(|&index| {
                let node = &graph[index];
                identifier_map.contains(node.kind, node.source_id.as_str())
            });

            for index in seeded {
                graph[index].mark_seeded(wave);
                summary.seeded += 1;
            }

            let results = self
                .dispatch(graph, identifier_map, &batch, wave)
                .instrument(span.clone())
                .await;

            let mut first_failure = None;
            for (index, result) in results {
                match result {
                    Ok(migrated) => {
                        self.apply(graph, identifier_map, index, wave, migrated, &mut summary);
                    }
                    Err(failure) => {
                        graph[index].apply_failure(wave, &failure);
                        span.in_scope(|| {
                            tracing::debug!(node = %index, object = %graph[index].label(), error = %failure.error, "node failed");
                        });
                        if first_failure.is_none() {
                            first_failure = Some((index, failure));
                        }
                    }
                }
            }
            summary.waves += 1;

            if let Some((index, failure)) = first_failure {
                let failure = CreationError {
                    object: graph[index].label(),
                    node: index,
                    wave,
                    source: failure.error,
                };
                tracing::error!(run_id = %self.run_id, wave, error = %failure, "aborting migration");
                let rollback = self.abort(graph).await;
                return Err(MigrationError::Creation { failure, rollback });
            }

            span.in_scope(|| tracing::info!(dispatched = batch.len(), "wave complete"));
        }

        self.transition(RunState::Completed);
        metrics::counter!("deepclone_objects_created_total").increment(summary.created.len() as u64);
        metrics::counter!("deepclone_objects_matched_total").increment(summary.matched_existing as u64);
        tracing::info!(
            run_id = %self.run_id,
            waves = summary.waves,
            created = summary.created.len(),
            matched = summary.matched_existing,
            seeded = summary.seeded,
            "migration complete"
        );
        Ok(summary)
    }

    /// Migrate one wave's batch, at most `worker_limit` at a time
    ///
    /// Every call runs to completion. Results come back in batch order.
    async fn dispatch(
        &self,
        graph: &DependencyGraph<O>,
        identifier_map: &IdentifierMap,
        batch: &[NodeIndex],
        wave: usize,
    ) -> Vec<(NodeIndex, Result<Migrated, CreateFailure>)> {
        let destination = self.destination;
        let search_existing = self.config.search_existing;

        let mut results: Vec<_> = stream::iter(batch.iter().copied().enumerate())
            .map(|(position, index)| {
                let node = &graph[index];
                let context = MigrationContext {
                    identifier_map,
                    dependencies: graph.dependencies_of(index),
                    containers: graph.containers_of(index),
                    wave,
                };
                async move {
                    tracing::debug!(node = %index, object = %node.label(), "migrating");
                    let result = node.migrate(destination, context, search_existing).await;
                    (position, index, result)
                }
            })
            .buffer_unordered(self.config.worker_limit.max(1))
            .collect()
            .await;

        results.sort_unstable_by_key(|(position, _, _)| *position);
        results
            .into_iter()
            .map(|(_, index, result)| (index, result))
            .collect()
    }

    /// Apply one successful result on the coordinator
    fn apply(
        &self,
        graph: &mut DependencyGraph<O>,
        identifier_map: &mut IdentifierMap,
        index: NodeIndex,
        wave: usize,
        migrated: Migrated,
        summary: &mut RunSummary,
    ) {
        let node = &mut graph[index];
        node.apply_success(wave, &migrated);
        identifier_map.record(node.kind, &node.source_id, &migrated.destination.id);
        identifier_map.merge(migrated.mappings);

        if migrated.created.is_empty() {
            summary.matched_existing += 1;
        } else {
            summary.migrated += 1;
        }
        summary.created.extend(migrated.created);
    }

    /// Roll back every node and fail the run
    async fn abort(&mut self, graph: &DependencyGraph<O>) -> RollbackReport {
        self.transition(RunState::Aborting);
        let report = RollbackCoordinator::new(self.destination)
            .rollback(graph)
            .await;
        self.transition(RunState::Failed);
        report
    }

    async fn no_progress(&mut self, graph: &DependencyGraph<O>) -> MigrationError {
        let unresolved: Vec<_> = graph
            .unresolved()
            .into_iter()
            .map(|index| graph[index].source_id.clone())
            .collect();
        let cycle = graph.find_cycle().unwrap_or_default();
        tracing::error!(run_id = %self.run_id, unresolved = unresolved.len(), ?cycle, "no node is ready");

        let report = self.abort(graph).await;
        if !report.deleted.is_empty() || !report.failures.is_empty() {
            tracing::warn!(
                deleted = report.deleted.len(),
                failures = report.failures.len(),
                "rolled back objects created before the stall"
            );
        }
        MigrationError::NoProgress { unresolved, cycle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::node::NodeStatus;
    use crate::test_support::{RecordingDestination, StaticDiscoverer, TestObject};
    use crate::types::{NodeKind, SourceId};
    use pretty_assertions::assert_eq;

    async fn build(discoverer: &StaticDiscoverer, roots: &[&str]) -> DependencyGraph<TestObject> {
        let mut builder = GraphBuilder::new(discoverer);
        for root in roots {
            builder.add_root(TestObject::item(root)).await.unwrap();
        }
        builder.finish()
    }

    #[test]
    fn state_transitions() {
        assert!(RunState::Building.can_transition_to(RunState::Scheduling));
        assert!(RunState::Building.can_transition_to(RunState::Failed));
        assert!(RunState::Scheduling.can_transition_to(RunState::Aborting));
        assert!(!RunState::Scheduling.can_transition_to(RunState::Failed));
        assert!(!RunState::Completed.can_transition_to(RunState::Scheduling));
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = SchedulerConfig::default().with_worker_limit(0);
        assert!(matches!(config.validate(), Err(MigrationError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn dependencies_resolve_in_earlier_waves() {
        let discoverer = StaticDiscoverer::new()
            .depends("app", &["map"])
            .depends("map", &["svc_a", "svc_b"]);
        let mut graph = build(&discoverer, &["app"]).await;
        let destination = RecordingDestination::new();
        let mut map = IdentifierMap::new();

        let mut scheduler = LeveledScheduler::new(&destination, SchedulerConfig::default());
        let summary = scheduler.run(&mut graph, &mut map).await.unwrap();

        assert_eq!(scheduler.state(), RunState::Completed);
        assert_eq!(summary.waves, 3);
        let ids: Vec<_> = summary.created.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dst-svc_a", "dst-svc_b", "dst-map", "dst-app"]);
        assert_eq!(map.item("map"), Some("dst-map"));
        assert_eq!(destination.unmapped_dependencies(), 0);
    }

    #[tokio::test]
    async fn seeded_nodes_are_never_migrated() {
        let discoverer = StaticDiscoverer::new().depends("map", &["svc"]);
        let mut graph = build(&discoverer, &["map"]).await;
        let destination = RecordingDestination::new();
        let mut map = IdentifierMap::new().with_items([("svc", "existing-svc")]);

        let mut scheduler = LeveledScheduler::new(&destination, SchedulerConfig::default());
        let summary = scheduler.run(&mut graph, &mut map).await.unwrap();

        assert_eq!(summary.seeded, 1);
        assert_eq!(destination.create_calls(), vec!["map".to_string()]);
        let svc = graph.find(NodeKind::Item, &"svc".into()).unwrap();
        assert_eq!(graph[svc].status, NodeStatus::Seeded);
        assert_eq!(map.item("svc"), Some("existing-svc"));
    }

    #[tokio::test]
    async fn existing_objects_resolve_without_creation() {
        let discoverer = StaticDiscoverer::new().depends("map", &["svc"]);
        let mut graph = build(&discoverer, &["map"]).await;
        let destination = RecordingDestination::new().with_existing("svc");
        let mut map = IdentifierMap::new();

        let summary = LeveledScheduler::new(&destination, SchedulerConfig::default())
            .run(&mut graph, &mut map)
            .await
            .unwrap();

        assert_eq!(summary.matched_existing, 1);
        assert_eq!(summary.created.len(), 1);
        assert_eq!(map.item("svc"), Some("found-svc"));
    }

    #[tokio::test]
    async fn search_can_be_disabled() {
        let discoverer = StaticDiscoverer::new();
        let mut graph = build(&discoverer, &["svc"]).await;
        let destination = RecordingDestination::new().with_existing("svc");
        let config = SchedulerConfig::default().with_search_existing(false);

        let summary = LeveledScheduler::new(&destination, config)
            .run(&mut graph, &mut IdentifierMap::new())
            .await
            .unwrap();

        assert_eq!(summary.matched_existing, 0);
        assert_eq!(destination.create_calls(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn failure_rolls_back_the_whole_graph() {
        let discoverer = StaticDiscoverer::new()
            .depends("map", &["svc", "layer"])
            .depends("dash", &["map"]);
        let mut graph = build(&discoverer, &["dash"]).await;
        let destination = RecordingDestination::new().fail_on("layer").with_partial();
        let mut map = IdentifierMap::new();

        let mut scheduler = LeveledScheduler::new(&destination, SchedulerConfig::default());
        let err = scheduler.run(&mut graph, &mut map).await.unwrap_err();

        assert_eq!(scheduler.state(), RunState::Failed);
        match &err {
            MigrationError::Creation { failure, rollback } => {
                assert_eq!(failure.object.source_id.as_str(), "layer");
                assert_eq!(failure.wave, 0);
                assert_eq!(rollback.deleted.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The sibling ran to completion and was rolled back with the partial object
        let mut deleted = destination.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["dst-svc".to_string(), "partial-layer".to_string()]);
        assert!(!destination.create_calls().contains(&"map".to_string()));
    }

    #[tokio::test]
    async fn cycle_fails_without_looping() {
        let discoverer = StaticDiscoverer::new()
            .depends("a", &["b", "leaf"])
            .depends("b", &["a"]);
        let mut graph = build(&discoverer, &["a"]).await;
        let destination = RecordingDestination::new();

        let mut scheduler = LeveledScheduler::new(&destination, SchedulerConfig::default());
        let err = scheduler
            .run(&mut graph, &mut IdentifierMap::new())
            .await
            .unwrap_err();

        match err {
            MigrationError::NoProgress { unresolved, cycle } => {
                assert_eq!(unresolved.len(), 2);
                assert_eq!(cycle, vec![SourceId::from("a"), SourceId::from("b")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(scheduler.state(), RunState::Failed);
        assert_eq!(destination.deleted(), vec!["dst-leaf".to_string()]);
    }

    #[tokio::test]
    async fn worker_limit_bounds_concurrency() {
        let leaves: Vec<String> = (0..12).map(|i| format!("leaf{i}")).collect();
        let leaf_refs: Vec<&str> = leaves.iter().map(String::as_str).collect();
        let discoverer = StaticDiscoverer::new().depends("root", &leaf_refs);
        let mut graph = build(&discoverer, &["root"]).await;
        let destination = RecordingDestination::new();

        LeveledScheduler::new(&destination, SchedulerConfig::default().with_worker_limit(3))
            .run(&mut graph, &mut IdentifierMap::new())
            .await
            .unwrap();

        assert!(destination.max_in_flight() <= 3);
        assert!(destination.max_in_flight() >= 2);
    }
}
