//! Entry point: build the graph, then schedule it

use crate::collaborators::{DependencyDiscoverer, Destination, SourceObject};
use crate::error::MigrationError;
use crate::graph::{GraphBuilder, GraphSnapshot};
use crate::identifier_map::IdentifierMap;
use crate::scheduler::{LeveledScheduler, RunState, RunSummary, SchedulerConfig};
use crate::types::{DestinationRef, NodeKind, RunId};
use tracing::Instrument;

/// Result of a successful migration
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Objects created at the destination, in wave order
    ///
    /// Includes groups and auxiliary objects. Objects matched at the destination are
    /// not listed.
    pub created: Vec<DestinationRef>,
    /// Seed mappings plus every mapping of the run
    pub identifier_map: IdentifierMap,
    pub summary: RunSummary,
    /// Final state of the graph
    pub graph: GraphSnapshot,
}

impl MigrationOutcome {
    /// Created items, without groups
    pub fn created_items(&self) -> impl Iterator<Item = &DestinationRef> {
        self.created
            .iter()
            .filter(|object| object.kind == NodeKind::Item)
    }
}

/// Migrate `roots` and everything they depend on
///
/// Objects whose source id is in `seed` are treated as already migrated. Discovery
/// runs to completion before anything is created; a discovery failure creates
/// nothing.
///
/// # Errors
/// - `MigrationError::InvalidConfig` if `config` is rejected
/// - `MigrationError::Discovery` if the graph cannot be built
/// - `MigrationError::Creation` if a node fails (created objects are rolled back)
/// - `MigrationError::NoProgress` on cyclic dependencies
pub async fn migrate<O, Disc, Dest>(
    roots: impl IntoIterator<Item = O>,
    seed: IdentifierMap,
    discoverer: &Disc,
    destination: &Dest,
    config: SchedulerConfig,
) -> Result<MigrationOutcome, MigrationError>
where
    O: SourceObject,
    Disc: DependencyDiscoverer<O> + ?Sized,
    Dest: Destination<O> + ?Sized,
{
    config.validate()?;
    let run_id = RunId::new();
    let roots: Vec<O> = roots.into_iter().collect();
    let span = tracing::info_span!("migration", %run_id, roots = roots.len());

    async move {
        let mut scheduler = LeveledScheduler::new(destination, config).with_run_id(run_id);

        let mut builder = GraphBuilder::new(discoverer);
        for root in roots {
            if let Err(err) = builder.add_root(root).await {
                tracing::error!(error = %err, "dependency discovery failed");
                scheduler.transition(RunState::Failed);
                return Err(err.into());
            }
        }
        let mut graph = builder.finish();
        tracing::info!(nodes = graph.len(), "dependency graph built");

        let mut identifier_map = seed;
        let summary = scheduler.run(&mut graph, &mut identifier_map).await?;

        Ok(MigrationOutcome {
            created: summary.created.clone(),
            identifier_map,
            summary,
            graph: graph.snapshot(),
        })
    }
    .instrument(span)
    .await
}
