//! deepclone engine
//!
//! Dependency-ordered migration of content between two portals, in two phases:
//! 1. **Construction Phase**: discover every object reachable from the roots and
//!    wire a dependency graph (one node per distinct source object)
//! 2. **Execution Phase**: migrate the graph in waves, each wave holding every node
//!    whose dependencies are already resolved
//!
//! The engine never looks inside a payload. Type-specific dependency discovery,
//! payload rewriting and the remote calls themselves are injected through the
//! traits in [`collaborators`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use deepclone_engine::prelude::*;
//!
//! let outcome = migrate(
//!     roots,
//!     IdentifierMap::new(),
//!     &discoverer,
//!     &destination,
//!     SchedulerConfig::default(),
//! )
//! .await?;
//!
//! println!("created {} objects in {} waves", outcome.created.len(), outcome.summary.waves);
//! ```

pub mod collaborators;
pub mod engine;
pub mod error;
pub mod graph;
pub mod identifier_map;
pub mod node;
pub mod rollback;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use collaborators::{
    DependencyDiscoverer, Destination, Discovered, MigrationContext, Migrated, SourceObject,
};
pub use engine::{migrate, MigrationOutcome};
pub use error::{CreateFailure, CreationError, DiscoveryError, MigrationError, PortalError, RollbackError};
pub use graph::{DependencyGraph, GraphBuilder, GraphSnapshot};
pub use identifier_map::{IdentifierMap, MappingContribution, ServiceMapping};
pub use node::{Node, NodeStatus};
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use scheduler::{LeveledScheduler, RunState, RunSummary, SchedulerConfig};
pub use types::{DestinationRef, NodeIndex, NodeKind, ObjectLabel, RunId, SourceId};

/// Common imports for driving a migration
pub mod prelude {
    pub use crate::collaborators::{
        DependencyDiscoverer, Destination, Discovered, MigrationContext, Migrated, SourceObject,
    };
    pub use crate::engine::{migrate, MigrationOutcome};
    pub use crate::error::{CreateFailure, DiscoveryError, MigrationError, PortalError};
    pub use crate::identifier_map::{IdentifierMap, MappingContribution, ServiceMapping};
    pub use crate::scheduler::SchedulerConfig;
    pub use crate::types::{DestinationRef, NodeKind, ObjectLabel, SourceId};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
