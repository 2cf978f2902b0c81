//! Collaborator traits injected into the engine
//!
//! The engine is generic over the object type it migrates. Everything that needs to
//! understand an object's payload or talk to a portal sits behind these traits:
//! - [`SourceObject`]: identity of a source object
//! - [`DependencyDiscoverer`]: what an object depends on (construction phase)
//! - [`Destination`]: find, create and delete objects at the destination (execution phase)

use crate::error::{CreateFailure, DiscoveryError, PortalError};
use crate::identifier_map::{IdentifierMap, MappingContribution};
use crate::types::{DestinationRef, NodeKind, ObjectLabel, SourceId};

/// An object that can be placed in the dependency graph
pub trait SourceObject: Clone + Send + Sync + 'static {
    /// Identifier in the source portal, unique per kind
    fn source_id(&self) -> SourceId;

    /// Item or group
    fn kind(&self) -> NodeKind;

    /// Identity used in errors and logs
    fn label(&self) -> ObjectLabel;
}

/// Result of inspecting one object
#[derive(Debug, Clone)]
pub struct Discovered<O> {
    /// Objects that must exist at the destination before this one
    pub dependencies: Vec<O>,
    /// Objects that must wait for this one (e.g. items shared into a group)
    pub dependents: Vec<O>,
}

impl<O> Discovered<O> {
    /// No dependencies in either direction
    #[inline]
    #[must_use]
    pub fn leaf() -> Self {
        Self {
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// With dependencies
    #[inline]
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<O>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// With dependents
    #[inline]
    #[must_use]
    pub fn with_dependents(mut self, dependents: Vec<O>) -> Self {
        self.dependents = dependents;
        self
    }
}

impl<O> Default for Discovered<O> {
    fn default() -> Self {
        Self::leaf()
    }
}

/// Type-specific dependency discovery
#[async_trait::async_trait]
pub trait DependencyDiscoverer<O: SourceObject>: Send + Sync {
    /// Inspect an object and return its direct dependencies and dependents
    ///
    /// # Errors
    /// Returns `DiscoveryError` if a referenced object cannot be read or the
    /// object cannot be migrated at all.
    async fn discover(&self, object: &O) -> Result<Discovered<O>, DiscoveryError>;
}

/// Outcome of one successful node migration
#[derive(Debug, Clone)]
pub struct Migrated {
    /// The destination counterpart of the node's object
    pub destination: DestinationRef,
    /// Objects created by this migration, in creation order
    ///
    /// Empty when the counterpart already existed.
    pub created: Vec<DestinationRef>,
    /// Identifier and service mappings to merge after the wave
    pub mappings: MappingContribution,
}

impl Migrated {
    /// A freshly created counterpart
    #[must_use]
    pub fn created(destination: DestinationRef) -> Self {
        Self {
            created: vec![destination.clone()],
            destination,
            mappings: MappingContribution::default(),
        }
    }

    /// A counterpart that already existed at the destination
    #[must_use]
    pub fn existing(destination: DestinationRef) -> Self {
        Self {
            destination,
            created: Vec::new(),
            mappings: MappingContribution::default(),
        }
    }

    /// With an auxiliary object created alongside the counterpart
    #[inline]
    #[must_use]
    pub fn with_auxiliary(mut self, auxiliary: DestinationRef) -> Self {
        self.created.push(auxiliary);
        self
    }

    /// With mapping contributions
    #[inline]
    #[must_use]
    pub fn with_mappings(mut self, mappings: MappingContribution) -> Self {
        self.mappings = mappings;
        self
    }

    /// Check if the counterpart was matched rather than created
    #[inline]
    #[must_use]
    pub fn is_existing(&self) -> bool {
        self.created.is_empty()
    }
}

/// Read-only view handed to [`Destination::create`]
///
/// The identifier map holds every mapping contributed by already-resolved nodes,
/// which always includes this node's direct dependencies.
#[derive(Debug)]
pub struct MigrationContext<'a, O> {
    /// Mappings of every node resolved so far, seed included
    pub identifier_map: &'a IdentifierMap,
    /// Direct dependencies of the object, all resolved
    pub dependencies: Vec<&'a O>,
    /// Dependencies that listed the object as a dependent, such as the groups an
    /// item is shared into
    pub containers: Vec<&'a O>,
    /// Zero-based wave number
    pub wave: usize,
}

impl<'a, O: SourceObject> MigrationContext<'a, O> {
    /// Destination ids of the dependencies of a given kind
    pub fn dependency_destinations(&self, kind: NodeKind) -> impl Iterator<Item = &'a str> + '_ {
        self.resolve_all(&self.dependencies, kind)
    }

    /// Destination ids of the containers of a given kind
    pub fn container_destinations(&self, kind: NodeKind) -> impl Iterator<Item = &'a str> + '_ {
        self.resolve_all(&self.containers, kind)
    }

    fn resolve_all<'s>(
        &'s self,
        objects: &'s [&'a O],
        kind: NodeKind,
    ) -> impl Iterator<Item = &'a str> + 's {
        let identifier_map = self.identifier_map;
        objects
            .iter()
            .filter(move |object| object.kind() == kind)
            .filter_map(move |object| identifier_map.resolve(kind, object.source_id().as_str()))
    }
}

/// The destination portal, as seen by the scheduler and rollback
#[async_trait::async_trait]
pub trait Destination<O: SourceObject>: Send + Sync {
    /// Look for a counterpart created by an earlier run
    ///
    /// Returned `Migrated` values must have an empty `created` list.
    ///
    /// # Errors
    /// Returns `PortalError` if the search itself fails.
    async fn find_existing(&self, object: &O) -> Result<Option<Migrated>, PortalError>;

    /// Create the counterpart of an object
    ///
    /// # Errors
    /// Returns `CreateFailure` carrying every object created before the failing step.
    async fn create(
        &self,
        object: &O,
        context: &MigrationContext<'_, O>,
    ) -> Result<Migrated, CreateFailure>;

    /// Delete a created object during rollback
    ///
    /// # Errors
    /// Returns `PortalError` if the object cannot be removed.
    async fn delete(&self, object: &DestinationRef) -> Result<(), PortalError>;
}
