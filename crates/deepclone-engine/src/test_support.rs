//! In-crate fakes for unit tests

use crate::collaborators::{
    DependencyDiscoverer, Destination, Discovered, MigrationContext, Migrated, SourceObject,
};
use crate::error::{CreateFailure, DiscoveryError, PortalError};
use crate::types::{DestinationRef, NodeKind, ObjectLabel, SourceId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestObject {
    pub id: SourceId,
    pub kind: NodeKind,
}

impl TestObject {
    pub fn item(id: &str) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Item,
        }
    }

    pub fn group(id: &str) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Group,
        }
    }
}

impl SourceObject for TestObject {
    fn source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn label(&self) -> ObjectLabel {
        let content_type = match self.kind {
            NodeKind::Item => "Test Item",
            NodeKind::Group => "Group",
        };
        ObjectLabel::new(self.id.clone(), self.kind, content_type, self.id.as_str())
    }
}

/// Discoverer over a fixed dependency table
#[derive(Default)]
pub(crate) struct StaticDiscoverer {
    dependencies: HashMap<String, Vec<String>>,
    group_dependencies: HashMap<String, Vec<String>>,
    members: HashMap<String, Vec<String>>,
    unreadable: HashSet<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends(mut self, id: &str, on: &[&str]) -> Self {
        self.dependencies
            .insert(id.to_string(), on.iter().map(ToString::to_string).collect());
        self
    }

    pub fn depends_on_group(mut self, id: &str, group: &str) -> Self {
        self.group_dependencies
            .entry(id.to_string())
            .or_default()
            .push(group.to_string());
        self
    }

    pub fn group_members(mut self, group: &str, items: &[&str]) -> Self {
        self.members
            .insert(group.to_string(), items.iter().map(ToString::to_string).collect());
        self
    }

    pub fn unreadable(mut self, id: &str) -> Self {
        self.unreadable.insert(id.to_string());
        self
    }

    pub fn discover_count(&self, id: &str) -> usize {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DependencyDiscoverer<TestObject> for StaticDiscoverer {
    async fn discover(&self, object: &TestObject) -> Result<Discovered<TestObject>, DiscoveryError> {
        let id = object.id.as_str();
        *self.calls.lock().entry(id.to_string()).or_default() += 1;
        if self.unreadable.contains(id) {
            return Err(DiscoveryError::unreadable(id, PortalError::NotFound(id.to_string())));
        }

        match object.kind {
            NodeKind::Item => {
                let items = self.dependencies.get(id).into_iter().flatten();
                let groups = self.group_dependencies.get(id).into_iter().flatten();
                let dependencies = items
                    .map(|id| TestObject::item(id))
                    .chain(groups.map(|id| TestObject::group(id)))
                    .collect();
                Ok(Discovered::leaf().with_dependencies(dependencies))
            }
            NodeKind::Group => {
                let dependents = self
                    .members
                    .get(id)
                    .map(|ids| ids.iter().map(|id| TestObject::item(id)).collect())
                    .unwrap_or_default();
                Ok(Discovered::leaf().with_dependents(dependents))
            }
        }
    }
}

/// Destination that records every call
#[derive(Default)]
pub(crate) struct RecordingDestination {
    fail_on: HashSet<String>,
    partial: bool,
    existing: HashSet<String>,
    fail_delete: HashSet<String>,
    creates: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    unmapped: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, id: &str) -> Self {
        self.fail_on.insert(id.to_string());
        self
    }

    /// Failing creations leave a `partial-<id>` object behind
    pub fn with_partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn with_existing(mut self, id: &str) -> Self {
        self.existing.insert(id.to_string());
        self
    }

    pub fn fail_delete(mut self, destination_id: &str) -> Self {
        self.fail_delete.insert(destination_id.to_string());
        self
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.creates.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    pub fn unmapped_dependencies(&self) -> usize {
        self.unmapped.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn destination_ref(object: &TestObject, id: String) -> DestinationRef {
        match object.kind {
            NodeKind::Item => DestinationRef::item(id, "Test Item", object.id.as_str()),
            NodeKind::Group => DestinationRef::group(id, object.id.as_str()),
        }
    }
}

#[async_trait::async_trait]
impl Destination<TestObject> for RecordingDestination {
    async fn find_existing(&self, object: &TestObject) -> Result<Option<Migrated>, PortalError> {
        Ok(self.existing.contains(object.id.as_str()).then(|| {
            Migrated::existing(Self::destination_ref(object, format!("found-{}", object.id)))
        }))
    }

    async fn create(
        &self,
        object: &TestObject,
        context: &MigrationContext<'_, TestObject>,
    ) -> Result<Migrated, CreateFailure> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.creates.lock().push(object.id.to_string());

        for dependency in &context.dependencies {
            if !context
                .identifier_map
                .contains(dependency.kind, dependency.id.as_str())
            {
                self.unmapped.fetch_add(1, Ordering::SeqCst);
            }
        }

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.contains(object.id.as_str()) {
            let failure = CreateFailure::new(PortalError::Rejected(format!("cannot create {}", object.id)));
            if self.partial {
                let partial = Self::destination_ref(object, format!("partial-{}", object.id));
                return Err(failure.with_partial(vec![partial]));
            }
            return Err(failure);
        }
        Ok(Migrated::created(Self::destination_ref(object, format!("dst-{}", object.id))))
    }

    async fn delete(&self, object: &DestinationRef) -> Result<(), PortalError> {
        if self.fail_delete.contains(&object.id) {
            return Err(PortalError::Transport("connection reset".into()));
        }
        self.deletes.lock().push(object.id.clone());
        Ok(())
    }
}
