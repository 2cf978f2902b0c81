use deepclone_engine::prelude::*;
use deepclone_engine::NodeStatus;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Obj(String);

impl SourceObject for Obj {
    fn source_id(&self) -> SourceId {
        SourceId::new(self.0.clone())
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Item
    }

    fn label(&self) -> ObjectLabel {
        ObjectLabel::new(self.source_id(), NodeKind::Item, "Web Map", self.0.clone())
    }
}

struct TableDiscoverer(HashMap<String, Vec<String>>);

#[async_trait::async_trait]
impl DependencyDiscoverer<Obj> for TableDiscoverer {
    async fn discover(&self, object: &Obj) -> Result<Discovered<Obj>, DiscoveryError> {
        let dependencies = self
            .0
            .get(&object.0)
            .map(|ids| ids.iter().cloned().map(Obj).collect())
            .unwrap_or_default();
        Ok(Discovered::leaf().with_dependencies(dependencies))
    }
}

#[derive(Default)]
struct CountingDestination {
    fail_on: Option<String>,
    creates: Mutex<BTreeMap<String, usize>>,
    deletes: Mutex<BTreeSet<String>>,
    premature: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Destination<Obj> for CountingDestination {
    async fn find_existing(&self, _object: &Obj) -> Result<Option<Migrated>, PortalError> {
        Ok(None)
    }

    async fn create(
        &self,
        object: &Obj,
        context: &MigrationContext<'_, Obj>,
    ) -> Result<Migrated, CreateFailure> {
        *self.creates.lock().entry(object.0.clone()).or_default() += 1;
        if context
            .dependencies
            .iter()
            .any(|dependency| context.identifier_map.item(&dependency.0).is_none())
        {
            self.premature.lock().push(object.0.clone());
        }
        tokio::task::yield_now().await;

        if self.fail_on.as_deref() == Some(object.0.as_str()) {
            return Err(CreateFailure::new(PortalError::Rejected("boom".into())));
        }
        Ok(Migrated::created(DestinationRef::item(
            format!("dst-{}", object.0),
            "Web Map",
            object.0.clone(),
        )))
    }

    async fn delete(&self, object: &DestinationRef) -> Result<(), PortalError> {
        self.deletes.lock().insert(object.id.clone());
        Ok(())
    }
}

/// Node `i` depends on node `j` only when `j < i`, so the table is acyclic
fn dag(node_count: usize, edges: &[(usize, usize)]) -> HashMap<String, Vec<String>> {
    let mut table: HashMap<String, Vec<String>> = (0..node_count)
        .map(|i| (format!("n{i}"), Vec::new()))
        .collect();
    for &(a, b) in edges {
        let (a, b) = (a % node_count, b % node_count);
        if a > b {
            table.entry(format!("n{a}")).or_default().push(format!("n{b}"));
        }
    }
    table
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_acyclic_graph_resolves_every_node_once(
        node_count in 1..25usize,
        edges in proptest::collection::vec((0..25usize, 0..25usize), 0..60),
        worker_limit in 1..8usize,
    ) {
        let table = dag(node_count, &edges);
        let discoverer = TableDiscoverer(table.clone());
        let destination = CountingDestination::default();
        let roots: Vec<Obj> = (0..node_count).map(|i| Obj(format!("n{i}"))).collect();

        let outcome = runtime().block_on(migrate(
            roots,
            IdentifierMap::new(),
            &discoverer,
            &destination,
            SchedulerConfig::default().with_worker_limit(worker_limit),
        ));
        let outcome = outcome.unwrap();

        prop_assert!(outcome.summary.waves <= node_count);
        prop_assert_eq!(outcome.created.len(), node_count);
        prop_assert!(destination.creates.lock().values().all(|&count| count == 1));
        prop_assert!(destination.premature.lock().is_empty());

        // Leaves are always in the first wave
        for node in &outcome.graph.nodes {
            prop_assert_eq!(node.status, NodeStatus::Created);
            if table[node.source_id.as_str()].is_empty() {
                prop_assert_eq!(node.wave, Some(0));
            }
        }
    }

    #[test]
    fn prop_failure_leaves_nothing_behind(
        node_count in 2..20usize,
        edges in proptest::collection::vec((0..20usize, 0..20usize), 0..40),
        failing in 0..20usize,
    ) {
        let table = dag(node_count, &edges);
        let failing = format!("n{}", failing % node_count);
        let discoverer = TableDiscoverer(table);
        let destination = CountingDestination {
            fail_on: Some(failing.clone()),
            ..CountingDestination::default()
        };
        let roots: Vec<Obj> = (0..node_count).map(|i| Obj(format!("n{i}"))).collect();

        let err = runtime()
            .block_on(migrate(
                roots,
                IdentifierMap::new(),
                &discoverer,
                &destination,
                SchedulerConfig::default(),
            ))
            .unwrap_err();

        match &err {
            MigrationError::Creation { failure, .. } => {
                prop_assert_eq!(failure.object.source_id.as_str(), failing.as_str());
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }

        let created: BTreeSet<String> = destination
            .creates
            .lock()
            .keys()
            .filter(|id| **id != failing)
            .map(|id| format!("dst-{id}"))
            .collect();
        prop_assert_eq!(&*destination.deletes.lock(), &created);
    }
}

#[tokio::test]
async fn mutual_dependency_is_no_progress() {
    let discoverer = TableDiscoverer(HashMap::from([
        ("a".to_string(), vec!["b".to_string()]),
        ("b".to_string(), vec!["a".to_string()]),
    ]));
    let destination = CountingDestination::default();

    let err = migrate(
        [Obj("a".into())],
        IdentifierMap::new(),
        &discoverer,
        &destination,
        SchedulerConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, MigrationError::NoProgress { .. }));
    assert!(!err.is_retryable());
    assert!(destination.creates.lock().is_empty());
}

#[tokio::test]
async fn rerun_with_seed_creates_nothing() {
    let discoverer = TableDiscoverer(HashMap::from([
        ("map".to_string(), vec!["svc".to_string()]),
        ("dash".to_string(), vec!["map".to_string(), "svc".to_string()]),
    ]));
    let first = CountingDestination::default();
    let outcome = migrate(
        [Obj("dash".into())],
        IdentifierMap::new(),
        &discoverer,
        &first,
        SchedulerConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.created.len(), 3);

    let second = CountingDestination::default();
    let rerun = migrate(
        [Obj("dash".into())],
        outcome.identifier_map.clone(),
        &discoverer,
        &second,
        SchedulerConfig::default(),
    )
    .await
    .unwrap();

    assert!(rerun.created.is_empty());
    assert_eq!(rerun.summary.seeded, 3);
    assert!(second.creates.lock().is_empty());
    assert_eq!(rerun.identifier_map, outcome.identifier_map);
}
