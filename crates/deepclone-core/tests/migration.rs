//! End-to-end migrations between in-memory portals.
//!
//! These tests drive `ContentMigrator` through discovery, wave scheduling, payload
//! rewriting and rollback against the portals of `deepclone-test-utils`:
//! - a web map lands after the service it references, pointing at the new layer
//! - any failure leaves nothing behind at the destination
//! - a second run reuses what the first one created
//! - views, forms and template apps keep their links to what they depend on

use deepclone_content::model::{
    ItemData, LayerDefinition, WebMapLayer, MAP_SERVICE_LAYER_TYPE, WEB_APPBUILDER_KEYWORD,
};
use deepclone_content::portal::{APP_TO_CODE, PRIVILEGE_CREATE_ITEM, SURVEY_TO_SERVICE};
use deepclone_content::{ContentItem, ItemType, ServiceDefinition, TargetPortal};
use deepclone_core::{CloneError, ContentMigrator, MigrationConfig, MigrationReport, Root};
use deepclone_engine::{DiscoveryError, IdentifierMap, MigrationError, NodeKind};
use deepclone_test_utils::{
    feature_layer, feature_service, group, init_tracing, source_portal, source_service_url,
    target_portal, web_map, InMemorySource, InMemoryTarget, SOURCE_SERVICES, TARGET_SERVICES,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Source with ServiceY (layer 3) and MapX showing that layer.
fn map_x_source() -> InMemorySource {
    let layer_url = format!("{}/3", source_service_url("ServiceY_src"));
    source_portal()
        .with_item(feature_service("svc_y", "ServiceY_src", &[(3, "Roads")]))
        .with_item(web_map("map_x", "MapX", vec![feature_layer(&layer_url)]))
}

async fn run(
    source: &Arc<InMemorySource>,
    target: &Arc<InMemoryTarget>,
    roots: &[Root],
    seed: IdentifierMap,
) -> Result<MigrationReport, CloneError> {
    run_with(source, target, roots, seed, MigrationConfig::default()).await
}

async fn run_with(
    source: &Arc<InMemorySource>,
    target: &Arc<InMemoryTarget>,
    roots: &[Root],
    seed: IdentifierMap,
    config: MigrationConfig,
) -> Result<MigrationReport, CloneError> {
    init_tracing();
    let migrator = ContentMigrator::new(Arc::clone(source), Arc::clone(target), config)?;
    migrator.migrate(roots, seed).await
}

/// View service named `name` over the given `(view layer, source layer URL)` pairs
fn view_service(id: &str, name: &str, sources: &[(u32, &str)]) -> ContentItem {
    let layers = sources
        .iter()
        .map(|(layer_id, _)| {
            LayerDefinition::new(*layer_id, format!("{name} {layer_id}")).with_fields(["OBJECTID", "Status"])
        })
        .collect();
    ContentItem::new(id, name, ItemType::FeatureService)
        .with_url(source_service_url(name))
        .with_data(ItemData::Service(ServiceDefinition {
            is_view: true,
            layers,
            ..ServiceDefinition::default()
        }))
}

fn web_map_data(item: &ContentItem) -> deepclone_content::model::WebMapData {
    match &item.data {
        Some(ItemData::WebMap(map)) => map.clone(),
        other => panic!("expected web map payload, got {other:?}"),
    }
}

/// Tenet: dependencies are created first and references follow the layer mapping.
#[tokio::test]
async fn web_map_points_at_recreated_service_layer() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().with_layer_offset(4));

    let report = run(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new()).await?;

    assert_eq!(report.waves, 2);
    let types: Vec<&str> = report.created.iter().map(|c| c.content_type.as_str()).collect();
    assert_eq!(types, vec!["Feature Service", "Web Map"]);

    let service = &report.created[0];
    let service_url = service.url.clone().expect("service url");
    assert!(service_url.starts_with("https://target.example.com/arcgis/rest/services/ServiceY_src_"));

    let map = target.item_by_title("MapX").expect("map created");
    let layer = &web_map_data(&map).operational_layers[0];
    assert_eq!(layer.url.as_deref(), Some(format!("{service_url}/7").as_str()));
    assert_eq!(layer.item_id.as_deref(), Some(service.id.as_str()));
    assert!(map.has_marker("source-map_x"));

    assert_eq!(report.identifier_map.item("svc_y"), Some(service.id.as_str()));
    assert_eq!(report.identifier_map.item("map_x"), Some(report.created[1].id.as_str()));
    Ok(())
}

/// Tenet: a failure after a partial creation rolls everything back, and dependents
/// of the failing node are never attempted.
#[tokio::test]
async fn failed_service_is_rolled_back_before_map_is_attempted() {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().with_failing_definitions());

    let err = run(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    match &err {
        CloneError::Migration(MigrationError::Creation { failure, rollback }) => {
            assert_eq!(failure.object.source_id.as_str(), "svc_y");
            assert_eq!(failure.wave, 0);
            assert!(rollback.is_clean());
            assert_eq!(rollback.deleted.len(), 1);
        }
        other => panic!("expected creation failure, got {other:?}"),
    }
    assert!(err.is_retryable(), "timeouts are transient");

    // The service was published, then removed; the map never was
    assert_eq!(target.created().len(), 1);
    assert_eq!(target.deleted(), target.created());
    assert!(target.items().is_empty());
    assert!(target.item_by_title("MapX").is_none());
}

/// Tenet: a rejected creation leaves nothing behind and is not retryable.
#[tokio::test]
async fn rejected_service_creates_nothing() {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().fail_on("ServiceY_src"));

    let err = run(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CloneError::Migration(MigrationError::Creation { .. })));
    assert!(!err.is_retryable());
    assert!(target.created().is_empty());
    assert!(target.deleted().is_empty());
}

/// Tenet: a second run finds what the first created instead of duplicating it.
#[tokio::test]
async fn rerun_matches_existing_objects() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().with_layer_offset(4));
    let roots = [Root::Item("map_x".into())];

    let first = run(&source, &target, &roots, IdentifierMap::new()).await?;
    let second = run(&source, &target, &roots, IdentifierMap::new()).await?;

    assert!(second.created.is_empty());
    assert_eq!(second.matched_existing, 2);
    assert_eq!(target.items().len(), 2);
    assert_eq!(second.identifier_map.item("map_x"), first.identifier_map.item("map_x"));

    let service_url = first.created[0].url.clone().expect("service url");
    let mapping = second
        .identifier_map
        .service(&source_service_url("ServiceY_src"))
        .expect("service mapping recomputed");
    assert_eq!(mapping.layer_url(3), format!("{service_url}/7"));
    Ok(())
}

/// Tenet: a run seeded with the previous run's mappings creates nothing.
#[tokio::test]
async fn rerun_with_seed_creates_nothing() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal());
    let roots = [Root::Item("map_x".into())];

    let first = run(&source, &target, &roots, IdentifierMap::new()).await?;
    let second = run(&source, &target, &roots, first.identifier_map.clone()).await?;

    assert!(second.created.is_empty());
    assert_eq!(second.seeded, 2);
    assert_eq!(second.matched_existing, 0);
    assert_eq!(target.items().len(), 2);
    Ok(())
}

/// Tenet: seeds naming objects that do not exist are rejected before anything runs.
#[tokio::test]
async fn invalid_seed_is_rejected() {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal());
    let seed = IdentifierMap::new().with_items([("svc_y", "not-there")]);

    let err = run(&source, &target, &[Root::Item("map_x".into())], seed)
        .await
        .unwrap_err();

    assert!(matches!(err, CloneError::InvalidSeed { .. }));
    assert!(err.is_fatal());
    assert!(target.created().is_empty());
}

/// Tenet: a shared dependency is created once and group members are shared to the
/// recreated group.
#[tokio::test]
async fn group_members_share_one_service() -> anyhow::Result<()> {
    let layer_url = format!("{}/3", source_service_url("ServiceY_src"));
    let source = Arc::new(
        source_portal()
            .with_item(feature_service("svc_y", "ServiceY_src", &[(3, "Roads")]))
            .with_item(web_map("map_a", "MapA", vec![feature_layer(&layer_url)]))
            .with_item(web_map("map_b", "MapB", vec![feature_layer(&layer_url)]))
            .with_group(group("g1", "Field Crews"), ["map_a", "map_b"]),
    );
    let target = Arc::new(target_portal());

    let report = run(&source, &target, &[Root::Group("g1".into())], IdentifierMap::new()).await?;

    assert_eq!(report.created.len(), 4);
    assert_eq!(report.waves, 2);
    let services = target
        .items()
        .into_iter()
        .filter(|item| item.item_type == ItemType::FeatureService)
        .count();
    assert_eq!(services, 1);

    let new_group = target.group_by_title("Field Crews").expect("group created");
    assert!(new_group.tags.contains(&"source-g1".to_string()));
    let mut shared: Vec<String> = target
        .shares()
        .into_iter()
        .filter(|share| share.groups == vec![new_group.id.clone()])
        .map(|share| share.item_id)
        .collect();
    shared.sort();
    let mut maps = vec![
        target.item_by_title("MapA").expect("map a").id,
        target.item_by_title("MapB").expect("map b").id,
    ];
    maps.sort();
    assert_eq!(shared, maps);
    Ok(())
}

/// Tenet: group titles taken at the destination get a numeric suffix.
#[tokio::test]
async fn taken_group_title_gets_suffix() -> anyhow::Result<()> {
    let source = Arc::new(source_portal().with_group(group("g1", "Field Crews"), Vec::<String>::new()));
    let target = Arc::new(target_portal());
    target.insert_group(group("other", "Field Crews"));

    let report = run(&source, &target, &[Root::Group("g1".into())], IdentifierMap::new()).await?;

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].kind, NodeKind::Group);
    assert_eq!(report.created[0].title, "Field Crews 2");
    Ok(())
}

/// Tenet: missing privileges fail the run before anything is created.
#[tokio::test]
async fn missing_group_privilege_is_reported() {
    let source = Arc::new(source_portal().with_group(group("g1", "Field Crews"), Vec::<String>::new()));
    let target = Arc::new(target_portal().with_privileges(&[PRIVILEGE_CREATE_ITEM]));

    let err = run(&source, &target, &[Root::Group("g1".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    match err {
        CloneError::MissingPrivilege(privilege) => assert_eq!(privilege, "portal:user:createGroup"),
        other => panic!("expected missing privilege, got {other:?}"),
    }
    assert!(target.created().is_empty());
}

/// Tenet: renamed fields are followed into popups and definition expressions.
#[tokio::test]
async fn renamed_fields_are_rewritten_in_web_map() -> anyhow::Result<()> {
    let layer_url = format!("{}/0", source_service_url("Hydrants"));
    let mut layer = feature_layer(&layer_url);
    layer.popup_info = Some(json!({
        "title": "{Status}",
        "fieldInfos": [{ "fieldName": "OBJECTID" }, { "fieldName": "Status" }]
    }));
    layer.layer_definition = Some(json!({ "definitionExpression": "Status = 'open'" }));

    let source = Arc::new(
        source_portal()
            .with_item(feature_service("svc_h", "Hydrants", &[(0, "Hydrants")]))
            .with_item(web_map("map_h", "Hydrant Map", vec![layer])),
    );
    let target = Arc::new(target_portal().with_lowercase_fields());

    run(&source, &target, &[Root::Item("map_h".into())], IdentifierMap::new()).await?;

    let map = target.item_by_title("Hydrant Map").expect("map created");
    let layer = &web_map_data(&map).operational_layers[0];
    let popup = layer.popup_info.as_ref().expect("popup kept");
    assert_eq!(popup["title"], "{status}");
    assert_eq!(popup["fieldInfos"][0]["fieldName"], "objectid");
    assert_eq!(popup["fieldInfos"][1]["fieldName"], "status");
    assert_eq!(
        layer.layer_definition.as_ref().expect("definition kept")["definitionExpression"],
        "status = 'open'"
    );
    Ok(())
}

/// Tenet: Web AppBuilder apps move to the new portal with a code attachment.
#[tokio::test]
async fn web_appbuilder_app_gets_code_attachment() -> anyhow::Result<()> {
    let app = ContentItem::new("app_1", "Viewer", ItemType::WebMappingApplication)
        .with_type_keywords([WEB_APPBUILDER_KEYWORD])
        .with_url("https://source.example.com/portal/apps/webappviewer/index.html?id=app_1")
        .with_data(ItemData::Application(json!({
            "portalUrl": "https://source.example.com/portal/",
            "map": { "itemId": "map_x" }
        })));
    let source = Arc::new(map_x_source().with_item(app));
    let target = Arc::new(target_portal());

    let report = run(&source, &target, &[Root::Item("app_1".into())], IdentifierMap::new()).await?;

    assert_eq!(report.waves, 3);
    assert_eq!(report.created.len(), 4);

    let new_app = target
        .items()
        .into_iter()
        .find(|item| item.item_type == ItemType::WebMappingApplication)
        .expect("app created");
    assert_eq!(
        new_app.url.as_deref(),
        Some(format!("https://target.example.com/portal/apps/webappviewer/index.html?id={}", new_app.id).as_str())
    );
    let Some(ItemData::Application(config)) = &new_app.data else {
        panic!("expected application payload");
    };
    assert_eq!(config["map"]["itemId"], report.identifier_map.item("map_x").expect("map mapped"));
    assert_eq!(config["portalUrl"], "https://target.example.com/portal/");

    let attachment = target
        .items()
        .into_iter()
        .find(|item| item.item_type == ItemType::CodeAttachment)
        .expect("code attachment created");
    assert_eq!(target.origin_of(&attachment.id), Some((new_app.id.clone(), APP_TO_CODE.to_string())));
    Ok(())
}

/// Tenet: items land in the configured folder, which is created when missing.
#[tokio::test]
async fn target_folder_is_created() -> anyhow::Result<()> {
    init_tracing();
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal());
    let config = MigrationConfig::default().with_target_folder("Migrated");

    let migrator = ContentMigrator::new(Arc::clone(&source), Arc::clone(&target), config)?;
    migrator.migrate(&[Root::Item("svc_y".into())], IdentifierMap::new()).await?;

    assert_eq!(target.folders(), vec!["Migrated".to_string()]);
    Ok(())
}

/// Tenet: an unreadable dependency stops the run before anything is created.
#[tokio::test]
async fn unreadable_dependency_creates_nothing() {
    let mut collection = feature_layer("ignored");
    collection.collection_type = Some("Feature Collection".into());
    collection.item_id = Some("fc_1".into());
    let source = Arc::new(
        source_portal()
            .with_item(web_map("map_c", "Sites", vec![collection]))
            .unreadable("fc_1"),
    );
    let target = Arc::new(target_portal());

    let err = run(&source, &target, &[Root::Item("map_c".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CloneError::Migration(MigrationError::Discovery(_))));
    assert!(target.created().is_empty());
}

/// Tenet: an item is shared only into groups it is a member of, not into groups it
/// merely references.
#[tokio::test]
async fn template_app_is_not_shared_into_its_group() -> anyhow::Result<()> {
    let app = ContentItem::new("app_t", "Gallery", ItemType::WebMappingApplication).with_data(
        ItemData::Application(json!({ "values": { "webmap": "map_x", "group": "g1" } })),
    );
    let source = Arc::new(
        map_x_source()
            .with_item(app)
            .with_group(group("g1", "Field Crews"), Vec::<String>::new()),
    );
    let target = Arc::new(target_portal());

    let report = run(&source, &target, &[Root::Item("app_t".into())], IdentifierMap::new()).await?;

    assert_eq!(report.created.len(), 4);
    let new_group = target.group_by_title("Field Crews").expect("group created");
    let new_app = target.item_by_title("Gallery").expect("app created");
    let Some(ItemData::Application(config)) = &new_app.data else {
        panic!("expected application payload");
    };
    assert_eq!(config["values"]["group"], new_group.id.as_str());
    assert!(
        target.shares().iter().all(|share| !share.groups.contains(&new_group.id)),
        "nothing is a member of the group"
    );
    Ok(())
}

/// Tenet: a seeded map service moves map service layers to the seeded service.
#[tokio::test]
async fn seeded_map_service_layer_is_rewritten() -> anyhow::Result<()> {
    let source_url = format!("{SOURCE_SERVICES}/Base/MapServer");
    let destination_url = format!("{TARGET_SERVICES}/Base2/MapServer");
    let layer = WebMapLayer {
        id: Some("base".into()),
        url: Some(source_url.clone()),
        layer_type: Some(MAP_SERVICE_LAYER_TYPE.into()),
        ..WebMapLayer::default()
    };
    let source = Arc::new(
        source_portal()
            .with_item(ContentItem::new("ms_src", "Base", ItemType::MapService).with_url(&source_url))
            .with_item(web_map("map_b", "Basemap Review", vec![layer])),
    );
    let target = Arc::new(target_portal());
    target.insert_item(ContentItem::new("ms_dst", "Base2", ItemType::MapService).with_url(&destination_url));
    let seed = IdentifierMap::new().with_items([("ms_src", "ms_dst")]);

    let report = run(&source, &target, &[Root::Item("map_b".into())], seed).await?;

    assert_eq!(report.seeded, 1);
    assert_eq!(report.created.len(), 1);
    let map = target.item_by_title("Basemap Review").expect("map created");
    let layer = &web_map_data(&map).operational_layers[0];
    assert_eq!(layer.url.as_deref(), Some(destination_url.as_str()));
    assert_eq!(layer.item_id.as_deref(), Some("ms_dst"));
    Ok(())
}

/// Tenet: seed validation bounds each portal call, not the whole validation.
#[tokio::test(start_paused = true)]
async fn slow_seed_validation_completes_within_per_call_timeout() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().with_latency(Duration::from_secs(1)));
    let ItemData::Service(definition) = feature_service("svc_y", "ServiceY_src", &[(3, "Roads")])
        .data
        .expect("service payload")
    else {
        panic!("expected service payload");
    };
    target.insert_item(
        ContentItem::new("svc_dst", "ServiceY_src", ItemType::FeatureService)
            .with_url(format!("{TARGET_SERVICES}/ServiceY_dst/FeatureServer"))
            .with_data(ItemData::Service(definition)),
    );
    target.insert_item(web_map("map_dst", "MapX", Vec::new()));
    let seed = IdentifierMap::new().with_items([("svc_y", "svc_dst"), ("map_x", "map_dst")]);
    let config = MigrationConfig::default().with_request_timeout_secs(2);

    // Three slow calls in total, each within the timeout
    let report = run_with(&source, &target, &[Root::Item("map_x".into())], seed, config).await?;

    assert_eq!(report.seeded, 2);
    assert!(report.created.is_empty());
    Ok(())
}

/// Tenet: a view is recreated over the recreated copy of its source service.
#[tokio::test]
async fn view_is_linked_to_recreated_source() -> anyhow::Result<()> {
    let source_layer = format!("{}/3", source_service_url("ServiceY_src"));
    let source = Arc::new(
        map_x_source()
            .with_item(view_service("view_y", "OpenRoads", &[(0, source_layer.as_str())]))
            .with_view_sources(&source_service_url("OpenRoads"), &[(0, source_layer.as_str())]),
    );
    let target = Arc::new(target_portal().with_layer_offset(4));

    let report = run(&source, &target, &[Root::Item("view_y".into())], IdentifierMap::new()).await?;

    assert_eq!(report.waves, 2);
    let service_url = report.created[0].url.clone().expect("service url");
    let service_name = service_url
        .trim_end_matches("/FeatureServer")
        .rsplit('/')
        .next()
        .expect("service name");
    let view_url = report.created[1].url.clone().expect("view url");
    let view = target.service_definition(&view_url).await?;

    assert!(view.is_view);
    let layer = &view.layers[0];
    assert_eq!(layer.id, 4);
    assert!(layer.fields.is_empty());
    assert_eq!(
        layer.extra["adminLayerInfo"]["viewLayerDefinition"],
        json!({
            "sourceServiceName": service_name,
            "sourceLayerId": 7,
            "sourceLayerFields": "*"
        })
    );

    let mapping = report
        .identifier_map
        .service(&source_service_url("OpenRoads"))
        .expect("view mapping");
    assert_eq!(mapping.layer_url(0), format!("{view_url}/4"));
    Ok(())
}

/// Tenet: a view joining several source services is refused before anything runs.
#[tokio::test]
async fn view_over_two_services_is_unsupported() {
    let roads = format!("{}/3", source_service_url("ServiceY_src"));
    let hydrants = format!("{}/0", source_service_url("Hydrants"));
    let source = Arc::new(
        map_x_source()
            .with_item(feature_service("svc_h", "Hydrants", &[(0, "Hydrants")]))
            .with_item(view_service("view_j", "Joined", &[(0, roads.as_str()), (1, hydrants.as_str())]))
            .with_view_sources(&source_service_url("Joined"), &[(0, roads.as_str()), (1, hydrants.as_str())]),
    );
    let target = Arc::new(target_portal());

    let err = run(&source, &target, &[Root::Item("view_j".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    match err {
        CloneError::Migration(MigrationError::Discovery(DiscoveryError::Unsupported { id, .. })) => {
            assert_eq!(id.as_str(), "view_j");
        }
        other => panic!("expected unsupported view, got {other:?}"),
    }
    assert!(target.created().is_empty());
}

/// Tenet: a survey form lands after the feature service it collects into.
#[tokio::test]
async fn form_follows_its_survey_service() -> anyhow::Result<()> {
    let source = Arc::new(
        map_x_source()
            .with_item(ContentItem::new("form_1", "Inspection", ItemType::Form))
            .with_related("form_1", SURVEY_TO_SERVICE, &["svc_y"]),
    );
    let target = Arc::new(target_portal());

    let report = run(&source, &target, &[Root::Item("form_1".into())], IdentifierMap::new()).await?;

    assert_eq!(report.waves, 2);
    let titles: Vec<&str> = report.created.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["ServiceY_src", "Inspection"]);
    Ok(())
}

/// Tenet: with the organization basemap enabled, web maps take it without the
/// layers' resource info.
#[tokio::test]
async fn web_map_takes_org_basemap() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().with_basemap(json!({
        "title": "Topographic",
        "baseMapLayers": [{
            "id": "topo",
            "url": "https://tiles.example.com/Topo/MapServer",
            "resourceInfo": { "tileInfo": {} }
        }]
    })));
    let config = MigrationConfig::default().with_org_basemap(true);

    run_with(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new(), config).await?;

    let map = target.item_by_title("MapX").expect("map created");
    assert_eq!(
        web_map_data(&map).base_map,
        Some(json!({
            "title": "Topographic",
            "baseMapLayers": [{ "id": "topo", "url": "https://tiles.example.com/Topo/MapServer" }]
        }))
    );
    Ok(())
}

/// Tenet: thumbnails are uploaded from scratch space that is gone once the
/// object is created.
#[tokio::test]
async fn thumbnail_is_uploaded_from_scratch_space() -> anyhow::Result<()> {
    let source = Arc::new(map_x_source().with_thumbnail("svc_y", "roads.png", b"png-bytes"));
    let target = Arc::new(target_portal());

    run(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new()).await?;

    let uploads = target.uploads();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.title, "ServiceY_src");
    assert_eq!(upload.bytes, b"png-bytes".to_vec());
    assert_eq!(upload.path.file_name().and_then(|name| name.to_str()), Some("roads.png"));
    let scratch = upload.path.parent().expect("scratch dir");
    assert!(scratch
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("deepclone-")));
    assert!(!scratch.exists());
    Ok(())
}

/// Tenet: an object that cannot be deleted during rollback is reported and the
/// original failure is kept.
#[tokio::test]
async fn undeletable_object_is_reported_by_rollback() {
    let source = Arc::new(map_x_source());
    let target = Arc::new(target_portal().fail_on("MapX").fail_delete("ServiceY_src"));

    let err = run(&source, &target, &[Root::Item("map_x".into())], IdentifierMap::new())
        .await
        .unwrap_err();

    let CloneError::Migration(migration) = &err else {
        panic!("expected migration failure, got {err:?}");
    };
    assert_eq!(migration.failed_object().map(|o| o.source_id.as_str()), Some("map_x"));
    let rollback = migration.rollback_report().expect("rollback attempted");
    assert!(!rollback.is_clean());
    assert_eq!(rollback.failures.len(), 1);
    assert_eq!(rollback.failures[0].object.title, "ServiceY_src");
    assert!(target.deleted().is_empty());
    assert!(target.item_by_title("ServiceY_src").is_some());
}
