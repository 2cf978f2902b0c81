//! Testing utilities for the deepclone workspace
//!
//! In-memory portals, content fixtures and tracing setup.

#![allow(missing_docs)]

pub mod source;
pub mod target;

pub use source::InMemorySource;
pub use target::{InMemoryTarget, Share, Upload};

use deepclone_content::model::{LayerDefinition, WebMapData, WebMapLayer, FEATURE_LAYER_TYPE};
use deepclone_content::portal::{
    PRIVILEGE_CREATE_GROUP, PRIVILEGE_CREATE_ITEM, PRIVILEGE_PUBLISH_FEATURES,
    PRIVILEGE_SHARE_TO_GROUP,
};
use deepclone_content::{ContentGroup, ContentItem, ItemData, ItemType, ServiceDefinition};
use tracing_subscriber::EnvFilter;

pub const SOURCE_PORTAL: &str = "https://source.example.com/portal/";
pub const TARGET_PORTAL: &str = "https://target.example.com/portal/";
pub const SOURCE_SERVICES: &str = "https://source.example.com/arcgis/rest/services";
pub const TARGET_SERVICES: &str = "https://target.example.com/arcgis/rest/services";

pub const ALL_PRIVILEGES: [&str; 4] = [
    PRIVILEGE_CREATE_ITEM,
    PRIVILEGE_CREATE_GROUP,
    PRIVILEGE_SHARE_TO_GROUP,
    PRIVILEGE_PUBLISH_FEATURES,
];

/// Install a test subscriber honoring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn source_service_url(name: &str) -> String {
    format!("{SOURCE_SERVICES}/{name}/FeatureServer")
}

pub fn source_portal() -> InMemorySource {
    InMemorySource::new(SOURCE_PORTAL)
}

pub fn target_portal() -> InMemoryTarget {
    InMemoryTarget::new(TARGET_PORTAL, TARGET_SERVICES)
}

/// Hosted feature service with one layer per `(id, name)`, fields included
pub fn feature_service(id: &str, name: &str, layers: &[(u32, &str)]) -> ContentItem {
    feature_service_with_fields(id, name, layers, &["OBJECTID", "Status"])
}

pub fn feature_service_with_fields(
    id: &str,
    name: &str,
    layers: &[(u32, &str)],
    fields: &[&str],
) -> ContentItem {
    let layers = layers
        .iter()
        .map(|(layer_id, layer_name)| {
            let mut layer = LayerDefinition::new(*layer_id, *layer_name).with_fields(fields.iter().copied());
            layer.object_id_field = fields.first().map(ToString::to_string);
            layer
        })
        .collect();
    ContentItem::new(id, name, ItemType::FeatureService)
        .with_url(source_service_url(name))
        .with_data(ItemData::Service(ServiceDefinition {
            layers,
            ..ServiceDefinition::default()
        }))
}

/// Feature layer of a web map pointing at a service layer URL
pub fn feature_layer(url: &str) -> WebMapLayer {
    WebMapLayer {
        id: Some(format!("layer-{}", url.len())),
        url: Some(url.to_string()),
        layer_type: Some(FEATURE_LAYER_TYPE.to_string()),
        ..WebMapLayer::default()
    }
}

pub fn web_map(id: &str, title: &str, layers: Vec<WebMapLayer>) -> ContentItem {
    ContentItem::new(id, title, ItemType::WebMap).with_data(ItemData::WebMap(WebMapData {
        operational_layers: layers,
        ..WebMapData::default()
    }))
}

pub fn group(id: &str, title: &str) -> ContentGroup {
    ContentGroup::new(id, title)
}
