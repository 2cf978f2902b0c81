//! Payload rewriting
//!
//! Before an item is created in the destination, every reference its payload holds
//! to other migrated objects is translated through the [`IdentifierMap`]:
//!
//! - Web maps: layer and table URLs, service item ids, renamed fields, feature
//!   collection item ids, map image layer URLs
//! - Dashboards: map widget item ids, dataset item ids and layer ids
//! - Operation views: map widget ids, standalone data source ids and URLs
//! - View services: each layer's source service and layer, once the source
//!   layers are known (see [`rewrite_view_definition`])
//! - Applications: structured Web AppBuilder and template properties, then a
//!   text-level pass over the serialized payload
//! - Anything else: string occurrences of mapped ids
//!
//! # Critical Invariant
//!
//! Rewriting only reads the map. A reference that must resolve (a dashboard's map, a
//! template's group) and does not is an error, never a silent pass-through: the
//! dependency graph guarantees it was mapped before this item's wave.

pub mod fields;

use crate::error::ContentError;
use crate::model::{
    ContentItem, DashboardData, ItemData, ItemType, OperationViewData, ServiceDefinition,
    WebMapData, WebMapLayer,
};
use crate::portal::ViewLayerSource;
use deepclone_engine::identifier_map::split_layer_url;
use deepclone_engine::IdentifierMap;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};

/// Key of the web map widget in dashboards and operation views
const MAP_WIDGET: &str = "mapWidget";

/// Marker of application URLs pointing inside a portal
const APPS_PATH: &str = "/apps/";

/// Settings of the destination that payloads are rewritten for
#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteOptions<'a> {
    /// Base URL of the destination portal, ending with `/`
    pub target_portal_url: &'a str,
    /// Destination folder id for application templates
    pub folder_id: Option<&'a str>,
    /// Replacement basemap for web maps
    pub basemap: Option<&'a Value>,
    /// Keep the features stored in feature collections
    pub copy_data: bool,
}

/// Rewrite an item's payload for the destination
///
/// # Errors
/// Returns `ContentError` if a required reference is unmapped or the payload cannot
/// be re-encoded.
pub fn rewrite_payload(
    item: &ContentItem,
    ids: &IdentifierMap,
    options: &RewriteOptions<'_>,
) -> Result<Option<ItemData>, ContentError> {
    let Some(data) = item.data.clone() else {
        return Ok(None);
    };

    let rewritten = match data {
        ItemData::WebMap(mut map) => {
            rewrite_web_map(&mut map, ids)?;
            if let Some(basemap) = options.basemap {
                apply_basemap(&mut map, basemap);
            }
            ItemData::WebMap(map)
        }
        ItemData::Dashboard(mut dashboard) => {
            rewrite_dashboard(&mut dashboard, ids)?;
            ItemData::Dashboard(dashboard)
        }
        ItemData::OperationView(mut view) => {
            rewrite_operation_view(&mut view, ids)?;
            ItemData::OperationView(view)
        }
        ItemData::Application(app) => {
            ItemData::Application(rewrite_application(item, app, ids, options)?)
        }
        // View layers need their source layers, linked by the destination
        ItemData::Service(definition) => ItemData::Service(definition),
        ItemData::Json(mut value) => {
            if !options.copy_data && item.item_type == ItemType::FeatureCollection {
                strip_features(&mut value);
            }
            rewrite_ids(&mut value, ids);
            ItemData::Json(value)
        }
    };
    Ok(Some(rewritten))
}

// ---------------------------------------------------------------------------
// Web maps
// ---------------------------------------------------------------------------

/// Point a web map's layers and tables at the destination services
///
/// # Errors
/// Returns `ContentError::Pattern` if a renamed field cannot be turned into a pattern.
pub fn rewrite_web_map(map: &mut WebMapData, ids: &IdentifierMap) -> Result<(), ContentError> {
    for layer in map
        .operational_layers
        .iter_mut()
        .chain(map.tables.iter_mut())
    {
        rewrite_layer(layer, ids)?;
    }
    Ok(())
}

fn rewrite_layer(layer: &mut WebMapLayer, ids: &IdentifierMap) -> Result<(), ContentError> {
    if let Some(item_id) = layer.item_id.as_mut() {
        if let Some(destination) = ids.item(item_id) {
            *item_id = destination.to_string();
        }
    }
    if layer.is_feature_collection() {
        return Ok(());
    }

    let Some(url) = layer.url.as_deref() else {
        return Ok(());
    };

    if layer.is_map_service_layer() {
        if let Some(mapping) = ids.service(url) {
            layer.url = Some(mapping.destination_url.clone());
            layer.item_id = Some(mapping.destination_id.clone());
        }
        return Ok(());
    }

    let Some((mapping, layer_id)) = ids.layer(url) else {
        return Ok(());
    };
    layer.url = Some(mapping.layer_url(layer_id));
    layer.item_id = Some(mapping.destination_id.clone());
    if let Some(renamed) = mapping.fields_for(layer_id) {
        fields::rewrite_layer_fields(layer, renamed)?;
    }
    if let Some(related) = mapping.relationship_fields.get(&layer_id) {
        fields::rewrite_related_fields(layer, related)?;
    }
    Ok(())
}

/// Replace a web map's basemap with the organization default
///
/// Only the title and basemap layers are kept; layer `resourceInfo` is dropped.
pub fn apply_basemap(map: &mut WebMapData, basemap: &Value) {
    let mut replacement = Map::new();
    if let Some(title) = basemap.get("title") {
        replacement.insert("title".into(), title.clone());
    }
    if let Some(layers) = basemap.get("baseMapLayers").and_then(Value::as_array) {
        let layers = layers
            .iter()
            .cloned()
            .map(|mut layer| {
                if let Some(layer) = layer.as_object_mut() {
                    layer.remove("resourceInfo");
                }
                layer
            })
            .collect();
        replacement.insert("baseMapLayers".into(), Value::Array(layers));
    }
    map.base_map = Some(Value::Object(replacement));
}

// ---------------------------------------------------------------------------
// Dashboards and operation views
// ---------------------------------------------------------------------------

fn mapped_item(ids: &IdentifierMap, source: &str) -> Result<String, ContentError> {
    ids.item(source)
        .map(str::to_string)
        .ok_or_else(|| ContentError::unmapped_item(source))
}

fn replace_item_id(value: &mut Value, key: &str, ids: &IdentifierMap) -> Result<(), ContentError> {
    if let Some(Value::String(source)) = value.get_mut(key) {
        *source = mapped_item(ids, source)?;
    }
    Ok(())
}

fn is_widget(value: &Value, widget_type: &str) -> bool {
    value.get("type").and_then(Value::as_str) == Some(widget_type)
}

/// Point a dashboard's widgets at the destination map and services
///
/// # Errors
/// Returns `ContentError::Unmapped` if a referenced item has no mapping.
pub fn rewrite_dashboard(dashboard: &mut DashboardData, ids: &IdentifierMap) -> Result<(), ContentError> {
    for widget in &mut dashboard.widgets {
        if is_widget(widget, MAP_WIDGET) {
            replace_item_id(widget, "itemId", ids)?;
        }
        rewrite_datasets(widget, ids)?;
    }

    for panel in [dashboard.header_panel.as_mut(), dashboard.left_panel.as_mut()]
        .into_iter()
        .flatten()
    {
        if let Some(selectors) = panel.get_mut("selectors").and_then(Value::as_array_mut) {
            for selector in selectors {
                rewrite_datasets(selector, ids)?;
            }
        }
    }
    Ok(())
}

fn rewrite_datasets(holder: &mut Value, ids: &IdentifierMap) -> Result<(), ContentError> {
    let Some(datasets) = holder.get_mut("datasets").and_then(Value::as_array_mut) else {
        return Ok(());
    };
    for dataset in datasets {
        let Some(source) = dataset.get_mut("dataSource") else {
            continue;
        };
        let Some(source_id) = source.get("itemId").and_then(Value::as_str) else {
            continue;
        };
        let destination_id = mapped_item(ids, source_id)?;

        if let Some(mapping) = ids.service_by_destination_id(&destination_id) {
            let layer = source
                .get("layerId")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok());
            if let Some(layer) = layer {
                source["layerId"] = Value::from(mapping.destination_layer(layer));
            }
        }
        source["itemId"] = Value::String(destination_id);
    }
    Ok(())
}

/// Point an operation view at the destination maps and services
///
/// # Errors
/// Returns `ContentError::Unmapped` if a referenced item has no mapping.
pub fn rewrite_operation_view(
    view: &mut OperationViewData,
    ids: &IdentifierMap,
) -> Result<(), ContentError> {
    for widget in &mut view.widgets {
        if is_widget(widget, MAP_WIDGET) {
            replace_item_id(widget, "mapId", ids)?;
        }
    }

    for source in &mut view.standalone_data_sources {
        if let Some(item_id) = source.service_item_id.as_mut() {
            *item_id = mapped_item(ids, item_id)?;
        }
        if let Some(url) = source.url.as_mut() {
            let rewritten = ids
                .rewrite_layer_url(url)
                .or_else(|| ids.service(url).map(|m| m.destination_url.clone()));
            if let Some(rewritten) = rewritten {
                *url = rewritten;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// View services
// ---------------------------------------------------------------------------

/// Link every layer of a view service to the destination copy of its source layer
///
/// Each layer gets an `adminLayerInfo.viewLayerDefinition` naming the destination
/// source service and layer id. Field lists are dropped; a view takes its fields
/// from the source layer.
///
/// # Errors
/// Returns `ContentError::InvalidData` if a layer has no source, or its source
/// service has no destination mapping.
pub fn rewrite_view_definition(
    view_id: &str,
    definition: &mut ServiceDefinition,
    sources: &[ViewLayerSource],
    ids: &IdentifierMap,
) -> Result<(), ContentError> {
    for layer in definition.layers.iter_mut().chain(definition.tables.iter_mut()) {
        let source = sources
            .iter()
            .find(|source| source.layer_id == layer.id)
            .ok_or_else(|| {
                ContentError::invalid_data(view_id, format!("view layer {} has no source layer", layer.id))
            })?;
        let (mapping, source_layer) = split_layer_url(&source.source_url)
            .and_then(|(service_url, layer_id)| ids.service(service_url).map(|m| (m, layer_id)))
            .ok_or_else(|| {
                ContentError::invalid_data(
                    view_id,
                    format!("source layer {} was not migrated", source.source_url),
                )
            })?;

        layer.extra.insert(
            "adminLayerInfo".into(),
            json!({
                "viewLayerDefinition": {
                    "sourceServiceName": service_name(&mapping.destination_url),
                    "sourceLayerId": mapping.destination_layer(source_layer),
                    "sourceLayerFields": "*"
                }
            }),
        );
        layer.extra.remove("hasViews");
        layer.fields.clear();
    }
    Ok(())
}

/// Name of a service: `.../services/Roads/FeatureServer` → `Roads`
fn service_name(service_url: &str) -> &str {
    service_url
        .trim_end_matches('/')
        .rsplit('/')
        .nth(1)
        .unwrap_or(service_url)
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

/// Rewrite an application's configuration
///
/// Story maps are left untouched. Web AppBuilder apps get their portal, map and proxy
/// settings pointed at the destination; configurable templates their folder, group
/// and web maps. The serialized result then has mapped service URLs, item ids,
/// renamed fields and the source organization URL replaced.
///
/// # Errors
/// Returns `ContentError` if a template reference is unmapped or the configuration
/// no longer parses after the text-level pass.
pub fn rewrite_application(
    item: &ContentItem,
    mut app: Value,
    ids: &IdentifierMap,
    options: &RewriteOptions<'_>,
) -> Result<Value, ContentError> {
    if item.is_story_map() {
        return Ok(app);
    }

    if item.is_web_appbuilder() {
        rewrite_web_appbuilder(&mut app, ids, options.target_portal_url)?;
    } else {
        rewrite_template(&mut app, ids, options.folder_id)?;
    }

    let mut text = serde_json::to_string(&app)?;
    text = replace_service_urls(&text, ids)?;
    for (source, destination) in ids.items().chain(ids.groups()) {
        let pattern = Regex::new(&format!("(?i){}", regex::escape(source.as_str())))?;
        text = pattern.replace_all(&text, regex::NoExpand(destination)).into_owned();
    }
    for (_, mapping) in ids.services() {
        for renamed in mapping.layer_fields.values() {
            text = fields::replace_delimited(&text, renamed)?;
        }
    }
    if let Some(source_org) = item.url.as_deref().and_then(organization_url) {
        let pattern = Regex::new(&format!("(?i){}", regex::escape(source_org)))?;
        text = pattern
            .replace_all(&text, regex::NoExpand(options.target_portal_url))
            .into_owned();
    }

    serde_json::from_str(&text)
        .map_err(|err| ContentError::invalid_data(&item.id, format!("rewritten configuration: {err}")))
}

fn rewrite_web_appbuilder(
    app: &mut Value,
    ids: &IdentifierMap,
    portal_url: &str,
) -> Result<(), ContentError> {
    let Some(config) = app.as_object_mut() else {
        return Ok(());
    };
    if config.contains_key("portalUrl") {
        config.insert("portalUrl".into(), Value::from(portal_url));
    }
    if let Some(map) = config.get_mut("map").and_then(Value::as_object_mut) {
        if map.contains_key("portalUrl") {
            map.insert("portalUrl".into(), Value::from(portal_url));
        }
        if let Some(Value::String(item_id)) = map.get_mut("itemId") {
            *item_id = mapped_item(ids, item_id)?;
        }
        if let Some(options) = map.get_mut("mapOptions").and_then(Value::as_object_mut) {
            options.remove("extent");
        }
    }
    if let Some(proxy) = config.get_mut("httpProxy").and_then(Value::as_object_mut) {
        if proxy.contains_key("url") {
            proxy.insert("url".into(), Value::from(format!("{portal_url}sharing/proxy")));
        }
    }
    Ok(())
}

fn rewrite_template(
    app: &mut Value,
    ids: &IdentifierMap,
    folder_id: Option<&str>,
) -> Result<(), ContentError> {
    let Some(config) = app.as_object_mut() else {
        return Ok(());
    };
    if config.contains_key("folderId") {
        config.insert("folderId".into(), folder_id.map_or(Value::Null, Value::from));
    }
    let Some(values) = config.get_mut("values").and_then(Value::as_object_mut) else {
        return Ok(());
    };
    if let Some(Value::String(group)) = values.get_mut("group") {
        *group = ids
            .group(group)
            .map(str::to_string)
            .ok_or_else(|| ContentError::unmapped_group(group.as_str()))?;
    }
    match values.get_mut("webmap") {
        Some(Value::String(web_map)) => *web_map = mapped_item(ids, web_map)?,
        Some(Value::Array(web_maps)) => {
            for web_map in web_maps {
                if let Value::String(id) = web_map {
                    *id = mapped_item(ids, id)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace mapped service URLs, layer URLs first so layer ids are translated
fn replace_service_urls(text: &str, ids: &IdentifierMap) -> Result<String, ContentError> {
    let mut text = text.to_string();
    for (source, mapping) in ids.services() {
        let escaped = regex::escape(source);
        for (source_layer, destination_layer) in &mapping.layer_ids {
            let pattern = Regex::new(&format!(
                r"(?i)(?:https?://)?{escaped}/{source_layer}([^0-9]|$)"
            ))?;
            let replacement = format!("{}/{destination_layer}", mapping.destination_url);
            text = pattern
                .replace_all(&text, |caps: &Captures<'_>| format!("{replacement}{}", &caps[1]))
                .into_owned();
        }
        let pattern = Regex::new(&format!(r"(?i)(?:https?://)?{escaped}"))?;
        text = pattern
            .replace_all(&text, regex::NoExpand(&mapping.destination_url))
            .into_owned();
    }
    Ok(text)
}

/// Organization URL an application URL lives under, `https://org/portal/`
fn organization_url(app_url: &str) -> Option<&str> {
    app_url.find(APPS_PATH).map(|index| &app_url[..=index])
}

/// Move an application URL to the destination portal and point it at the new item
///
/// URLs outside a portal's `/apps/` path are returned unchanged.
#[must_use]
pub fn rewrite_app_url(url: &str, target_portal_url: &str, new_id: &str) -> String {
    let Some(index) = url.find(APPS_PATH) else {
        return url.to_string();
    };
    let moved = format!("{}{}", target_portal_url.trim_end_matches('/'), &url[index..]);
    match moved.find("id=") {
        Some(index) => format!("{}{new_id}", &moved[..index + 3]),
        None => moved,
    }
}

// ---------------------------------------------------------------------------
// Generic payloads
// ---------------------------------------------------------------------------

/// Replace mapped item and group ids in every string of a JSON value
pub fn rewrite_ids(value: &mut Value, ids: &IdentifierMap) {
    match value {
        Value::String(text) => {
            for (source, destination) in ids.items().chain(ids.groups()) {
                if text.contains(source.as_str()) {
                    *text = text.replace(source.as_str(), destination);
                }
            }
        }
        Value::Array(values) => values.iter_mut().for_each(|v| rewrite_ids(v, ids)),
        Value::Object(map) => map.values_mut().for_each(|v| rewrite_ids(v, ids)),
        _ => {}
    }
}

/// Empty the feature sets of a feature collection's layers
pub fn strip_features(collection: &mut Value) {
    let Some(layers) = collection.get_mut("layers").and_then(Value::as_array_mut) else {
        return;
    };
    for layer in layers {
        if let Some(features) = layer
            .get_mut("featureSet")
            .and_then(|set| set.get_mut("features"))
        {
            *features = Value::Array(Vec::new());
        }
    }
}
