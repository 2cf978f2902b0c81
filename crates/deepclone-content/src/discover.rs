//! Dependency discovery over a source portal
//!
//! Each content type stores its references differently:
//!
//! | Type | Dependencies |
//! |------|--------------|
//! | Web Map | services behind feature layers, tables and map image layers; feature collections |
//! | Feature Service view | its single source service |
//! | Dashboard (v24) | map widget items, dataset items |
//! | Operation View | map widget maps, standalone data source services |
//! | Web Mapping Application | Web AppBuilder map; template web maps and group |
//! | Form | related `Survey2Service` services |
//! | Group | none; every shared item is a dependent |

use crate::model::{
    ContentGroup, ContentItem, ContentObject, DashboardData, ItemData, ItemType,
    OperationViewData, ServiceDefinition, WebMapData, SUPPORTED_DASHBOARD_VERSION,
};
use crate::portal::{SourcePortal, SURVEY_TO_SERVICE};
use deepclone_engine::identifier_map::{normalize_service_url, split_layer_url};
use deepclone_engine::{DependencyDiscoverer, Discovered, DiscoveryError, SourceObject};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A reference found in a payload, before it is fetched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Reference {
    Item(String),
    Group(String),
    /// Service URL whose item is looked up by URL
    Service(String),
}

/// Discovers dependencies by inspecting payloads and querying the source portal
pub struct PortalDiscoverer<S: ?Sized> {
    source: Arc<S>,
}

impl<S: SourcePortal + ?Sized> PortalDiscoverer<S> {
    /// Create discoverer over a source portal
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    async fn discover_group(
        &self,
        group: &ContentGroup,
    ) -> Result<Discovered<ContentObject>, DiscoveryError> {
        let items = self
            .source
            .group_items(&group.id)
            .await
            .map_err(|err| DiscoveryError::unreadable(group.id.as_str(), err))?;

        // Code attachments follow their application, never the group
        let dependents: Vec<ContentObject> = items
            .into_iter()
            .filter(|item| item.item_type != ItemType::CodeAttachment)
            .map(ContentObject::Item)
            .collect();
        debug!(group = %group.id, shared = dependents.len(), "group content listed");
        Ok(Discovered::leaf().with_dependents(dependents))
    }

    async fn discover_item(
        &self,
        item: &ContentItem,
    ) -> Result<Discovered<ContentObject>, DiscoveryError> {
        let references = match (&item.item_type, &item.data) {
            (_, Some(ItemData::WebMap(map))) => web_map_references(map),
            (_, Some(ItemData::Dashboard(dashboard))) => dashboard_references(item, dashboard)?,
            (_, Some(ItemData::OperationView(view))) => operation_view_references(view),
            (_, Some(ItemData::Application(app))) => application_references(item, app),
            (ItemType::FeatureService, Some(ItemData::Service(definition))) => {
                self.view_references(item, definition).await?
            }
            (ItemType::Form, _) => {
                let related = self
                    .source
                    .related_items(&item.id, SURVEY_TO_SERVICE)
                    .await
                    .map_err(|err| DiscoveryError::unreadable(item.id.as_str(), err))?;
                related
                    .into_iter()
                    .map(|service| Reference::Item(service.id))
                    .collect()
            }
            _ => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut dependencies = Vec::new();
        for reference in references {
            if !seen.insert(reference.clone()) {
                continue;
            }
            if let Some(object) = self.resolve(reference).await? {
                if object.id() != item.id {
                    dependencies.push(object);
                }
            }
        }

        // Different URLs may resolve to the same service item
        let mut unique = HashSet::new();
        dependencies.retain(|object| unique.insert((object.kind(), object.id().to_string())));

        debug!(
            item = %item.id,
            item_type = %item.item_type,
            dependencies = dependencies.len(),
            "item inspected"
        );
        Ok(Discovered::leaf().with_dependencies(dependencies))
    }

    async fn view_references(
        &self,
        item: &ContentItem,
        definition: &ServiceDefinition,
    ) -> Result<Vec<Reference>, DiscoveryError> {
        if !definition.is_view {
            return Ok(Vec::new());
        }
        let Some(url) = item.url.as_deref() else {
            return Err(DiscoveryError::unsupported(item.id.as_str(), "view service without URL"));
        };
        let sources = self
            .source
            .view_sources(url)
            .await
            .map_err(|err| DiscoveryError::unreadable(item.id.as_str(), err))?;

        let mut services: Vec<&str> = Vec::new();
        for source in &sources {
            let Some((service_url, _)) = split_layer_url(&source.source_url) else {
                return Err(DiscoveryError::unsupported(
                    item.id.as_str(),
                    format!("view layer {} has source {}", source.layer_id, source.source_url),
                ));
            };
            if !services
                .iter()
                .any(|known| normalize_service_url(known) == normalize_service_url(service_url))
            {
                services.push(service_url);
            }
        }
        match services.as_slice() {
            [service] => Ok(vec![Reference::Service((*service).to_string())]),
            _ => Err(DiscoveryError::unsupported(
                item.id.as_str(),
                format!("view service has {} source services, expected 1", services.len()),
            )),
        }
    }

    async fn resolve(&self, reference: Reference) -> Result<Option<ContentObject>, DiscoveryError> {
        match reference {
            Reference::Item(id) => self
                .source
                .item(&id)
                .await
                .map(|item| Some(item.into()))
                .map_err(|err| DiscoveryError::unreadable(id, err)),
            Reference::Group(id) => self
                .source
                .group(&id)
                .await
                .map(|group| Some(group.into()))
                .map_err(|err| DiscoveryError::unreadable(id, err)),
            Reference::Service(url) => {
                let found = self
                    .source
                    .item_for_service(&url)
                    .await
                    .map_err(|err| DiscoveryError::unreadable(url.as_str(), err))?;
                if found.is_none() {
                    // Services not registered as items stay where they are
                    debug!(%url, "service has no item, left in place");
                }
                Ok(found.map(ContentObject::Item))
            }
        }
    }
}

#[async_trait::async_trait]
impl<S> DependencyDiscoverer<ContentObject> for PortalDiscoverer<S>
where
    S: SourcePortal + ?Sized + 'static,
{
    async fn discover(
        &self,
        object: &ContentObject,
    ) -> Result<Discovered<ContentObject>, DiscoveryError> {
        match object {
            ContentObject::Group(group) => self.discover_group(group).await,
            ContentObject::Item(item) => self.discover_item(item).await,
        }
    }
}

fn web_map_references(map: &WebMapData) -> Vec<Reference> {
    let mut references = Vec::new();
    for layer in map.operational_layers.iter().chain(map.tables.iter()) {
        if layer.is_feature_collection() {
            references.extend(layer.item_id.clone().map(Reference::Item));
            continue;
        }
        let Some(url) = layer.url.as_deref() else {
            continue;
        };
        if layer.is_map_service_layer() {
            references.push(Reference::Service(url.to_string()));
        } else if let Some((service_url, _)) = split_layer_url(url) {
            references.push(Reference::Service(service_url.to_string()));
        }
    }
    references
}

fn dashboard_references(
    item: &ContentItem,
    dashboard: &DashboardData,
) -> Result<Vec<Reference>, DiscoveryError> {
    if dashboard.version != Some(SUPPORTED_DASHBOARD_VERSION) {
        return Err(DiscoveryError::unsupported(
            item.id.as_str(),
            format!(
                "dashboard version {} is not supported",
                dashboard
                    .version
                    .map_or_else(|| "unknown".to_string(), |v| v.to_string())
            ),
        ));
    }

    let mut references = Vec::new();
    for widget in &dashboard.widgets {
        if widget.get("type").and_then(Value::as_str) == Some("mapWidget") {
            references.extend(string_at(widget, "itemId").map(Reference::Item));
        }
        references.extend(dataset_references(widget));
    }
    for panel in [&dashboard.header_panel, &dashboard.left_panel]
        .into_iter()
        .flatten()
    {
        for selector in panel
            .get("selectors")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            references.extend(dataset_references(selector));
        }
    }
    Ok(references)
}

fn dataset_references(holder: &Value) -> Vec<Reference> {
    holder
        .get("datasets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|dataset| dataset.get("dataSource"))
        .filter_map(|source| string_at(source, "itemId"))
        .map(Reference::Item)
        .collect()
}

fn operation_view_references(view: &OperationViewData) -> Vec<Reference> {
    let maps = view
        .widgets
        .iter()
        .filter(|widget| widget.get("type").and_then(Value::as_str) == Some("mapWidget"))
        .filter_map(|widget| string_at(widget, "mapId"));
    let services = view
        .standalone_data_sources
        .iter()
        .filter_map(|source| source.service_item_id.clone());
    maps.chain(services).map(Reference::Item).collect()
}

fn application_references(item: &ContentItem, app: &Value) -> Vec<Reference> {
    if item.is_story_map() {
        return Vec::new();
    }
    if item.is_web_appbuilder() {
        return app
            .get("map")
            .and_then(|map| string_at(map, "itemId"))
            .map(Reference::Item)
            .into_iter()
            .collect();
    }

    let Some(values) = app.get("values") else {
        return Vec::new();
    };
    let mut references: Vec<Reference> = match values.get("webmap") {
        Some(Value::String(id)) => vec![Reference::Item(id.clone())],
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(|id| Reference::Item(id.to_string()))
            .collect(),
        _ => Vec::new(),
    };
    references.extend(string_at(values, "group").map(Reference::Group));
    references
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
