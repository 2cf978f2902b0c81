//! In-memory target portal
//!
//! Publishing mimics a portal that renumbers layers (`with_layer_offset`) and
//! normalizes field names to lower case (`with_lowercase_fields`), so service
//! comparison has something to find. Thumbnails are read back while the upload
//! call runs, since the scratch file is only valid for its duration.

use chrono::{Duration, Utc};
use deepclone_content::model::LayerDefinition;
use deepclone_content::{
    Access, ContentGroup, ContentItem, ItemData, ItemType, NewGroup, NewItem, ServiceDefinition,
    TargetPortal,
};
use deepclone_engine::identifier_map::normalize_service_url;
use deepclone_engine::PortalError;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A recorded share call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub item_id: String,
    pub access: Access,
    pub groups: Vec<String>,
}

/// A thumbnail received with a created item or group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub title: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct TargetState {
    items: IndexMap<String, ContentItem>,
    groups: IndexMap<String, ContentGroup>,
    services: HashMap<String, ServiceDefinition>,
    folders: IndexMap<String, String>,
    origins: HashMap<String, (String, String)>,
    shares: Vec<Share>,
    uploads: Vec<Upload>,
    deleted: Vec<String>,
    /// Creation order of items and groups, ids
    created: Vec<String>,
    ticks: i64,
}

impl TargetState {
    /// Strictly increasing creation times, so "most recent" is deterministic
    fn next_created(&mut self) -> chrono::DateTime<Utc> {
        self.ticks += 1;
        Utc::now() + Duration::milliseconds(self.ticks)
    }
}

/// Target portal backed by maps, with failure injection
pub struct InMemoryTarget {
    portal_url: String,
    services_root: String,
    privileges: Vec<String>,
    basemap: Option<Value>,
    layer_offset: u32,
    lowercase_fields: bool,
    failing_titles: HashSet<String>,
    failing_definitions: bool,
    failing_deletes: HashSet<String>,
    latency: Option<std::time::Duration>,
    state: Mutex<TargetState>,
}

impl InMemoryTarget {
    pub fn new(portal_url: impl Into<String>, services_root: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            services_root: services_root.into().trim_end_matches('/').to_string(),
            privileges: crate::ALL_PRIVILEGES.iter().map(ToString::to_string).collect(),
            basemap: None,
            layer_offset: 0,
            lowercase_fields: false,
            failing_titles: HashSet::new(),
            failing_definitions: false,
            failing_deletes: HashSet::new(),
            latency: None,
            state: Mutex::new(TargetState::default()),
        }
    }

    #[must_use]
    pub fn with_privileges(mut self, privileges: &[&str]) -> Self {
        self.privileges = privileges.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_basemap(mut self, basemap: Value) -> Self {
        self.basemap = Some(basemap);
        self
    }

    /// Published layers get `id + offset`
    #[must_use]
    pub fn with_layer_offset(mut self, offset: u32) -> Self {
        self.layer_offset = offset;
        self
    }

    /// Published fields are renamed to lower case
    #[must_use]
    pub fn with_lowercase_fields(mut self) -> Self {
        self.lowercase_fields = true;
        self
    }

    /// Creating an item or group with this title is rejected
    #[must_use]
    pub fn fail_on(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    /// Reading back a published service definition times out
    #[must_use]
    pub fn with_failing_definitions(mut self) -> Self {
        self.failing_definitions = true;
        self
    }

    /// Deleting the item or group with this title fails
    #[must_use]
    pub fn fail_delete(mut self, title: &str) -> Self {
        self.failing_deletes.insert(title.to_string());
        self
    }

    /// Item and service definition reads take this long
    #[must_use]
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Put an item in place before the run, as an earlier run would have
    pub fn insert_item(&self, item: ContentItem) {
        let mut state = self.state.lock();
        if let (Some(url), Some(ItemData::Service(definition))) = (&item.url, &item.data) {
            state
                .services
                .insert(normalize_service_url(url), definition.clone());
        }
        state.items.insert(item.id.clone(), item);
    }

    /// Put a group in place before the run
    pub fn insert_group(&self, group: ContentGroup) {
        self.state.lock().groups.insert(group.id.clone(), group);
    }

    pub fn items(&self) -> Vec<ContentItem> {
        self.state.lock().items.values().cloned().collect()
    }

    pub fn groups(&self) -> Vec<ContentGroup> {
        self.state.lock().groups.values().cloned().collect()
    }

    pub fn item_by_title(&self, title: &str) -> Option<ContentItem> {
        self.state
            .lock()
            .items
            .values()
            .find(|item| item.title == title)
            .cloned()
    }

    pub fn group_by_title(&self, title: &str) -> Option<ContentGroup> {
        self.state
            .lock()
            .groups
            .values()
            .find(|group| group.title == title)
            .cloned()
    }

    /// Origin item and relationship type of a related item
    pub fn origin_of(&self, id: &str) -> Option<(String, String)> {
        self.state.lock().origins.get(id).cloned()
    }

    pub fn shares(&self) -> Vec<Share> {
        self.state.lock().shares.clone()
    }

    /// Thumbnails received so far, in order
    pub fn uploads(&self) -> Vec<Upload> {
        self.state.lock().uploads.clone()
    }

    /// Ids deleted so far, in order
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Ids of every item and group created through the portal, in order
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn folders(&self) -> Vec<String> {
        self.state.lock().folders.keys().cloned().collect()
    }

    fn check_title(&self, title: &str) -> Result<(), PortalError> {
        if self.failing_titles.contains(title) {
            return Err(PortalError::Rejected(format!("cannot create '{title}'")));
        }
        Ok(())
    }

    async fn wait(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn receive_thumbnail(&self, title: &str, path: Option<&Path>) -> Result<(), PortalError> {
        let Some(path) = path else {
            return Ok(());
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| PortalError::InvalidPayload(format!("thumbnail {}: {err}", path.display())))?;
        self.state.lock().uploads.push(Upload {
            title: title.to_string(),
            path: path.to_path_buf(),
            bytes,
        });
        Ok(())
    }

    fn check_delete(&self, title: Option<&str>, id: &str) -> Result<(), PortalError> {
        if title.is_some_and(|title| self.failing_deletes.contains(title)) {
            return Err(PortalError::Transport(format!("connection reset deleting {id}")));
        }
        Ok(())
    }

    fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn store_item(&self, item: NewItem, id: String, url: Option<String>) -> Result<ContentItem, PortalError> {
        let data = item
            .data
            .map(|raw| ItemData::decode(&item.item_type, raw))
            .transpose()
            .map_err(|err| PortalError::InvalidPayload(err.to_string()))?;

        let mut state = self.state.lock();
        let created = state.next_created();
        let mut stored = ContentItem::new(id.clone(), item.title, item.item_type)
            .with_type_keywords(item.type_keywords)
            .with_tags(item.tags)
            .with_created(created);
        stored.description = item.description;
        stored.snippet = item.snippet;
        stored.url = url;
        stored.data = data;
        if let Some(origin) = item.origin {
            state.origins.insert(id.clone(), origin);
        }
        state.items.insert(id.clone(), stored.clone());
        state.created.push(id);
        Ok(stored)
    }

    fn publish(&self, definition: &ServiceDefinition) -> ServiceDefinition {
        let publish_layer = |layer: &LayerDefinition| {
            let mut published = layer.clone();
            published.id += self.layer_offset;
            for relationship in &mut published.relationships {
                relationship.related_table_id += self.layer_offset;
            }
            if self.lowercase_fields {
                for field in &mut published.fields {
                    field.name = field.name.to_lowercase();
                }
                for name in [&mut published.object_id_field, &mut published.global_id_field]
                    .into_iter()
                    .flatten()
                {
                    *name = name.to_lowercase();
                }
            }
            published
        };
        ServiceDefinition {
            is_view: definition.is_view,
            layers: definition.layers.iter().map(publish_layer).collect(),
            tables: definition.tables.iter().map(publish_layer).collect(),
            extra: definition.extra.clone(),
        }
    }
}

#[async_trait::async_trait]
impl TargetPortal for InMemoryTarget {
    fn portal_url(&self) -> &str {
        &self.portal_url
    }

    async fn privileges(&self) -> Result<Vec<String>, PortalError> {
        Ok(self.privileges.clone())
    }

    async fn item(&self, id: &str) -> Result<Option<ContentItem>, PortalError> {
        self.wait().await;
        Ok(self.state.lock().items.get(id).cloned())
    }

    async fn search_items(
        &self,
        marker: &str,
        item_type: &ItemType,
    ) -> Result<Vec<ContentItem>, PortalError> {
        Ok(self
            .state
            .lock()
            .items
            .values()
            .filter(|item| item.item_type == *item_type && item.has_marker(marker))
            .cloned()
            .collect())
    }

    async fn search_groups(&self, marker: &str) -> Result<Vec<ContentGroup>, PortalError> {
        Ok(self
            .state
            .lock()
            .groups
            .values()
            .filter(|group| group.tags.iter().any(|tag| tag == marker))
            .cloned()
            .collect())
    }

    async fn group_title_taken(&self, title: &str) -> Result<bool, PortalError> {
        Ok(self
            .state
            .lock()
            .groups
            .values()
            .any(|group| group.title == title))
    }

    async fn default_basemap(&self) -> Result<Option<Value>, PortalError> {
        Ok(self.basemap.clone())
    }

    async fn ensure_folder(&self, name: &str) -> Result<String, PortalError> {
        let mut state = self.state.lock();
        let id = state
            .folders
            .entry(name.to_string())
            .or_insert_with(Self::new_id)
            .clone();
        Ok(id)
    }

    async fn add_item(&self, item: NewItem) -> Result<ContentItem, PortalError> {
        self.check_title(&item.title)?;
        self.receive_thumbnail(&item.title, item.thumbnail.as_deref()).await?;
        let url = item.url.clone();
        self.store_item(item, Self::new_id(), url)
    }

    async fn create_service(
        &self,
        item: NewItem,
        definition: &ServiceDefinition,
    ) -> Result<ContentItem, PortalError> {
        self.check_title(&item.title)?;
        self.receive_thumbnail(&item.title, item.thumbnail.as_deref()).await?;
        let id = Self::new_id();
        let name: String = item
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let url = format!("{}/{}_{}/FeatureServer", self.services_root, name, &id[..8]);

        let published = self.publish(definition);
        self.state
            .lock()
            .services
            .insert(normalize_service_url(&url), published);
        self.store_item(item, id, Some(url))
    }

    async fn service_definition(&self, service_url: &str) -> Result<ServiceDefinition, PortalError> {
        self.wait().await;
        if self.failing_definitions {
            return Err(PortalError::Timeout(30));
        }
        self.state
            .lock()
            .services
            .get(&normalize_service_url(service_url))
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("service {service_url}")))
    }

    async fn update_url(&self, id: &str, url: &str) -> Result<(), PortalError> {
        let mut state = self.state.lock();
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| PortalError::NotFound(format!("item {id}")))?;
        item.url = Some(url.to_string());
        Ok(())
    }

    async fn create_group(&self, group: NewGroup) -> Result<ContentGroup, PortalError> {
        self.check_title(&group.title)?;
        self.receive_thumbnail(&group.title, group.thumbnail.as_deref()).await?;
        let mut state = self.state.lock();
        if state.groups.values().any(|existing| existing.title == group.title) {
            return Err(PortalError::Rejected(format!("group '{}' exists", group.title)));
        }
        let id = Self::new_id();
        let created = state.next_created();
        let mut stored = ContentGroup::new(id.clone(), group.title)
            .with_tags(group.tags)
            .with_created(created);
        stored.description = group.description;
        stored.snippet = group.snippet;
        stored.access = group.access;
        stored.sort_field = group.sort_field;
        stored.sort_order = group.sort_order;
        state.groups.insert(id.clone(), stored.clone());
        state.created.push(id);
        Ok(stored)
    }

    async fn share_item(
        &self,
        id: &str,
        access: Access,
        group_ids: &[String],
    ) -> Result<(), PortalError> {
        let mut state = self.state.lock();
        if let Some(missing) = group_ids.iter().find(|group| !state.groups.contains_key(*group)) {
            return Err(PortalError::NotFound(format!("group {missing}")));
        }
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| PortalError::NotFound(format!("item {id}")))?;
        item.access = access;
        state.shares.push(Share {
            item_id: id.to_string(),
            access,
            groups: group_ids.to_vec(),
        });
        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<(), PortalError> {
        let mut state = self.state.lock();
        self.check_delete(state.items.get(id).map(|item| item.title.as_str()), id)?;
        state
            .items
            .shift_remove(id)
            .ok_or_else(|| PortalError::NotFound(format!("item {id}")))?;
        state.deleted.push(id.to_string());
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<(), PortalError> {
        let mut state = self.state.lock();
        self.check_delete(state.groups.get(id).map(|group| group.title.as_str()), id)?;
        state
            .groups
            .shift_remove(id)
            .ok_or_else(|| PortalError::NotFound(format!("group {id}")))?;
        state.deleted.push(id.to_string());
        Ok(())
    }
}
