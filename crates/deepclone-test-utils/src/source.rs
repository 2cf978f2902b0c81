//! In-memory source portal

use deepclone_content::{ContentGroup, ContentItem, SourcePortal, Thumbnail, ViewLayerSource};
use deepclone_engine::identifier_map::normalize_service_url;
use deepclone_engine::{NodeKind, PortalError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct SourceState {
    items: IndexMap<String, ContentItem>,
    groups: IndexMap<String, ContentGroup>,
    group_members: HashMap<String, Vec<String>>,
    related: HashMap<(String, String), Vec<String>>,
    view_sources: HashMap<String, Vec<ViewLayerSource>>,
    thumbnails: HashMap<String, Thumbnail>,
    unreadable: HashSet<String>,
    reads: usize,
}

/// Source portal backed by maps, built with `with_*` calls
pub struct InMemorySource {
    portal_url: String,
    state: RwLock<SourceState>,
}

impl InMemorySource {
    pub fn new(portal_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            state: RwLock::new(SourceState::default()),
        }
    }

    #[must_use]
    pub fn with_item(self, item: ContentItem) -> Self {
        self.state.write().items.insert(item.id.clone(), item);
        self
    }

    #[must_use]
    pub fn with_items(self, items: impl IntoIterator<Item = ContentItem>) -> Self {
        items.into_iter().fold(self, Self::with_item)
    }

    /// Add a group with the ids of the items shared to it
    #[must_use]
    pub fn with_group<I, S>(self, group: ContentGroup, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.write();
            state
                .group_members
                .insert(group.id.clone(), members.into_iter().map(Into::into).collect());
            state.groups.insert(group.id.clone(), group);
        }
        self
    }

    #[must_use]
    pub fn with_related(self, id: &str, relationship: &str, related: &[&str]) -> Self {
        self.state.write().related.insert(
            (id.to_string(), relationship.to_string()),
            related.iter().map(ToString::to_string).collect(),
        );
        self
    }

    /// Declare a view service by its `(view layer id, source layer URL)` pairs
    #[must_use]
    pub fn with_view_sources(self, service_url: &str, sources: &[(u32, &str)]) -> Self {
        self.state.write().view_sources.insert(
            normalize_service_url(service_url),
            sources
                .iter()
                .map(|(layer_id, source_url)| ViewLayerSource {
                    layer_id: *layer_id,
                    source_url: (*source_url).to_string(),
                })
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_thumbnail(self, id: &str, file_name: &str, bytes: &[u8]) -> Self {
        self.state.write().thumbnails.insert(
            id.to_string(),
            Thumbnail {
                file_name: file_name.to_string(),
                bytes: bytes.to_vec(),
            },
        );
        self
    }

    /// Make reads of an item or group fail
    #[must_use]
    pub fn unreadable(self, id: &str) -> Self {
        self.state.write().unreadable.insert(id.to_string());
        self
    }

    /// Number of item and group reads served
    pub fn reads(&self) -> usize {
        self.state.read().reads
    }

    fn check_readable(&self, id: &str) -> Result<(), PortalError> {
        let mut state = self.state.write();
        state.reads += 1;
        if state.unreadable.contains(id) {
            return Err(PortalError::Transport(format!("connection reset reading {id}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SourcePortal for InMemorySource {
    fn portal_url(&self) -> &str {
        &self.portal_url
    }

    async fn item(&self, id: &str) -> Result<ContentItem, PortalError> {
        self.check_readable(id)?;
        self.state
            .read()
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("item {id}")))
    }

    async fn group(&self, id: &str) -> Result<ContentGroup, PortalError> {
        self.check_readable(id)?;
        self.state
            .read()
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("group {id}")))
    }

    async fn item_for_service(&self, service_url: &str) -> Result<Option<ContentItem>, PortalError> {
        let wanted = normalize_service_url(service_url);
        Ok(self
            .state
            .read()
            .items
            .values()
            .find(|item| item.url.as_deref().map(normalize_service_url).as_ref() == Some(&wanted))
            .cloned())
    }

    async fn group_items(&self, group_id: &str) -> Result<Vec<ContentItem>, PortalError> {
        self.check_readable(group_id)?;
        let state = self.state.read();
        let members = state
            .group_members
            .get(group_id)
            .ok_or_else(|| PortalError::NotFound(format!("group {group_id}")))?;
        Ok(members
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    async fn related_items(
        &self,
        id: &str,
        relationship: &str,
    ) -> Result<Vec<ContentItem>, PortalError> {
        let state = self.state.read();
        Ok(state
            .related
            .get(&(id.to_string(), relationship.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|related| state.items.get(related).cloned())
            .collect())
    }

    async fn view_sources(&self, service_url: &str) -> Result<Vec<ViewLayerSource>, PortalError> {
        Ok(self
            .state
            .read()
            .view_sources
            .get(&normalize_service_url(service_url))
            .cloned()
            .unwrap_or_default())
    }

    async fn thumbnail(&self, _kind: NodeKind, id: &str) -> Result<Option<Thumbnail>, PortalError> {
        Ok(self.state.read().thumbnails.get(id).cloned())
    }
}
