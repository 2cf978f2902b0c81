//! Portal access traits
//!
//! The content crate never speaks HTTP itself. A [`SourcePortal`] reads the objects
//! being migrated and a [`TargetPortal`] receives them; both are implemented by the
//! caller (or by the in-memory portals of `deepclone-test-utils`).

use crate::model::{Access, ContentGroup, ContentItem, ItemType, ServiceDefinition};
use deepclone_engine::{NodeKind, PortalError};
use serde_json::Value;
use std::path::PathBuf;

/// Relationship between a survey form and its feature service
pub const SURVEY_TO_SERVICE: &str = "Survey2Service";

/// Relationship between an application and its code attachment
pub const APP_TO_CODE: &str = "WMA2Code";

/// Privilege needed to create items
pub const PRIVILEGE_CREATE_ITEM: &str = "portal:user:createItem";
/// Privilege needed to create groups
pub const PRIVILEGE_CREATE_GROUP: &str = "portal:user:createGroup";
/// Privilege needed to share items to groups
pub const PRIVILEGE_SHARE_TO_GROUP: &str = "portal:user:shareToGroup";
/// Privilege needed to publish hosted feature services
pub const PRIVILEGE_PUBLISH_FEATURES: &str = "portal:publisher:publishFeatures";

/// Thumbnail image downloaded from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Source layer of one layer of a view service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewLayerSource {
    /// Layer id in the view
    pub layer_id: u32,
    /// URL of the layer the view layer reads from, ending with its layer id
    pub source_url: String,
}

/// Read access to the source portal
#[async_trait::async_trait]
pub trait SourcePortal: Send + Sync {
    /// Base URL of the portal, ending with `/`
    fn portal_url(&self) -> &str;

    /// Fetch an item with its decoded payload
    async fn item(&self, id: &str) -> Result<ContentItem, PortalError>;

    /// Fetch a group
    async fn group(&self, id: &str) -> Result<ContentGroup, PortalError>;

    /// Item whose URL is the given service URL, if any
    async fn item_for_service(&self, service_url: &str) -> Result<Option<ContentItem>, PortalError>;

    /// Items shared to a group
    async fn group_items(&self, group_id: &str) -> Result<Vec<ContentItem>, PortalError>;

    /// Items related to an item in the forward direction
    async fn related_items(
        &self,
        id: &str,
        relationship: &str,
    ) -> Result<Vec<ContentItem>, PortalError>;

    /// Source layer of every layer of a view service
    async fn view_sources(&self, service_url: &str) -> Result<Vec<ViewLayerSource>, PortalError>;

    /// Thumbnail of an item or group
    async fn thumbnail(&self, kind: NodeKind, id: &str) -> Result<Option<Thumbnail>, PortalError>;
}

/// Properties of an item to create
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub title: String,
    pub item_type: ItemType,
    pub type_keywords: Vec<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub snippet: Option<String>,
    pub url: Option<String>,
    /// Encoded payload
    pub data: Option<Value>,
    /// Thumbnail file in scratch space; only valid during the call
    pub thumbnail: Option<PathBuf>,
    pub folder: Option<String>,
    /// Item this one is related to, with the relationship type
    pub origin: Option<(String, String)>,
}

impl NewItem {
    /// Create properties for an item
    #[must_use]
    pub fn new(title: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            title: title.into(),
            item_type,
            type_keywords: Vec::new(),
            tags: Vec::new(),
            description: None,
            snippet: None,
            url: None,
            data: None,
            thumbnail: None,
            folder: None,
            origin: None,
        }
    }
}

/// Properties of a group to create
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub title: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub snippet: Option<String>,
    pub access: Access,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
    pub thumbnail: Option<PathBuf>,
}

/// Write access to the destination portal
#[async_trait::async_trait]
pub trait TargetPortal: Send + Sync {
    /// Base URL of the portal, ending with `/`
    fn portal_url(&self) -> &str;

    /// Privileges of the signed-in user
    async fn privileges(&self) -> Result<Vec<String>, PortalError>;

    /// Fetch an item, `None` if it does not exist
    async fn item(&self, id: &str) -> Result<Option<ContentItem>, PortalError>;

    /// Items of a type carrying a marker as type keyword or tag
    async fn search_items(
        &self,
        marker: &str,
        item_type: &ItemType,
    ) -> Result<Vec<ContentItem>, PortalError>;

    /// Groups of the signed-in user carrying a marker tag
    async fn search_groups(&self, marker: &str) -> Result<Vec<ContentGroup>, PortalError>;

    /// Check if the signed-in user owns a group with this exact title
    async fn group_title_taken(&self, title: &str) -> Result<bool, PortalError>;

    /// Default basemap of the organization
    async fn default_basemap(&self) -> Result<Option<Value>, PortalError>;

    /// Create the folder if it does not exist yet, returning its id
    async fn ensure_folder(&self, name: &str) -> Result<String, PortalError>;

    /// Add an item
    async fn add_item(&self, item: NewItem) -> Result<ContentItem, PortalError>;

    /// Publish a hosted service from a definition; the returned item has its URL set
    async fn create_service(
        &self,
        item: NewItem,
        definition: &ServiceDefinition,
    ) -> Result<ContentItem, PortalError>;

    /// Layers and tables of a service as it exists in the destination
    async fn service_definition(&self, service_url: &str) -> Result<ServiceDefinition, PortalError>;

    /// Change the URL of an item
    async fn update_url(&self, id: &str, url: &str) -> Result<(), PortalError>;

    /// Create a group
    async fn create_group(&self, group: NewGroup) -> Result<ContentGroup, PortalError>;

    /// Share an item with groups
    async fn share_item(
        &self,
        id: &str,
        access: Access,
        group_ids: &[String],
    ) -> Result<(), PortalError>;

    /// Delete an item
    async fn delete_item(&self, id: &str) -> Result<(), PortalError>;

    /// Delete a group
    async fn delete_group(&self, id: &str) -> Result<(), PortalError>;
}
