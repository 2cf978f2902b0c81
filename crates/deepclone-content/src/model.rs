//! Typed content model
//!
//! Portal items carry a JSON payload whose shape depends on the item type. The
//! payload is decoded once, at the portal boundary, into [`ItemData`]; unknown
//! properties are kept in flattened `extra` maps so a payload survives a
//! decode/rewrite/encode cycle untouched apart from the rewritten references.

use chrono::{DateTime, Utc};
use deepclone_engine::{NodeKind, ObjectLabel, SourceId, SourceObject};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix of the marker left on migrated objects: `source-<source id>`
pub const SOURCE_MARKER_PREFIX: &str = "source-";

/// Marker type keyword / tag recording which source object an object was created from
#[must_use]
pub fn source_marker(source_id: &str) -> String {
    format!("{SOURCE_MARKER_PREFIX}{source_id}")
}

/// Type keywords identifying Web AppBuilder applications
pub const WEB_APPBUILDER_KEYWORD: &str = "Web AppBuilder";

/// Type keywords identifying story maps
pub const STORY_MAP_KEYWORDS: [&str; 2] = ["Story Map", "Story Maps"];

/// Portal item type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    WebMap,
    FeatureService,
    MapService,
    FeatureCollection,
    Dashboard,
    OperationView,
    WebMappingApplication,
    Form,
    CodeAttachment,
    Other(String),
}

impl ItemType {
    /// Portal name of the type
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WebMap => "Web Map",
            Self::FeatureService => "Feature Service",
            Self::MapService => "Map Service",
            Self::FeatureCollection => "Feature Collection",
            Self::Dashboard => "Dashboard",
            Self::OperationView => "Operation View",
            Self::WebMappingApplication => "Web Mapping Application",
            Self::Form => "Form",
            Self::CodeAttachment => "Code Attachment",
            Self::Other(name) => name,
        }
    }

    /// Check if the item is backed by a service whose layers can be renumbered
    #[inline]
    #[must_use]
    pub fn is_service(&self) -> bool {
        matches!(self, Self::FeatureService | Self::MapService)
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        match value {
            "Web Map" => Self::WebMap,
            "Feature Service" => Self::FeatureService,
            "Map Service" => Self::MapService,
            "Feature Collection" => Self::FeatureCollection,
            "Dashboard" => Self::Dashboard,
            "Operation View" => Self::OperationView,
            "Web Mapping Application" => Self::WebMappingApplication,
            "Form" => Self::Form,
            "Code Attachment" => Self::CodeAttachment,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ItemType> for String {
    fn from(value: ItemType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sharing level of an item or group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Private,
    Shared,
    Org,
    Public,
}

/// A portal item with its decoded payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub type_keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access: Access,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    /// Decoded payload; `None` for items without data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemData>,
}

impl ContentItem {
    /// Create item without payload
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            item_type,
            type_keywords: Vec::new(),
            tags: Vec::new(),
            description: None,
            snippet: None,
            url: None,
            access: Access::Private,
            created: Utc::now(),
            data: None,
        }
    }

    /// With service or application URL
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// With type keywords
    #[inline]
    #[must_use]
    pub fn with_type_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With decoded payload
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: ItemData) -> Self {
        self.data = Some(data);
        self
    }

    /// With creation time
    #[inline]
    #[must_use]
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Check for a type keyword
    #[must_use]
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.type_keywords.iter().any(|k| k == keyword)
    }

    /// Check if the item carries the marker of a source object
    #[must_use]
    pub fn has_marker(&self, marker: &str) -> bool {
        self.has_keyword(marker) || self.tags.iter().any(|t| t == marker)
    }

    /// Check if the item is a story map, whose references are never rewritten
    #[must_use]
    pub fn is_story_map(&self) -> bool {
        STORY_MAP_KEYWORDS.iter().any(|k| self.has_keyword(k))
    }

    /// Check if the item is a Web AppBuilder application
    #[must_use]
    pub fn is_web_appbuilder(&self) -> bool {
        self.item_type == ItemType::WebMappingApplication && self.has_keyword(WEB_APPBUILDER_KEYWORD)
    }
}

/// A portal group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGroup {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl ContentGroup {
    /// Create group
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tags: Vec::new(),
            description: None,
            snippet: None,
            access: Access::Private,
            sort_field: None,
            sort_order: None,
            created: Utc::now(),
        }
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With creation time
    #[inline]
    #[must_use]
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// Anything that can be migrated: an item or a group
#[derive(Debug, Clone, PartialEq)]
pub enum ContentObject {
    Item(ContentItem),
    Group(ContentGroup),
}

impl ContentObject {
    /// Source identifier
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Item(item) => &item.id,
            Self::Group(group) => &group.id,
        }
    }

    /// Title
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Item(item) => &item.title,
            Self::Group(group) => &group.title,
        }
    }

    /// The item, if this is one
    #[must_use]
    pub fn as_item(&self) -> Option<&ContentItem> {
        match self {
            Self::Item(item) => Some(item),
            Self::Group(_) => None,
        }
    }

    /// The group, if this is one
    #[must_use]
    pub fn as_group(&self) -> Option<&ContentGroup> {
        match self {
            Self::Group(group) => Some(group),
            Self::Item(_) => None,
        }
    }
}

impl From<ContentItem> for ContentObject {
    fn from(item: ContentItem) -> Self {
        Self::Item(item)
    }
}

impl From<ContentGroup> for ContentObject {
    fn from(group: ContentGroup) -> Self {
        Self::Group(group)
    }
}

impl SourceObject for ContentObject {
    fn source_id(&self) -> SourceId {
        SourceId::new(self.id())
    }

    fn kind(&self) -> NodeKind {
        match self {
            Self::Item(_) => NodeKind::Item,
            Self::Group(_) => NodeKind::Group,
        }
    }

    fn label(&self) -> ObjectLabel {
        let content_type = match self {
            Self::Item(item) => item.item_type.as_str(),
            Self::Group(_) => "Group",
        };
        ObjectLabel::new(self.source_id(), self.kind(), content_type, self.title())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Decoded payload of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ItemData {
    WebMap(WebMapData),
    Dashboard(DashboardData),
    OperationView(OperationViewData),
    Application(Value),
    Service(ServiceDefinition),
    Json(Value),
}

impl ItemData {
    /// Decode a raw payload according to the item type
    ///
    /// # Errors
    /// Returns `serde_json::Error` if the payload does not have the shape of its type.
    pub fn decode(item_type: &ItemType, raw: Value) -> Result<Self, serde_json::Error> {
        Ok(match item_type {
            ItemType::WebMap => Self::WebMap(serde_json::from_value(raw)?),
            ItemType::Dashboard => Self::Dashboard(serde_json::from_value(raw)?),
            ItemType::OperationView => Self::OperationView(serde_json::from_value(raw)?),
            ItemType::WebMappingApplication => Self::Application(raw),
            ItemType::FeatureService | ItemType::MapService => {
                Self::Service(serde_json::from_value(raw)?)
            }
            _ => Self::Json(raw),
        })
    }

    /// Encode back to the portal's JSON shape
    ///
    /// # Errors
    /// Returns `serde_json::Error` if a value cannot be represented as JSON.
    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::WebMap(data) => serde_json::to_value(data),
            Self::Dashboard(data) => serde_json::to_value(data),
            Self::OperationView(data) => serde_json::to_value(data),
            Self::Service(data) => serde_json::to_value(data),
            Self::Application(value) | Self::Json(value) => Ok(value.clone()),
        }
    }
}

/// Layer type of feature layers in web maps
pub const FEATURE_LAYER_TYPE: &str = "ArcGISFeatureLayer";

/// Layer type of map image layers in web maps
pub const MAP_SERVICE_LAYER_TYPE: &str = "ArcGISMapServiceLayer";

/// Web map payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMapData {
    #[serde(default)]
    pub operational_layers: Vec<WebMapLayer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<WebMapLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Operational layer or table of a web map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMapLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_type: Option<String>,
    /// "Feature Collection" for layers stored in a feature collection item
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_definition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_editor: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WebMapLayer {
    /// Check if this is a feature layer backed by a service URL
    #[must_use]
    pub fn is_service_feature_layer(&self) -> bool {
        self.layer_type.as_deref() == Some(FEATURE_LAYER_TYPE)
            && self.url.is_some()
            && !self.is_feature_collection()
    }

    /// Check if the layer's features live in a feature collection item
    #[must_use]
    pub fn is_feature_collection(&self) -> bool {
        self.layer_type.as_deref() == Some(FEATURE_LAYER_TYPE)
            && self.collection_type.as_deref() == Some("Feature Collection")
    }

    /// Check if this is a map image layer backed by a service URL
    #[must_use]
    pub fn is_map_service_layer(&self) -> bool {
        self.layer_type.as_deref() == Some(MAP_SERVICE_LAYER_TYPE) && self.url.is_some()
    }
}

/// Dashboard payload
///
/// Widgets have many shapes; they stay raw JSON and are inspected by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub widgets: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_panel: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_panel: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The only dashboard schema version that can be migrated
pub const SUPPORTED_DASHBOARD_VERSION: u32 = 24;

/// Operation view payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationViewData {
    #[serde(default)]
    pub widgets: Vec<Value>,
    #[serde(default)]
    pub standalone_data_sources: Vec<StandaloneDataSource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Data source of an operation view that is not part of a map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneDataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Definition of a feature or map service and its layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    #[serde(default)]
    pub is_view: bool,
    #[serde(default)]
    pub layers: Vec<LayerDefinition>,
    #[serde(default)]
    pub tables: Vec<LayerDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceDefinition {
    /// Layers followed by tables
    pub fn all_layers(&self) -> impl Iterator<Item = &LayerDefinition> {
        self.layers.iter().chain(self.tables.iter())
    }
}

/// Definition of one layer or table of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDefinition {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_fields_info: Option<EditFieldsInfo>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LayerDefinition {
    /// Create layer without fields
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// With fields by name
    #[must_use]
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = names
            .into_iter()
            .map(|name| FieldDefinition {
                name: name.into(),
                extra: Map::new(),
            })
            .collect();
        self
    }
}

/// Field of a layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Editor tracking fields of a layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditFieldsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_field: Option<String>,
}

impl EditFieldsInfo {
    /// Tracking fields in a fixed order, unset ones included
    #[must_use]
    pub fn fields(&self) -> [Option<&str>; 4] {
        [
            self.creation_date_field.as_deref(),
            self.creator_field.as_deref(),
            self.edit_date_field.as_deref(),
            self.editor_field.as_deref(),
        ]
    }
}

/// Relationship from a layer to a related table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: u32,
    pub related_table_id: u32,
}
