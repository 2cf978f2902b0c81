//! Identifier and reference types shared by the graph, scheduler and collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use ulid::Ulid;

/// Identifier of an item or group in the source portal
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Wrap a raw source identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Position of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub usize);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node migrates
///
/// Items and groups share one graph but are tracked in separate identifier tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A content item (map, service, application, ...)
    Item,
    /// A sharing group
    Group,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Item => f.write_str("item"),
            NodeKind::Group => f.write_str("group"),
        }
    }
}

/// Human-readable identity of a source object, carried by errors and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLabel {
    pub source_id: SourceId,
    pub kind: NodeKind,
    /// Portal content type, e.g. "Web Map"
    pub content_type: String,
    pub title: String,
}

impl ObjectLabel {
    /// Create a label
    #[must_use]
    pub fn new(
        source_id: SourceId,
        kind: NodeKind,
        content_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source_id,
            kind,
            content_type: content_type.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.content_type, self.title, self.source_id)
    }
}

/// Reference to an object that exists in the destination portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRef {
    /// Destination identifier
    pub id: String,
    pub kind: NodeKind,
    pub content_type: String,
    pub title: String,
    /// Service URL, for service items
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DestinationRef {
    /// Reference to a destination item
    #[must_use]
    pub fn item(
        id: impl Into<String>,
        content_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Item,
            content_type: content_type.into(),
            title: title.into(),
            url: None,
            created_at: Utc::now(),
        }
    }

    /// Reference to a destination group
    #[must_use]
    pub fn group(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Group,
            content_type: "Group".to_string(),
            title: title.into(),
            url: None,
            created_at: Utc::now(),
        }
    }

    /// With service URL
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// With creation timestamp
    #[inline]
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.content_type, self.title, self.id)
    }
}

/// Identifier of one migration run (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
