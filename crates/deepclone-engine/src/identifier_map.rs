//! Source → destination identifier table
//!
//! The [`IdentifierMap`] grows monotonically during a run. It is seeded by the caller
//! with objects that are deliberately not re-migrated, then extended by the scheduler
//! after every wave with the contributions of the nodes that resolved in it.
//! Dependents read it (never write it) while they migrate.

use crate::types::{NodeKind, SourceId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field renames for one layer: source field name → destination field name
pub type FieldMapping = BTreeMap<String, String>;

/// Normalize a service URL for comparison
///
/// Scheme, query string, letter case and trailing slashes are ignored, so
/// `https://Host/arcgis/rest/services/Roads/FeatureServer/` and
/// `http://host/arcgis/rest/services/roads/FeatureServer` compare equal.
#[must_use]
pub fn normalize_service_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .find("://")
        .map_or(trimmed, |pos| &trimmed[pos + 3..]);
    let without_query = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    without_query.trim_end_matches('/').to_ascii_lowercase()
}

/// Split a layer URL into its service URL and layer id
///
/// `.../FeatureServer/3` → (`.../FeatureServer`, 3). Returns `None` when the last
/// path segment is not a layer id.
#[must_use]
pub fn split_layer_url(url: &str) -> Option<(&str, u32)> {
    let (service, layer) = url.trim_end_matches('/').rsplit_once('/')?;
    let layer_id = layer.parse().ok()?;
    Some((service, layer_id))
}

/// How a source service was recreated in the destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMapping {
    /// Destination item id of the service
    pub destination_id: String,
    /// Destination service URL (no trailing layer id)
    pub destination_url: String,
    /// Source layer id → destination layer id
    pub layer_ids: BTreeMap<u32, u32>,
    /// Per source layer id, renamed fields
    pub layer_fields: BTreeMap<u32, FieldMapping>,
    /// Per source layer id, per relationship id, renamed fields of the related table
    pub relationship_fields: BTreeMap<u32, BTreeMap<u32, FieldMapping>>,
}

impl ServiceMapping {
    /// Create mapping with no layer or field renames
    #[must_use]
    pub fn new(destination_id: impl Into<String>, destination_url: impl Into<String>) -> Self {
        Self {
            destination_id: destination_id.into(),
            destination_url: destination_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// With a layer id mapping
    #[must_use]
    pub fn with_layer(mut self, source_layer: u32, destination_layer: u32) -> Self {
        self.layer_ids.insert(source_layer, destination_layer);
        self
    }

    /// With field renames for a layer
    #[must_use]
    pub fn with_fields(mut self, source_layer: u32, fields: FieldMapping) -> Self {
        if !fields.is_empty() {
            self.layer_fields.insert(source_layer, fields);
        }
        self
    }

    /// Destination layer id for a source layer id
    ///
    /// Layers missing from the table keep their id.
    #[must_use]
    pub fn destination_layer(&self, source_layer: u32) -> u32 {
        self.layer_ids
            .get(&source_layer)
            .copied()
            .unwrap_or(source_layer)
    }

    /// Destination URL of a source layer
    #[must_use]
    pub fn layer_url(&self, source_layer: u32) -> String {
        format!(
            "{}/{}",
            self.destination_url,
            self.destination_layer(source_layer)
        )
    }

    /// Renamed fields of a source layer
    #[must_use]
    pub fn fields_for(&self, source_layer: u32) -> Option<&FieldMapping> {
        self.layer_fields.get(&source_layer)
    }
}

/// Mappings produced by one node's migration, merged between waves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingContribution {
    /// Source item id to destination item id
    pub items: Vec<(SourceId, String)>,
    /// Source group id to destination group id
    pub groups: Vec<(SourceId, String)>,
    /// Keyed by source service URL
    pub services: Vec<(String, ServiceMapping)>,
}

impl MappingContribution {
    /// Empty contribution
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an item mapping
    #[must_use]
    pub fn item(mut self, source: impl Into<SourceId>, destination: impl Into<String>) -> Self {
        self.items.push((source.into(), destination.into()));
        self
    }

    /// With a group mapping
    #[must_use]
    pub fn group(mut self, source: impl Into<SourceId>, destination: impl Into<String>) -> Self {
        self.groups.push((source.into(), destination.into()));
        self
    }

    /// With a service mapping
    #[must_use]
    pub fn service(mut self, source_url: impl Into<String>, mapping: ServiceMapping) -> Self {
        self.services.push((source_url.into(), mapping));
        self
    }

    /// Check if nothing is contributed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.groups.is_empty() && self.services.is_empty()
    }
}

/// Process-lifetime translation table from source to destination identifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierMap {
    items: IndexMap<SourceId, String>,
    groups: IndexMap<SourceId, String>,
    /// Keyed by normalized source service URL
    services: IndexMap<String, ServiceMapping>,
}

impl IdentifierMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with item mappings
    #[must_use]
    pub fn with_items<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<SourceId>,
        V: Into<String>,
    {
        for (source, destination) in items {
            self.insert_item(source, destination);
        }
        self
    }

    /// Seed with group mappings
    #[must_use]
    pub fn with_groups<I, K, V>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<SourceId>,
        V: Into<String>,
    {
        for (source, destination) in groups {
            self.insert_group(source, destination);
        }
        self
    }

    /// Record an item mapping
    pub fn insert_item(&mut self, source: impl Into<SourceId>, destination: impl Into<String>) {
        self.items.insert(source.into(), destination.into());
    }

    /// Record a group mapping
    pub fn insert_group(&mut self, source: impl Into<SourceId>, destination: impl Into<String>) {
        self.groups.insert(source.into(), destination.into());
    }

    /// Record a service mapping under its source URL
    pub fn insert_service(&mut self, source_url: &str, mapping: ServiceMapping) {
        self.services
            .insert(normalize_service_url(source_url), mapping);
    }

    /// Record a mapping in the table matching `kind`
    pub fn record(&mut self, kind: NodeKind, source: &SourceId, destination: &str) {
        match kind {
            NodeKind::Item => self.insert_item(source.clone(), destination),
            NodeKind::Group => self.insert_group(source.clone(), destination),
        }
    }

    /// Merge a node's contribution
    pub fn merge(&mut self, contribution: MappingContribution) {
        for (source, destination) in contribution.items {
            self.items.insert(source, destination);
        }
        for (source, destination) in contribution.groups {
            self.groups.insert(source, destination);
        }
        for (url, mapping) in contribution.services {
            self.insert_service(&url, mapping);
        }
    }

    /// Destination id of a source item
    #[must_use]
    pub fn item(&self, source: &str) -> Option<&str> {
        self.items.get(source).map(String::as_str)
    }

    /// Destination id of a source group
    #[must_use]
    pub fn group(&self, source: &str) -> Option<&str> {
        self.groups.get(source).map(String::as_str)
    }

    /// Destination id for a source id in the table matching `kind`
    #[must_use]
    pub fn resolve(&self, kind: NodeKind, source: &str) -> Option<&str> {
        match kind {
            NodeKind::Item => self.item(source),
            NodeKind::Group => self.group(source),
        }
    }

    /// Check if a source object is already mapped
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: NodeKind, source: &str) -> bool {
        self.resolve(kind, source).is_some()
    }

    /// Mapping of a source service URL
    #[must_use]
    pub fn service(&self, source_url: &str) -> Option<&ServiceMapping> {
        self.services.get(&normalize_service_url(source_url))
    }

    /// Mapping of the service recreated as destination item `destination_id`
    #[must_use]
    pub fn service_by_destination_id(&self, destination_id: &str) -> Option<&ServiceMapping> {
        self.services
            .values()
            .find(|mapping| mapping.destination_id == destination_id)
    }

    /// Service mapping and source layer id for a source layer URL
    #[must_use]
    pub fn layer(&self, layer_url: &str) -> Option<(&ServiceMapping, u32)> {
        let (service_url, layer_id) = split_layer_url(layer_url)?;
        self.service(service_url).map(|mapping| (mapping, layer_id))
    }

    /// Destination URL for a source layer URL
    ///
    /// `.../ServiceY_src/FeatureServer/3` becomes `.../ServiceY_dst/FeatureServer/7`
    /// once the service is mapped with layer 3 → 7.
    #[must_use]
    pub fn rewrite_layer_url(&self, layer_url: &str) -> Option<String> {
        self.layer(layer_url)
            .map(|(mapping, layer_id)| mapping.layer_url(layer_id))
    }

    /// Source item ids with their destination ids
    pub fn items(&self) -> impl Iterator<Item = (&SourceId, &str)> {
        self.items.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Source group ids with their destination ids
    pub fn groups(&self) -> impl Iterator<Item = (&SourceId, &str)> {
        self.groups.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Normalized source service URLs with their mappings
    pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceMapping)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len() + self.groups.len() + self.services.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
