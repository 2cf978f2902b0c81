//! Source/destination service comparison
//!
//! A recreated service does not necessarily keep its layer ids or field names: the
//! destination may renumber layers and normalize field name case, and editor
//! tracking or id fields may carry different names. Comparing both definitions
//! yields the [`ServiceMapping`] every dependent payload is rewritten with.

use crate::error::ContentError;
use crate::model::{LayerDefinition, ServiceDefinition};
use deepclone_engine::identifier_map::{FieldMapping, ServiceMapping};
use std::collections::BTreeMap;

/// Compare a source service with its recreated counterpart
///
/// Layers are paired by name first; unmatched source layers take the unmatched
/// destination layers in order.
///
/// # Errors
/// Returns `ContentError::ServiceMismatch` if the destination has fewer layers and
/// tables than the source.
pub fn compare_services(
    source: &ServiceDefinition,
    destination: &ServiceDefinition,
    destination_id: &str,
    destination_url: &str,
) -> Result<ServiceMapping, ContentError> {
    let source_layers: Vec<&LayerDefinition> = source.all_layers().collect();
    let destination_layers: Vec<&LayerDefinition> = destination.all_layers().collect();

    if destination_layers.len() < source_layers.len() {
        return Err(ContentError::ServiceMismatch(format!(
            "{} has {} layers and tables, source has {}",
            destination_url,
            destination_layers.len(),
            source_layers.len()
        )));
    }

    let layer_ids = pair_layers(&source_layers, &destination_layers);
    let mut mapping = ServiceMapping::new(destination_id, destination_url);
    mapping.layer_ids = layer_ids.clone();

    for (source_id, destination_id) in &layer_ids {
        let source_layer = source_layers.iter().find(|l| l.id == *source_id);
        let destination_layer = destination_layers.iter().find(|l| l.id == *destination_id);
        if let (Some(source_layer), Some(destination_layer)) = (source_layer, destination_layer) {
            let fields = compare_fields(source_layer, destination_layer);
            mapping = mapping.with_fields(*source_id, fields);
        }
    }

    for layer in &source_layers {
        for relationship in &layer.relationships {
            if let Some(fields) = mapping.layer_fields.get(&relationship.related_table_id).cloned() {
                mapping
                    .relationship_fields
                    .entry(layer.id)
                    .or_default()
                    .insert(relationship.id, fields);
            }
        }
    }

    Ok(mapping)
}

fn pair_layers(
    source: &[&LayerDefinition],
    destination: &[&LayerDefinition],
) -> BTreeMap<u32, u32> {
    let mut pairs = BTreeMap::new();
    let mut unmatched_source = Vec::new();
    let mut unmatched_destination: Vec<u32> = destination.iter().map(|l| l.id).collect();

    for layer in source {
        let by_name = destination
            .iter()
            .find(|candidate| candidate.name == layer.name && unmatched_destination.contains(&candidate.id));
        match by_name {
            Some(candidate) => {
                pairs.insert(layer.id, candidate.id);
                unmatched_destination.retain(|id| *id != candidate.id);
            }
            None => unmatched_source.push(layer.id),
        }
    }

    for (source_id, destination_id) in unmatched_source.into_iter().zip(unmatched_destination) {
        pairs.insert(source_id, destination_id);
    }
    pairs
}

fn compare_fields(source: &LayerDefinition, destination: &LayerDefinition) -> FieldMapping {
    let mut fields = FieldMapping::new();
    if source.fields.is_empty() || destination.fields.is_empty() {
        return fields;
    }

    let mut rename = |from: Option<&str>, to: Option<&str>| {
        if let (Some(from), Some(to)) = (from, to) {
            if !from.is_empty() && !to.is_empty() && from != to {
                fields.insert(from.to_string(), to.to_string());
            }
        }
    };

    if let (Some(source_info), Some(destination_info)) =
        (&source.edit_fields_info, &destination.edit_fields_info)
    {
        for (from, to) in source_info.fields().into_iter().zip(destination_info.fields()) {
            rename(from, to);
        }
    }
    rename(
        source.object_id_field.as_deref(),
        destination.object_id_field.as_deref(),
    );
    rename(
        source.global_id_field.as_deref(),
        destination.global_id_field.as_deref(),
    );

    for field in &source.fields {
        if fields.contains_key(&field.name) {
            continue;
        }
        let counterpart = destination
            .fields
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&field.name));
        if let Some(counterpart) = counterpart {
            if counterpart.name != field.name {
                fields.insert(field.name.clone(), counterpart.name.clone());
            }
        }
    }
    fields
}
