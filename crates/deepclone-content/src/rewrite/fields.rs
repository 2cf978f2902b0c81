//! Field renames inside layer definitions and expressions
//!
//! Field names appear in many places of a web map layer: SQL definition
//! expressions, renderers, label expressions, Arcade expressions, popup templates
//! (`{FIELD}`) and related-record references (`{relationships/<id>/FIELD}`).

use crate::error::ContentError;
use crate::model::WebMapLayer;
use deepclone_engine::identifier_map::FieldMapping;
use regex::{Captures, NoExpand, Regex};
use serde_json::Value;
use std::collections::BTreeMap;

/// Replace field names delimited by `{ ( " [ space` and `} ) " ] space` (or the text
/// boundaries), as they appear in SQL expressions and serialized JSON
///
/// # Errors
/// Returns `ContentError::Pattern` if a field name cannot be turned into a pattern.
pub fn replace_delimited(text: &str, fields: &FieldMapping) -> Result<String, ContentError> {
    let mut text = text.to_string();
    for (from, to) in fields {
        let pattern = Regex::new(&format!(
            r#"(^|[{{("\[ ]){}([}})"\] ]|$)"#,
            regex::escape(from)
        ))?;
        // Adjacent occurrences share a delimiter, so a second pass picks up the ones
        // skipped by the first
        for _ in 0..2 {
            text = pattern
                .replace_all(&text, |caps: &Captures<'_>| format!("{}{}{}", &caps[1], to, &caps[2]))
                .into_owned();
        }
    }
    Ok(text)
}

/// Replace `$feature.FIELD` and `$feature["FIELD"]` in Arcade expressions
///
/// # Errors
/// Returns `ContentError::Pattern` if a field name cannot be turned into a pattern.
pub fn replace_arcade(text: &str, fields: &FieldMapping) -> Result<String, ContentError> {
    let mut text = text.to_string();
    for (from, to) in fields {
        let dotted = Regex::new(&format!(r"\$feature\.{}\b", regex::escape(from)))?;
        text = dotted
            .replace_all(&text, NoExpand(&format!("$feature.{to}")))
            .into_owned();
        let indexed = Regex::new(&format!(r#"\$feature\["{}"\]"#, regex::escape(from)))?;
        text = indexed
            .replace_all(&text, NoExpand(&format!("$feature[\"{to}\"]")))
            .into_owned();
    }
    Ok(text)
}

/// Replace `{PREFIXFIELD}` placeholders of popup and label templates
///
/// # Errors
/// Returns `ContentError::Pattern` if the placeholder pattern cannot be compiled.
pub fn replace_braced(text: &str, fields: &FieldMapping, prefix: &str) -> Result<String, ContentError> {
    replace_enclosed(text, fields, prefix, r"\{([^{}]*)\}", ('{', '}'))
}

/// Replace `[FIELD]` references of legacy label expressions
///
/// # Errors
/// Returns `ContentError::Pattern` if the reference pattern cannot be compiled.
pub fn replace_bracketed(text: &str, fields: &FieldMapping) -> Result<String, ContentError> {
    replace_enclosed(text, fields, "", r"\[([^\[\]]*)\]", ('[', ']'))
}

fn replace_enclosed(
    text: &str,
    fields: &FieldMapping,
    prefix: &str,
    pattern: &str,
    (open, close): (char, char),
) -> Result<String, ContentError> {
    let pattern = Regex::new(pattern)?;
    Ok(pattern
        .replace_all(text, |caps: &Captures<'_>| {
            caps[1]
                .strip_prefix(prefix)
                .and_then(|name| fields.get(name))
                .map_or_else(
                    || caps[0].to_string(),
                    |renamed| format!("{open}{prefix}{renamed}{close}"),
                )
        })
        .into_owned())
}

/// Rename a field reference held in a string, keeping its prefix
fn rename(name: &mut String, fields: &FieldMapping, prefix: &str) {
    let renamed = name
        .strip_prefix(prefix)
        .and_then(|field| fields.get(field))
        .map(|renamed| format!("{prefix}{renamed}"));
    if let Some(renamed) = renamed {
        *name = renamed;
    }
}

fn string_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut String> {
    match value.get_mut(key) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    }
}

fn array_mut<'a>(value: &'a mut Value, key: &str) -> impl Iterator<Item = &'a mut Value> {
    value
        .get_mut(key)
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

fn map_string(
    value: &mut Value,
    key: &str,
    apply: impl FnOnce(&str) -> Result<String, ContentError>,
) -> Result<(), ContentError> {
    if let Some(text) = string_mut(value, key) {
        *text = apply(text)?;
    }
    Ok(())
}

/// Rename the fields of a layer's own service layer
///
/// # Errors
/// Returns `ContentError::Pattern` if a field name cannot be turned into a pattern.
pub fn rewrite_layer_fields(layer: &mut WebMapLayer, fields: &FieldMapping) -> Result<(), ContentError> {
    if fields.is_empty() {
        return Ok(());
    }

    if let Some(definition) = layer.layer_definition.as_mut() {
        map_string(definition, "definitionExpression", |text| replace_delimited(text, fields))?;

        if let Some(drawing_info) = definition.get_mut("drawingInfo") {
            if let Some(renderer) = drawing_info.get_mut("renderer") {
                rewrite_renderer(renderer, fields)?;
            }
            for label in array_mut(drawing_info, "labelingInfo") {
                map_string(label, "labelExpression", |text| replace_bracketed(text, fields))?;
                if let Some(info) = label.get_mut("labelExpressionInfo") {
                    map_string(info, "value", |text| replace_braced(text, fields, ""))?;
                    map_string(info, "expression", |text| replace_arcade(text, fields))?;
                }
            }
        }
    }

    if let Some(popup) = layer.popup_info.as_mut() {
        rewrite_popup(popup, fields, "")?;
        for expression in array_mut(popup, "expressionInfos") {
            map_string(expression, "expression", |text| replace_arcade(text, fields))?;
        }
    }

    if let Some(editor) = layer.definition_editor.as_mut() {
        for input in array_mut(editor, "inputs") {
            for parameter in array_mut(input, "parameters") {
                if let Some(name) = string_mut(parameter, "fieldName") {
                    rename(name, fields, "");
                }
            }
        }
        map_string(editor, "parameterizedExpression", |text| replace_delimited(text, fields))?;
    }
    Ok(())
}

/// Rename fields of related tables referenced through `relationships/<id>/`
///
/// # Errors
/// Returns `ContentError::Pattern` if a placeholder pattern cannot be compiled.
pub fn rewrite_related_fields(
    layer: &mut WebMapLayer,
    relationships: &BTreeMap<u32, FieldMapping>,
) -> Result<(), ContentError> {
    let Some(popup) = layer.popup_info.as_mut() else {
        return Ok(());
    };
    for (relationship_id, fields) in relationships {
        rewrite_popup(popup, fields, &format!("relationships/{relationship_id}/"))?;
    }
    Ok(())
}

fn rewrite_renderer(renderer: &mut Value, fields: &FieldMapping) -> Result<(), ContentError> {
    match renderer.get("type").and_then(Value::as_str) {
        Some("uniqueValue") => {
            for index in 1..=3 {
                if let Some(name) = string_mut(renderer, &format!("field{index}")) {
                    rename(name, fields, "");
                }
            }
        }
        Some("classBreaks") => {
            if let Some(name) = string_mut(renderer, "field") {
                rename(name, fields, "");
            }
        }
        _ => {}
    }
    map_string(renderer, "valueExpression", |text| replace_arcade(text, fields))
}

fn rewrite_popup(popup: &mut Value, fields: &FieldMapping, prefix: &str) -> Result<(), ContentError> {
    map_string(popup, "title", |text| replace_braced(text, fields, prefix))?;
    map_string(popup, "description", |text| replace_braced(text, fields, prefix))?;

    for info in array_mut(popup, "fieldInfos") {
        if let Some(name) = string_mut(info, "fieldName") {
            rename(name, fields, prefix);
        }
    }

    for media in array_mut(popup, "mediaInfos") {
        map_string(media, "title", |text| replace_braced(text, fields, prefix))?;
        map_string(media, "caption", |text| replace_braced(text, fields, prefix))?;
        if let Some(name) = string_mut(media, "normalizeField") {
            rename(name, fields, prefix);
        }
        for field in array_mut(media, "fields") {
            if let Value::String(name) = field {
                rename(name, fields, prefix);
            }
        }
    }
    Ok(())
}
