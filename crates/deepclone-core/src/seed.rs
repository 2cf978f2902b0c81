//! Seed validation
//!
//! Seed mappings name source objects the caller has already migrated. Before they
//! are trusted, each seeded item must exist on both sides with the same type. A
//! seeded feature service is compared with its counterpart so dependents still get
//! their layer and field renames; a seeded map service maps its URL.

use crate::config::PortalConfig;
use crate::error::CloneError;
use deepclone_content::{compare_services, ContentItem, ItemData, ItemType, SourcePortal, TargetPortal};
use deepclone_engine::identifier_map::ServiceMapping;
use deepclone_engine::{IdentifierMap, PortalError};
use tracing::debug;

/// Validate a seed and add the service mappings of seeded services
///
/// Every portal call is bounded by the request timeout of `portal`.
///
/// # Errors
/// - `CloneError::InvalidSeed` if a seeded item is missing or its type differs
/// - `CloneError::Portal` if a portal call fails otherwise
pub async fn validate_seed<S, T>(
    source: &S,
    target: &T,
    seed: IdentifierMap,
    portal: &PortalConfig,
) -> Result<IdentifierMap, CloneError>
where
    S: SourcePortal + ?Sized,
    T: TargetPortal + ?Sized,
{
    let mut validated = seed.clone();

    for (source_id, destination_id) in seed.items() {
        let Some(destination) = portal.bounded(target.item(destination_id)).await? else {
            return Err(CloneError::invalid_seed(
                source_id.as_str(),
                destination_id,
                "item does not exist at the destination",
            ));
        };
        let original = match portal.bounded(source.item(source_id.as_str())).await {
            Ok(item) => item,
            Err(PortalError::NotFound(_)) => {
                return Err(CloneError::invalid_seed(
                    source_id.as_str(),
                    destination_id,
                    "item does not exist at the source",
                ))
            }
            Err(err) => return Err(err.into()),
        };
        if original.item_type != destination.item_type {
            return Err(CloneError::invalid_seed(
                source_id.as_str(),
                destination_id,
                format!("{} seeded with {}", original.item_type, destination.item_type),
            ));
        }

        let (Some(source_url), Some(destination_url)) = (&original.url, &destination.url) else {
            continue;
        };
        if let Some(mapping) = seeded_service(target, &original, &destination, destination_url, portal).await? {
            debug!(source = %source_id, destination = %destination_id, "seeded service mapped");
            validated.insert_service(source_url, mapping);
        }
    }
    Ok(validated)
}

async fn seeded_service<T>(
    target: &T,
    original: &ContentItem,
    destination: &ContentItem,
    destination_url: &str,
    portal: &PortalConfig,
) -> Result<Option<ServiceMapping>, CloneError>
where
    T: TargetPortal + ?Sized,
{
    match (&original.item_type, &original.data) {
        (ItemType::FeatureService, Some(ItemData::Service(definition))) => {
            let published = portal.bounded(target.service_definition(destination_url)).await?;
            let mapping = compare_services(definition, &published, &destination.id, destination_url)?;
            Ok(Some(mapping))
        }
        (ItemType::MapService, _) => Ok(Some(ServiceMapping::new(
            destination.id.as_str(),
            destination_url,
        ))),
        _ => Ok(None),
    }
}
