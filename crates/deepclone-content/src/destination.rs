//! Destination over a target portal
//!
//! Creating an item is a sequence of portal calls (add or publish, update URL, add a
//! code attachment, share). Every object created along the way is recorded, so a
//! failure at any step reports it back as partial and rollback can remove it.
//!
//! Created objects carry a `source-<id>` marker (type keyword for items, tag for
//! groups). A later run finds them through it instead of creating duplicates.

use crate::compare::compare_services;
use crate::error::ContentError;
use crate::model::{
    source_marker, Access, ContentGroup, ContentItem, ContentObject, ItemData, ItemType,
    ServiceDefinition, SOURCE_MARKER_PREFIX,
};
use crate::portal::{NewGroup, NewItem, SourcePortal, TargetPortal, APP_TO_CODE};
use crate::rewrite::{rewrite_app_url, rewrite_payload, rewrite_view_definition, RewriteOptions};
use deepclone_engine::identifier_map::ServiceMapping;
use deepclone_engine::{
    CreateFailure, Destination, DestinationRef, MappingContribution, MigrationContext, Migrated,
    NodeKind, PortalError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Tag prefix of the folder marker left by older tooling
const SOURCE_FOLDER_PREFIX: &str = "sourcefolder-";

/// Type keywords of the code attachment generated for Web AppBuilder apps
const CODE_ATTACHMENT_KEYWORDS: [&str; 3] = ["Code", "Web Mapping Application", "Javascript"];

/// How objects are created in the destination
#[derive(Debug, Clone, Default)]
pub struct DestinationOptions {
    /// Folder name items are created in; the root folder when `None`
    pub target_folder: Option<String>,
    /// Id of `target_folder`, written into application templates
    pub folder_id: Option<String>,
    /// Keep the features stored in feature collections
    pub copy_data: bool,
    /// Replace web map basemaps with the destination organization's default
    pub use_org_basemap: bool,
}

impl DestinationOptions {
    /// With target folder name and id
    #[must_use]
    pub fn with_folder(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.target_folder = Some(name.into());
        self.folder_id = Some(id.into());
        self
    }

    /// With feature collection data copied
    #[inline]
    #[must_use]
    pub fn with_copy_data(mut self, copy_data: bool) -> Self {
        self.copy_data = copy_data;
        self
    }

    /// With the organization basemap used in web maps
    #[inline]
    #[must_use]
    pub fn with_org_basemap(mut self, use_org_basemap: bool) -> Self {
        self.use_org_basemap = use_org_basemap;
        self
    }
}

/// [`Destination`] creating content in a target portal from a source portal
pub struct PortalDestination<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    options: DestinationOptions,
}

impl<S, T> PortalDestination<S, T>
where
    S: SourcePortal + ?Sized,
    T: TargetPortal + ?Sized,
{
    /// Create destination
    #[must_use]
    pub fn new(source: Arc<S>, target: Arc<T>, options: DestinationOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Creation options
    #[must_use]
    pub fn options(&self) -> &DestinationOptions {
        &self.options
    }

    async fn find_item(&self, item: &ContentItem) -> Result<Option<Migrated>, ContentError> {
        let marker = source_marker(&item.id);
        let found = self
            .target
            .search_items(&marker, &item.item_type)
            .await?
            .into_iter()
            .filter(|candidate| candidate.item_type == item.item_type && candidate.has_marker(&marker))
            .max_by_key(|candidate| candidate.created);
        let Some(found) = found else {
            return Ok(None);
        };

        debug!(source = %item.id, destination = %found.id, "matched existing item");
        let mut mappings = MappingContribution::new().item(item.id.as_str(), found.id.as_str());
        if let Some(mapping) = self.existing_service_mapping(item, &found).await? {
            if let Some(source_url) = &item.url {
                mappings = mappings.service(source_url.as_str(), mapping);
            }
        }
        Ok(Some(Migrated::existing(item_ref(&found)).with_mappings(mappings)))
    }

    async fn existing_service_mapping(
        &self,
        item: &ContentItem,
        found: &ContentItem,
    ) -> Result<Option<ServiceMapping>, ContentError> {
        if item.item_type != ItemType::FeatureService {
            return Ok(None);
        }
        let Some(url) = found.url.as_deref() else {
            return Ok(None);
        };
        match &item.data {
            Some(ItemData::Service(definition)) => {
                let created = self.target.service_definition(url).await?;
                compare_services(definition, &created, &found.id, url).map(Some)
            }
            _ => Ok(Some(ServiceMapping::new(found.id.as_str(), url))),
        }
    }

    async fn find_group(&self, group: &ContentGroup) -> Result<Option<Migrated>, ContentError> {
        let marker = source_marker(&group.id);
        let found = self
            .target
            .search_groups(&marker)
            .await?
            .into_iter()
            .filter(|candidate| candidate.tags.iter().any(|tag| *tag == marker))
            .max_by_key(|candidate| candidate.created);

        Ok(found.map(|found| {
            debug!(source = %group.id, destination = %found.id, "matched existing group");
            let mappings = MappingContribution::new().group(group.id.as_str(), found.id.as_str());
            Migrated::existing(group_ref(&found)).with_mappings(mappings)
        }))
    }

    async fn create_group(
        &self,
        group: &ContentGroup,
        scratch: &Path,
        created: &mut Vec<DestinationRef>,
    ) -> Result<Migrated, ContentError> {
        let title = self.unique_group_title(&group.title).await?;
        let mut tags = strip_markers(&group.tags);
        tags.push(source_marker(&group.id));

        let new_group = self
            .target
            .create_group(NewGroup {
                title,
                tags,
                description: group.description.clone(),
                snippet: group.snippet.clone(),
                access: group.access,
                sort_field: group.sort_field.clone(),
                sort_order: group.sort_order.clone(),
                thumbnail: self.download_thumbnail(NodeKind::Group, &group.id, scratch).await?,
            })
            .await?;
        let destination = group_ref(&new_group);
        created.push(destination.clone());
        info!(source = %group.id, destination = %new_group.id, "group created");

        let mappings = MappingContribution::new().group(group.id.as_str(), new_group.id.as_str());
        Ok(Migrated::created(destination).with_mappings(mappings))
    }

    async fn unique_group_title(&self, title: &str) -> Result<String, ContentError> {
        if !self.target.group_title_taken(title).await? {
            return Ok(title.to_string());
        }
        let mut suffix = 2_u32;
        loop {
            let candidate = format!("{title} {suffix}");
            if !self.target.group_title_taken(&candidate).await? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    async fn create_item(
        &self,
        item: &ContentItem,
        context: &MigrationContext<'_, ContentObject>,
        scratch: &Path,
        created: &mut Vec<DestinationRef>,
    ) -> Result<Migrated, ContentError> {
        let basemap = if self.options.use_org_basemap && item.item_type == ItemType::WebMap {
            self.target.default_basemap().await?
        } else {
            None
        };
        let options = RewriteOptions {
            target_portal_url: self.target.portal_url(),
            folder_id: self.options.folder_id.as_deref(),
            basemap: basemap.as_ref(),
            copy_data: self.options.copy_data,
        };
        let mut payload = rewrite_payload(item, context.identifier_map, &options)?;
        if let (Some(ItemData::Service(definition)), Some(url)) = (payload.as_mut(), &item.url) {
            if definition.is_view {
                let sources = self.source.view_sources(url).await?;
                rewrite_view_definition(&item.id, definition, &sources, context.identifier_map)?;
            }
        }

        let mut properties = self.item_properties(item);
        properties.thumbnail = self.download_thumbnail(NodeKind::Item, &item.id, scratch).await?;

        let mut mappings = MappingContribution::new();
        let new_item = match (&item.item_type, &payload) {
            (ItemType::FeatureService, Some(ItemData::Service(definition))) => {
                let new_item = self.target.create_service(properties, definition).await?;
                created.push(item_ref(&new_item));
                if let Some(source_url) = &item.url {
                    // Views lose their field lists; compare the layout the source reports
                    let source_definition = match &item.data {
                        Some(ItemData::Service(original)) => original,
                        _ => definition,
                    };
                    let mapping = self.created_service_mapping(source_definition, &new_item).await?;
                    mappings = mappings.service(source_url.as_str(), mapping);
                }
                new_item
            }
            _ => {
                properties.url = item.url.clone();
                properties.data = payload.as_ref().map(ItemData::encode).transpose()?;
                let new_item = self.target.add_item(properties).await?;
                created.push(item_ref(&new_item));
                new_item
            }
        };

        let mut destination = item_ref(&new_item);
        if item.item_type == ItemType::WebMappingApplication {
            if let Some(url) = &item.url {
                let app_url = rewrite_app_url(url, self.target.portal_url(), &new_item.id);
                self.target.update_url(&new_item.id, &app_url).await?;
                destination = destination.with_url(app_url);
            }
        }

        let groups: Vec<String> = context
            .container_destinations(NodeKind::Group)
            .map(str::to_string)
            .collect();
        self.share(&new_item.id, item.access, &groups).await?;

        let mut migrated = Migrated::created(destination);
        if item.is_web_appbuilder() {
            let attachment = self.add_code_attachment(&new_item).await?;
            created.push(attachment.clone());
            self.share(&attachment.id, item.access, &groups).await?;
            migrated = migrated.with_auxiliary(attachment);
        }

        info!(
            source = %item.id,
            destination = %new_item.id,
            item_type = %item.item_type,
            "item created"
        );
        Ok(migrated.with_mappings(mappings.item(item.id.as_str(), new_item.id.as_str())))
    }

    fn item_properties(&self, item: &ContentItem) -> NewItem {
        let mut type_keywords = strip_markers(&item.type_keywords);
        type_keywords.push(source_marker(&item.id));

        let mut properties = NewItem::new(item.title.clone(), item.item_type.clone());
        properties.type_keywords = type_keywords;
        properties.tags = strip_markers(&item.tags);
        properties.description = item.description.clone();
        properties.snippet = item.snippet.clone();
        properties.folder = self.options.target_folder.clone();
        properties
    }

    async fn created_service_mapping(
        &self,
        definition: &ServiceDefinition,
        new_item: &ContentItem,
    ) -> Result<ServiceMapping, ContentError> {
        let url = new_item.url.as_deref().ok_or_else(|| {
            ContentError::invalid_data(&new_item.id, "published service has no URL")
        })?;
        let created = self.target.service_definition(url).await?;
        compare_services(definition, &created, &new_item.id, url)
    }

    async fn add_code_attachment(&self, app: &ContentItem) -> Result<DestinationRef, ContentError> {
        let mut properties = NewItem::new(app.title.clone(), ItemType::CodeAttachment);
        properties.type_keywords = CODE_ATTACHMENT_KEYWORDS.iter().map(ToString::to_string).collect();
        properties.url = Some(code_attachment_url(self.target.portal_url(), &app.id));
        properties.origin = Some((app.id.clone(), APP_TO_CODE.to_string()));
        properties.folder = self.options.target_folder.clone();

        let attachment = self.target.add_item(properties).await?;
        debug!(app = %app.id, attachment = %attachment.id, "code attachment added");
        Ok(item_ref(&attachment))
    }

    async fn share(&self, id: &str, access: Access, groups: &[String]) -> Result<(), ContentError> {
        if access == Access::Private && groups.is_empty() {
            return Ok(());
        }
        self.target.share_item(id, access, groups).await?;
        Ok(())
    }

    async fn download_thumbnail(
        &self,
        kind: NodeKind,
        id: &str,
        scratch: &Path,
    ) -> Result<Option<PathBuf>, ContentError> {
        let Some(thumbnail) = self.source.thumbnail(kind, id).await? else {
            return Ok(None);
        };
        let file_name = Path::new(&thumbnail.file_name)
            .file_name()
            .map_or_else(|| PathBuf::from("thumbnail.png"), PathBuf::from);
        let path = scratch.join(file_name);
        tokio::fs::write(&path, &thumbnail.bytes).await?;
        Ok(Some(path))
    }
}

#[async_trait::async_trait]
impl<S, T> Destination<ContentObject> for PortalDestination<S, T>
where
    S: SourcePortal + ?Sized + 'static,
    T: TargetPortal + ?Sized + 'static,
{
    async fn find_existing(&self, object: &ContentObject) -> Result<Option<Migrated>, PortalError> {
        let found = match object {
            ContentObject::Item(item) => self.find_item(item).await?,
            ContentObject::Group(group) => self.find_group(group).await?,
        };
        Ok(found)
    }

    async fn create(
        &self,
        object: &ContentObject,
        context: &MigrationContext<'_, ContentObject>,
    ) -> Result<Migrated, CreateFailure> {
        // Dropped on every exit path, removing downloaded thumbnails
        let scratch = tempfile::Builder::new()
            .prefix("deepclone-")
            .tempdir()
            .map_err(|err| PortalError::from(ContentError::from(err)))?;

        let mut created = Vec::new();
        let result = match object {
            ContentObject::Item(item) => {
                self.create_item(item, context, scratch.path(), &mut created).await
            }
            ContentObject::Group(group) => {
                self.create_group(group, scratch.path(), &mut created).await
            }
        };
        result.map_err(|err| CreateFailure::new(err.into()).with_partial(created))
    }

    async fn delete(&self, object: &DestinationRef) -> Result<(), PortalError> {
        match object.kind {
            NodeKind::Item => self.target.delete_item(&object.id).await,
            NodeKind::Group => self.target.delete_group(&object.id).await,
        }
    }
}

/// Drop markers copied from the source, which name objects of another portal
fn strip_markers(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|value| {
            !value.starts_with(SOURCE_MARKER_PREFIX) && !value.starts_with(SOURCE_FOLDER_PREFIX)
        })
        .cloned()
        .collect()
}

/// Scheme-relative package URL of an application's code attachment
fn code_attachment_url(portal_url: &str, app_id: &str) -> String {
    let without_scheme = portal_url
        .find("://")
        .map_or(portal_url, |index| &portal_url[index + 1..]);
    format!("{without_scheme}sharing/rest/content/items/{app_id}/package")
}

fn item_ref(item: &ContentItem) -> DestinationRef {
    let destination = DestinationRef::item(item.id.as_str(), item.item_type.as_str(), item.title.as_str())
        .with_created_at(item.created);
    match &item.url {
        Some(url) => destination.with_url(url.as_str()),
        None => destination,
    }
}

fn group_ref(group: &ContentGroup) -> DestinationRef {
    DestinationRef::group(group.id.as_str(), group.title.as_str()).with_created_at(group.created)
}
