//! deepclone content
//!
//! Portal content for the deepclone engine:
//! - [`model`]: typed items, groups and payloads
//! - [`discover`]: dependency discovery per content type
//! - [`compare`]: layer and field mapping between a service and its copy
//! - [`rewrite`]: translating payload references through the identifier map
//! - [`destination`]: creating, matching and deleting objects in a target portal
//!
//! Remote access goes through the [`SourcePortal`] and [`TargetPortal`] traits.

pub mod compare;
pub mod destination;
pub mod discover;
pub mod error;
pub mod model;
pub mod portal;
pub mod rewrite;

pub use compare::compare_services;
pub use destination::{DestinationOptions, PortalDestination};
pub use discover::PortalDiscoverer;
pub use error::ContentError;
pub use model::{
    source_marker, Access, ContentGroup, ContentItem, ContentObject, ItemData, ItemType,
    ServiceDefinition,
};
pub use portal::{NewGroup, NewItem, SourcePortal, TargetPortal, Thumbnail, ViewLayerSource};
pub use rewrite::{rewrite_payload, RewriteOptions};
