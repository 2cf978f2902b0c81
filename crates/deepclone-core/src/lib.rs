//! deepclone
//!
//! Deep-clones portal content (items, groups and everything they reference) from a
//! source organization to a target organization. Objects are created dependencies
//! first, every reference is rewritten to the new identifiers, and a failure anywhere
//! removes everything the run created.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use deepclone_core::{ContentMigrator, MigrationConfig, Root};
//! use deepclone_engine::IdentifierMap;
//! use std::sync::Arc;
//!
//! let config = MigrationConfig::from_toml_str(&std::fs::read_to_string("deepclone.toml")?)?;
//! let migrator = ContentMigrator::new(Arc::new(source), Arc::new(target), config)?;
//!
//! let report = migrator
//!     .migrate(&[Root::Item("9f2c...".into())], IdentifierMap::new())
//!     .await?;
//! println!("created {} objects in {} waves", report.created.len(), report.waves);
//! ```

pub mod config;
pub mod error;
pub mod migrator;
pub mod seed;

pub use config::{MigrationConfig, PortalConfig};
pub use error::CloneError;
pub use migrator::{ContentMigrator, MigrationReport, Root};
pub use seed::validate_seed;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
