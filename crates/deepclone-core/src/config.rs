//! Migration configuration
//!
//! ```toml
//! worker_limit = 10
//! search_existing = true
//! target_folder = "Migrated"
//! copy_data = false
//! use_org_basemap = true
//!
//! [portal]
//! request_timeout_secs = 60
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use crate::error::CloneError;
use deepclone_content::DestinationOptions;
use deepclone_engine::scheduler::DEFAULT_WORKER_LIMIT;
use deepclone_engine::SchedulerConfig;
use serde::{Deserialize, Serialize};
use deepclone_engine::PortalError;
use std::future::Future;
use std::time::Duration;

/// Configuration of a content migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Maximum migrations in flight within one wave
    pub worker_limit: usize,
    /// Reuse objects left by an earlier run instead of creating duplicates
    pub search_existing: bool,
    /// Destination folder, created if missing; the root folder when unset
    pub target_folder: Option<String>,
    /// Keep the features stored in feature collections
    pub copy_data: bool,
    /// Give web maps the destination organization's default basemap
    pub use_org_basemap: bool,
    pub portal: PortalConfig,
}

/// Portal request settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Timeout of each preflight request
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
        }
    }
}

impl PortalConfig {
    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Run one portal call under the request timeout
    ///
    /// # Errors
    /// Returns `PortalError::Timeout` if the call does not finish in time, or the
    /// call's own error.
    pub async fn bounded<F, R>(&self, call: F) -> Result<R, PortalError>
    where
        F: Future<Output = Result<R, PortalError>>,
    {
        tokio::time::timeout(self.request_timeout(), call)
            .await
            .map_err(|_| PortalError::Timeout(self.request_timeout_secs))?
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            worker_limit: DEFAULT_WORKER_LIMIT,
            search_existing: true,
            target_folder: None,
            copy_data: false,
            use_org_basemap: false,
            portal: PortalConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns `CloneError::Config` if the document does not parse or is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, CloneError> {
        let config: Self = toml::from_str(text).map_err(|err| CloneError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// With worker limit
    #[inline]
    #[must_use]
    pub fn with_worker_limit(mut self, worker_limit: usize) -> Self {
        self.worker_limit = worker_limit;
        self
    }

    /// With existing-object search enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_search_existing(mut self, search_existing: bool) -> Self {
        self.search_existing = search_existing;
        self
    }

    /// With target folder
    #[inline]
    #[must_use]
    pub fn with_target_folder(mut self, folder: impl Into<String>) -> Self {
        self.target_folder = Some(folder.into());
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

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.portal.request_timeout_secs = secs;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    /// Returns `CloneError::Config` for a zero worker limit or timeout, or a blank
    /// folder name.
    pub fn validate(&self) -> Result<(), CloneError> {
        self.scheduler_config()
            .validate()
            .map_err(|err| CloneError::Config(err.to_string()))?;
        if self.portal.request_timeout_secs == 0 {
            return Err(CloneError::Config(
                "portal.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self
            .target_folder
            .as_deref()
            .is_some_and(|folder| folder.trim().is_empty())
        {
            return Err(CloneError::Config("target_folder must not be blank".to_string()));
        }
        Ok(())
    }

    /// Engine settings
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_worker_limit(self.worker_limit)
            .with_search_existing(self.search_existing)
    }

    /// Destination settings, given the id of the target folder
    #[must_use]
    pub fn destination_options(&self, folder_id: Option<String>) -> DestinationOptions {
        DestinationOptions {
            target_folder: self.target_folder.clone(),
            folder_id,
            copy_data: self.copy_data,
            use_org_basemap: self.use_org_basemap,
        }
    }
}
