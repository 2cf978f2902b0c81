//! Portal-to-portal migration
//!
//! [`ContentMigrator`] runs the preflight a migration needs before anything is
//! created, then hands the roots to the engine:
//! 1. fetch the roots from the source
//! 2. check the destination user's privileges
//! 3. create the target folder if missing
//! 4. validate the seed
//! 5. discover, schedule and migrate (or roll back)

use crate::config::MigrationConfig;
use crate::error::CloneError;
use crate::seed::validate_seed;
use deepclone_content::portal::{
    PRIVILEGE_CREATE_GROUP, PRIVILEGE_CREATE_ITEM, PRIVILEGE_PUBLISH_FEATURES,
    PRIVILEGE_SHARE_TO_GROUP,
};
use deepclone_content::{
    ContentObject, ItemType, PortalDestination, PortalDiscoverer, SourcePortal, TargetPortal,
};
use deepclone_engine::{DestinationRef, IdentifierMap, PortalError, RunId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Object to migrate, by source id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Root {
    Item(String),
    Group(String),
}

/// Result of a successful migration
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub run_id: Option<RunId>,
    /// Objects created at the destination, in wave order
    pub created: Vec<DestinationRef>,
    /// Seed mappings plus every mapping of the run
    pub identifier_map: IdentifierMap,
    pub waves: usize,
    /// Objects reused from an earlier run
    pub matched_existing: usize,
    /// Objects resolved from the seed
    pub seeded: usize,
    pub elapsed_ms: u64,
}

/// Migrates content from a source portal to a target portal
pub struct ContentMigrator<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    config: MigrationConfig,
}

impl<S, T> ContentMigrator<S, T>
where
    S: SourcePortal + ?Sized + 'static,
    T: TargetPortal + ?Sized + 'static,
{
    /// Create migrator
    ///
    /// # Errors
    /// Returns `CloneError::Config` if the configuration is invalid.
    pub fn new(source: Arc<S>, target: Arc<T>, config: MigrationConfig) -> Result<Self, CloneError> {
        config.validate()?;
        Ok(Self {
            source,
            target,
            config,
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate `roots` and everything they depend on
    ///
    /// Objects named in `seed` are not migrated again; references to them are
    /// rewritten to their seeded counterparts.
    ///
    /// # Errors
    /// - `CloneError::Portal` if a preflight call fails
    /// - `CloneError::MissingPrivilege` if the destination user cannot create the roots
    /// - `CloneError::InvalidSeed` if a seed mapping does not hold
    /// - `CloneError::Migration` if the run fails; nothing it created remains
    pub async fn migrate(&self, roots: &[Root], seed: IdentifierMap) -> Result<MigrationReport, CloneError> {
        let started = Instant::now();

        let mut objects = Vec::with_capacity(roots.len());
        for root in roots {
            objects.push(self.fetch_root(root).await?);
        }
        self.check_privileges(&objects).await?;

        let folder_id = match &self.config.target_folder {
            Some(folder) => Some(self.bounded(self.target.ensure_folder(folder)).await?),
            None => None,
        };
        let seed = validate_seed(
            self.source.as_ref(),
            self.target.as_ref(),
            seed,
            &self.config.portal,
        )
        .await?;

        let discoverer = PortalDiscoverer::new(Arc::clone(&self.source));
        let destination = PortalDestination::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            self.config.destination_options(folder_id),
        );

        let result = deepclone_engine::migrate(
            objects,
            seed,
            &discoverer,
            &destination,
            self.config.scheduler_config(),
        )
        .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                metrics::counter!("deepclone_runs_failed_total").increment(1);
                if let Some(report) = err.rollback_report().filter(|report| !report.is_clean()) {
                    warn!(leftover = report.failures.len(), "rollback left objects behind");
                }
                return Err(err.into());
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::counter!("deepclone_runs_completed_total").increment(1);
        info!(
            created = outcome.created.len(),
            waves = outcome.summary.waves,
            elapsed_ms,
            "migration completed"
        );

        Ok(MigrationReport {
            run_id: outcome.summary.run_id,
            created: outcome.created,
            identifier_map: outcome.identifier_map,
            waves: outcome.summary.waves,
            matched_existing: outcome.summary.matched_existing,
            seeded: outcome.summary.seeded,
            elapsed_ms,
        })
    }

    async fn fetch_root(&self, root: &Root) -> Result<ContentObject, CloneError> {
        let object = match root {
            Root::Item(id) => self.bounded(self.source.item(id)).await?.into(),
            Root::Group(id) => self.bounded(self.source.group(id)).await?.into(),
        };
        Ok(object)
    }

    async fn check_privileges(&self, roots: &[ContentObject]) -> Result<(), CloneError> {
        let granted = self.bounded(self.target.privileges()).await?;

        let mut required = vec![PRIVILEGE_CREATE_ITEM];
        if roots.iter().any(|root| matches!(root, ContentObject::Group(_))) {
            required.extend([PRIVILEGE_CREATE_GROUP, PRIVILEGE_SHARE_TO_GROUP]);
        }
        let publishes = roots
            .iter()
            .filter_map(ContentObject::as_item)
            .any(|item| item.item_type == ItemType::FeatureService);
        if publishes {
            required.push(PRIVILEGE_PUBLISH_FEATURES);
        }

        match required
            .into_iter()
            .find(|privilege| !granted.iter().any(|g| g == privilege))
        {
            Some(missing) => Err(CloneError::MissingPrivilege(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Apply the request timeout to a portal call
    async fn bounded<F, R>(&self, call: F) -> Result<R, PortalError>
    where
        F: Future<Output = Result<R, PortalError>>,
    {
        self.config.portal.bounded(call).await
    }
}
