//! Error types for deepclone orchestration
//!
//! Provides error handling for:
//! - Configuration and seed validation (caller must fix the input)
//! - Missing privileges of the destination user
//! - Portal failures before the run starts
//! - Migration failures (see [`MigrationError`])

use deepclone_content::ContentError;
use deepclone_engine::{MigrationError, PortalError};

/// Main deepclone error type
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// A seed mapping does not describe the same object on both sides
    #[error("invalid seed {source_id} -> {destination_id}: {reason}")]
    InvalidSeed {
        source_id: String,
        destination_id: String,
        reason: String,
    },

    /// The destination user lacks a privilege the migration needs
    #[error("missing privilege: {0}")]
    MissingPrivilege(String),

    /// Portal call failed before the run started
    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    /// Content could not be interpreted
    #[error(transparent)]
    Content(#[from] ContentError),

    /// The migration run failed
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl CloneError {
    /// Create invalid seed error
    pub fn invalid_seed(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSeed {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if running again unchanged may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Portal(err) => err.is_transient(),
            Self::Migration(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Check if the input itself must change before another attempt
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidSeed { .. } | Self::MissingPrivilege(_)
        ) || matches!(self, Self::Migration(MigrationError::InvalidConfig(_)))
    }
}
