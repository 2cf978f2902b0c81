//! Error types for the migration engine
//!
//! Provides the error taxonomy of a run:
//! - Discovery failures (graph cannot be built, nothing is attempted)
//! - Creation failures (one node failed, the whole graph is rolled back)
//! - No-progress failures (cyclic or unsatisfiable dependencies)
//! - Rollback failures (secondary, reported but never the primary error)

use crate::rollback::RollbackReport;
use crate::types::{DestinationRef, NodeIndex, ObjectLabel, SourceId};

/// Error returned by a remote portal call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortalError {
    /// Requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Portal refused the request (permissions, validation, conflicts)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Request exceeded its timeout
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Connection-level failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Response or stored payload could not be decoded
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl PortalError {
    /// Check if retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Errors while discovering the dependency graph
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// A referenced object could not be read from the source
    #[error("source object {id} is unreadable: {source}")]
    Unreadable {
        id: SourceId,
        #[source]
        source: PortalError,
    },

    /// The object has a shape this migration cannot reproduce
    #[error("source object {id} cannot be migrated: {reason}")]
    Unsupported { id: SourceId, reason: String },
}

impl DiscoveryError {
    /// Create unreadable error for id
    pub fn unreadable(id: impl Into<SourceId>, source: PortalError) -> Self {
        Self::Unreadable {
            id: id.into(),
            source,
        }
    }

    /// Create unsupported error for id
    pub fn unsupported(id: impl Into<SourceId>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a destination while creating one object
///
/// `partial` holds whatever was already created before the failing step, so the
/// rollback can remove it.
#[derive(Debug, Clone)]
pub struct CreateFailure {
    pub partial: Vec<DestinationRef>,
    pub error: PortalError,
}

impl CreateFailure {
    /// Failure with nothing created
    #[inline]
    #[must_use]
    pub fn new(error: PortalError) -> Self {
        Self {
            partial: Vec::new(),
            error,
        }
    }

    /// With objects created before the failure
    #[inline]
    #[must_use]
    pub fn with_partial(mut self, partial: Vec<DestinationRef>) -> Self {
        self.partial = partial;
        self
    }
}

impl From<PortalError> for CreateFailure {
    fn from(error: PortalError) -> Self {
        Self::new(error)
    }
}

/// One node's migration failed
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to create {object}: {source}")]
pub struct CreationError {
    /// Identity of the failing source object
    pub object: ObjectLabel,
    /// Graph position of the failing node
    pub node: NodeIndex,
    /// Wave in which the node failed
    pub wave: usize,
    #[source]
    pub source: PortalError,
}

/// A created object could not be deleted during rollback
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to delete {object}: {source}")]
pub struct RollbackError {
    pub object: DestinationRef,
    #[source]
    pub source: PortalError,
}

/// Terminal error of a migration run
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The dependency graph could not be built
    #[error("dependency discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A node failed; every object created in this run was rolled back
    #[error("migration aborted: {failure}")]
    Creation {
        #[source]
        failure: CreationError,
        /// Outcome of the cleanup, for reporting only
        rollback: RollbackReport,
    },

    /// Unresolved nodes remain but none is ready
    #[error("no progress: {} node(s) unresolved, cycle {:?}", .unresolved.len(), .cycle)]
    NoProgress {
        unresolved: Vec<SourceId>,
        /// Source ids forming a dependency cycle among the unresolved nodes
        cycle: Vec<SourceId>,
    },

    /// Configuration rejected before the run started
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MigrationError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Creation { failure, .. } => failure.source.is_transient(),
            Self::Discovery(DiscoveryError::Unreadable { source, .. }) => source.is_transient(),
            _ => false,
        }
    }

    /// The failing source object, when one node is to blame
    #[must_use]
    pub fn failed_object(&self) -> Option<&ObjectLabel> {
        match self {
            Self::Creation { failure, .. } => Some(&failure.object),
            _ => None,
        }
    }

    /// Rollback outcome attached to a creation failure
    #[must_use]
    pub fn rollback_report(&self) -> Option<&RollbackReport> {
        match self {
            Self::Creation { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}
