//! Error types for content handling

use deepclone_engine::PortalError;

/// Errors while inspecting, comparing or rewriting content
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// Portal call failed
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// Item payload is missing or malformed
    #[error("invalid data in {id}: {reason}")]
    InvalidData { id: String, reason: String },

    /// Payload could not be decoded or encoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scratch space could not be used
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A rewrite pattern could not be compiled
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Created service does not have the layers of its source
    #[error("service mismatch: {0}")]
    ServiceMismatch(String),

    /// A reference in the payload has no mapping yet
    #[error("no mapping for {kind} {id}")]
    Unmapped { kind: &'static str, id: String },
}

impl ContentError {
    /// Create invalid data error
    pub fn invalid_data(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create unmapped item error
    pub fn unmapped_item(id: impl Into<String>) -> Self {
        Self::Unmapped {
            kind: "item",
            id: id.into(),
        }
    }

    /// Create unmapped group error
    pub fn unmapped_group(id: impl Into<String>) -> Self {
        Self::Unmapped {
            kind: "group",
            id: id.into(),
        }
    }
}

impl From<ContentError> for PortalError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::Portal(err) => err,
            ContentError::Io(err) => PortalError::Transport(err.to_string()),
            other => PortalError::InvalidPayload(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_errors_pass_through_unchanged() {
        let err = ContentError::from(PortalError::Timeout(5));
        assert_eq!(PortalError::from(err), PortalError::Timeout(5));
    }

    #[test]
    fn content_errors_become_invalid_payloads() {
        let err = PortalError::from(ContentError::unmapped_item("abc"));
        assert_eq!(err, PortalError::InvalidPayload("no mapping for item abc".into()));
    }
}
