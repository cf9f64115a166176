//! Error taxonomy shared by the serving, resolving, bridging and storage layers.
//!
//! Internal plumbing (the SQLite worker, migrations) speaks `anyhow`; every
//! component boundary converts into [`ViewerError`] so the screen layer can
//! branch on a stable `kind` string.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    /// A renderer asset could not be staged. Provisioning continues without it.
    #[error("failed to provision asset {asset}: {reason}")]
    Provisioning { asset: String, reason: String },

    /// Neither the preferred nor the ephemeral port could be bound.
    #[error("local server failed to start: {0}")]
    ServerStart(#[source] std::io::Error),

    /// An operation needed the loopback server but none is running.
    #[error("local server is not running")]
    ServerNotRunning,

    #[error("cannot resolve document reference {reference}: {reason}")]
    UnresolvableReference { reference: String, reason: String },

    #[error("cannot save highlight: unknown document")]
    MissingDocumentContext,

    #[error("annotation store accessed before it was opened")]
    StoreUnavailable,

    #[error("annotation store failure: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// Inbound message was not a well-formed tagged record.
    #[error("malformed bridge message: {0}")]
    BridgeParse(String),

    /// The sandbox reported its own fatal error.
    #[error("renderer failed: {0}")]
    RendererLoad(String),

    #[error("no logged-in identity")]
    NotAuthenticated,

    #[error("unknown session {0}")]
    SessionNotFound(String),

    #[error("session {0} is closed")]
    SessionClosed(String),
}

impl ViewerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ViewerError::Provisioning { .. } => "provisioning",
            ViewerError::ServerStart(_) | ViewerError::ServerNotRunning => "server_start",
            ViewerError::UnresolvableReference { .. } => "unresolvable_reference",
            ViewerError::MissingDocumentContext => "missing_document_context",
            ViewerError::StoreUnavailable => "store_unavailable",
            ViewerError::Storage(_) => "storage",
            ViewerError::BridgeParse(_) => "bridge_parse",
            ViewerError::RendererLoad(_) => "renderer_load",
            ViewerError::NotAuthenticated => "not_authenticated",
            ViewerError::SessionNotFound(_) => "session_not_found",
            ViewerError::SessionClosed(_) => "session_closed",
        }
    }

    /// Whether the error ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ViewerError::ServerStart(_) | ViewerError::RendererLoad(_)
        )
    }

    pub fn notice(&self) -> Notice {
        Notice {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Uniform `{kind, message}` shape surfaced to the screen layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: String,
    pub message: String,
}

impl From<ViewerError> for Notice {
    fn from(err: ViewerError) -> Self {
        err.notice()
    }
}

pub type ViewerResult<T> = std::result::Result<T, ViewerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_carries_kind_and_display_message() {
        let notice = Notice::from(ViewerError::MissingDocumentContext);
        assert_eq!(notice.kind, "missing_document_context");
        assert_eq!(notice.message, "cannot save highlight: unknown document");
    }

    #[test]
    fn only_server_and_renderer_failures_are_fatal() {
        assert!(ViewerError::RendererLoad("bad pdf".into()).is_fatal());
        assert!(ViewerError::ServerStart(std::io::Error::other("bind")).is_fatal());
        assert!(!ViewerError::BridgeParse("x".into()).is_fatal());
        assert!(!ViewerError::StoreUnavailable.is_fatal());
    }
}
