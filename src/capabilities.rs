//! Interfaces to the collaborators that live outside the core: the system
//! clipboard, the identity/session subsystem, and the screen layer that
//! renders whatever the bridge reports.

use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{bridge::Selection, db::Highlight, error::Notice};

pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

/// Keeps the last copied text in memory. Hosts without a system clipboard
/// binding use this, and tests read it back.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    last: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Read-only view of the already-established login.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserContext>;
}

#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: Mutex<Option<UserContext>>,
}

impl StaticIdentity {
    pub fn new(user: Option<UserContext>) -> Self {
        Self {
            user: Mutex::new(user),
        }
    }

    pub fn set(&self, user: Option<UserContext>) {
        *self.user.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = user;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserContext> {
        self.user
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Everything the screen layer is told about a render session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ViewerEvent {
    RendererReady {
        session_id: String,
    },
    /// Document finished loading; hide any loading indicator.
    LoadComplete {
        session_id: String,
        total_pages: u32,
    },
    PageChanged {
        session_id: String,
        current_page: u32,
    },
    SelectionChanged {
        session_id: String,
        selection: Option<Selection>,
        show_highlight_action: bool,
    },
    TextCopied {
        session_id: String,
    },
    HighlightSaved {
        session_id: String,
        highlight: Highlight,
    },
    Notice {
        session_id: String,
        notice: Notice,
    },
    SessionClosed {
        session_id: String,
    },
}

pub trait ViewerEventSink: Send + Sync {
    fn emit(&self, event: ViewerEvent);
}

impl ViewerEventSink for mpsc::UnboundedSender<ViewerEvent> {
    fn emit(&self, event: ViewerEvent) {
        if self.send(event).is_err() {
            log::debug!("viewer event dropped; screen layer detached");
        }
    }
}
