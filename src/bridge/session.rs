use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BridgeState {
    #[default]
    Uninitialized,
    AwaitingReady,
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub text: String,
    pub page: u32,
}

/// Host-side state of one open document view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSession {
    pub session_id: String,
    pub document_id: Option<String>,
    pub state: BridgeState,
    /// Serialized load command held until the renderer reports readiness.
    #[serde(skip)]
    pub pending_load: Option<String>,
    pub current_page: u32,
    pub total_pages: u32,
    pub selection: Option<Selection>,
}

impl RenderSession {
    pub fn new(session_id: String, document_id: Option<String>) -> Self {
        Self {
            session_id,
            document_id,
            state: BridgeState::Uninitialized,
            pending_load: None,
            current_page: 1,
            total_pages: 0,
            selection: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == BridgeState::Closed
    }

    /// The renderer page has been told to load; start listening for readiness.
    pub fn begin_loading(&mut self) {
        if self.state == BridgeState::Uninitialized {
            self.state = BridgeState::AwaitingReady;
        }
    }

    /// Returns the payload when it may go on the wire now. Otherwise it is
    /// held, replacing any earlier pending command.
    pub fn queue_or_release(&mut self, payload: String) -> Option<String> {
        match self.state {
            BridgeState::Ready => Some(payload),
            BridgeState::Closed => None,
            BridgeState::Uninitialized | BridgeState::AwaitingReady => {
                self.pending_load = Some(payload);
                None
            }
        }
    }

    /// Handshake received. The pending command is released on the first
    /// call only.
    pub fn mark_ready(&mut self) -> Option<String> {
        match self.state {
            BridgeState::Uninitialized | BridgeState::AwaitingReady => {
                self.state = BridgeState::Ready;
                self.pending_load.take()
            }
            BridgeState::Ready | BridgeState::Closed => None,
        }
    }

    /// Copy of the pending command for the one-shot redelivery timer.
    pub fn pending_for_redelivery(&self) -> Option<String> {
        match self.state {
            BridgeState::Uninitialized | BridgeState::AwaitingReady => self.pending_load.clone(),
            BridgeState::Ready | BridgeState::Closed => None,
        }
    }

    pub fn record_load_complete(&mut self, total_pages: u32) {
        self.total_pages = total_pages;
        if self.current_page > total_pages && total_pages > 0 {
            self.current_page = total_pages;
        }
    }

    pub fn set_page(&mut self, page: u32) {
        if page >= 1 {
            self.current_page = page;
        }
    }

    /// Last write wins. Whitespace-only text clears the selection.
    /// Returns whether a selection is now active.
    pub fn update_selection(&mut self, text: &str, page: u32) -> bool {
        if text.trim().is_empty() {
            self.selection = None;
            return false;
        }
        self.set_page(page);
        self.selection = Some(Selection {
            text: text.to_string(),
            page: page.max(1),
        });
        true
    }

    pub fn close(&mut self) {
        self.state = BridgeState::Closed;
        self.pending_load = None;
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RenderSession {
        RenderSession::new("s1".into(), Some("doc".into()))
    }

    #[test]
    fn load_is_held_until_ready_then_released_once() {
        let mut s = session();
        s.begin_loading();
        assert_eq!(s.state, BridgeState::AwaitingReady);

        assert_eq!(s.queue_or_release("LOAD".into()), None);
        assert_eq!(s.pending_for_redelivery().as_deref(), Some("LOAD"));

        assert_eq!(s.mark_ready().as_deref(), Some("LOAD"));
        assert!(s.pending_load.is_none());
        assert_eq!(s.mark_ready(), None);
        assert_eq!(s.pending_for_redelivery(), None);

        assert_eq!(s.queue_or_release("NEXT".into()).as_deref(), Some("NEXT"));
        assert!(s.pending_load.is_none());
    }

    #[test]
    fn later_load_replaces_pending_one() {
        let mut s = session();
        s.begin_loading();
        s.queue_or_release("A".into());
        s.queue_or_release("B".into());
        assert_eq!(s.mark_ready().as_deref(), Some("B"));
    }

    #[test]
    fn closed_session_drops_everything() {
        let mut s = session();
        s.begin_loading();
        s.queue_or_release("LOAD".into());
        s.update_selection("text", 2);
        s.close();

        assert!(s.is_closed());
        assert!(s.pending_load.is_none());
        assert!(s.selection.is_none());
        assert_eq!(s.mark_ready(), None);
        assert_eq!(s.queue_or_release("X".into()), None);
        s.begin_loading();
        assert!(s.is_closed());
    }

    #[test]
    fn blank_selection_clears_previous() {
        let mut s = session();
        assert!(s.update_selection("  a phrase ", 3));
        assert_eq!(
            s.selection,
            Some(Selection {
                text: "  a phrase ".into(),
                page: 3
            })
        );
        assert_eq!(s.current_page, 3);

        assert!(!s.update_selection("   ", 3));
        assert!(s.selection.is_none());
    }

    #[test]
    fn load_complete_clamps_current_page() {
        let mut s = session();
        s.set_page(9);
        s.record_load_complete(4);
        assert_eq!(s.total_pages, 4);
        assert_eq!(s.current_page, 4);
        s.set_page(0);
        assert_eq!(s.current_page, 4);
    }
}
