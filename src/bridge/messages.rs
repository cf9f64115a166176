//! Wire vocabulary between host and renderer. Every record is JSON with a
//! string `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::error::{ViewerError, ViewerResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    Ready,
    HtmlReady,
    #[serde(rename_all = "camelCase")]
    LoadComplete {
        #[serde(alias = "numPages")]
        total_pages: u32,
    },
    SelectionChanged {
        #[serde(default)]
        text: String,
        #[serde(default = "first_page")]
        page: u32,
    },
    PageChanged {
        page: u32,
    },
    CopyText {
        text: String,
    },
    AddToDocs {
        text: String,
        page: u32,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        fatal: bool,
    },
    Debug {
        #[serde(default)]
        message: String,
    },
    /// Anything that failed to decode. Never produced by serde itself.
    #[serde(skip)]
    Unparsed { reason: String },
}

fn first_page() -> u32 {
    1
}

impl InboundEvent {
    /// Decode one inbound record; malformed input becomes `Unparsed`.
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|err| InboundEvent::Unparsed {
            reason: err.to_string(),
        })
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, InboundEvent::Ready | InboundEvent::HtmlReady)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            InboundEvent::Ready => "READY",
            InboundEvent::HtmlReady => "HTML_READY",
            InboundEvent::LoadComplete { .. } => "LOAD_COMPLETE",
            InboundEvent::SelectionChanged { .. } => "SELECTION_CHANGED",
            InboundEvent::PageChanged { .. } => "PAGE_CHANGED",
            InboundEvent::CopyText { .. } => "COPY_TEXT",
            InboundEvent::AddToDocs { .. } => "ADD_TO_DOCS",
            InboundEvent::Error { .. } => "ERROR",
            InboundEvent::Debug { .. } => "DEBUG",
            InboundEvent::Unparsed { .. } => "<unparsed>",
        }
    }
}

/// Where the renderer should fetch the document from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Uri(String),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundCommand {
    LoadPdf { source: LoadSource },
}

impl OutboundCommand {
    pub fn encode(&self) -> ViewerResult<String> {
        serde_json::to_string(self)
            .map_err(|err| ViewerError::BridgeParse(format!("cannot encode command: {err}")))
    }
}
